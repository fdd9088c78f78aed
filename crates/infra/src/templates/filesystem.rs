use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use iotforge_core::id::validate_segment;

use crate::coordination::SharedCoordinationStore;

use super::{TemplateArtifact, TemplateError, TemplateProvider, write_artifacts};

/// Templates stored as directories: `<root>/<template_id>/**`.
pub struct FilesystemTemplateProvider {
    store: SharedCoordinationStore,
    root: PathBuf,
}

impl FilesystemTemplateProvider {
    pub fn new(store: SharedCoordinationStore, root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl TemplateProvider for FilesystemTemplateProvider {
    async fn copy(&self, template_id: &str, destination: &str) -> Result<usize, TemplateError> {
        validate_segment("template", template_id)
            .map_err(|e| TemplateError::Invalid(e.to_string()))?;

        let dir = self.root.join(template_id);
        let artifacts = tokio::task::spawn_blocking(move || load_artifacts(&dir))
            .await
            .map_err(|e| TemplateError::Io(e.to_string()))??;

        write_artifacts(&*self.store, destination, &artifacts).await
    }
}

/// Read every file below `dir`, sorted by relative path.
fn load_artifacts(dir: &Path) -> Result<Vec<TemplateArtifact>, TemplateError> {
    if !dir.is_dir() {
        return Err(TemplateError::UnknownTemplate(dir.display().to_string()));
    }

    let mut artifacts = Vec::new();
    collect(dir, dir, &mut artifacts)?;
    artifacts.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(artifacts)
}

fn collect(base: &Path, dir: &Path, out: &mut Vec<TemplateArtifact>) -> Result<(), TemplateError> {
    let entries = fs::read_dir(dir).map_err(|e| TemplateError::Io(format!("{}: {e}", dir.display())))?;
    for entry in entries {
        let entry = entry.map_err(|e| TemplateError::Io(e.to_string()))?;
        let path = entry.path();
        if path.is_dir() {
            collect(base, &path, out)?;
            continue;
        }

        let relative = path
            .strip_prefix(base)
            .map_err(|e| TemplateError::Io(e.to_string()))?
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        for segment in &relative {
            validate_segment("template artifact", segment)
                .map_err(|e| TemplateError::Invalid(e.to_string()))?;
        }

        let contents = fs::read(&path).map_err(|e| TemplateError::Io(format!("{}: {e}", path.display())))?;
        out.push(TemplateArtifact::new(relative.join("/"), contents));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::coordination::{CoordinationStore, InMemoryCoordinationStore};

    #[tokio::test]
    async fn copies_nested_files() {
        let root = tempfile::tempdir().unwrap();
        let template = root.path().join("smart-building");
        fs::create_dir_all(template.join("scripts")).unwrap();
        fs::write(template.join("device-management.json"), b"{}").unwrap();
        fs::write(template.join("scripts").join("init.js"), b"// init").unwrap();

        let store = Arc::new(InMemoryCoordinationStore::new());
        store.create_all("/i/tenants/acme", b"").await.unwrap();
        let provider = FilesystemTemplateProvider::new(store.clone(), root.path());

        let copied = provider.copy("smart-building", "/i/tenants/acme").await.unwrap();

        assert_eq!(copied, 2);
        assert_eq!(
            store.get("/i/tenants/acme/scripts/init.js").await.unwrap(),
            Some(b"// init".to_vec())
        );
    }

    #[tokio::test]
    async fn missing_directory_is_unknown_template() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryCoordinationStore::new());
        let provider = FilesystemTemplateProvider::new(store, root.path());
        assert!(matches!(
            provider.copy("nope", "/i/tenants/acme").await,
            Err(TemplateError::UnknownTemplate(_))
        ));
    }

    #[tokio::test]
    async fn template_id_cannot_escape_root() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryCoordinationStore::new());
        let provider = FilesystemTemplateProvider::new(store, root.path());
        assert!(matches!(
            provider.copy("../etc", "/i/tenants/acme").await,
            Err(TemplateError::Invalid(_))
        ));
    }
}
