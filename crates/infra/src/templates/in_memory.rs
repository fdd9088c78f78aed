use std::collections::HashMap;

use async_trait::async_trait;

use crate::coordination::SharedCoordinationStore;

use super::{TemplateArtifact, TemplateError, TemplateProvider, write_artifacts};

/// Template every tenant gets when no other template is requested.
pub const DEFAULT_TEMPLATE_ID: &str = "default";

/// Template bundles held in memory.
pub struct InMemoryTemplateProvider {
    store: SharedCoordinationStore,
    templates: HashMap<String, Vec<TemplateArtifact>>,
}

impl InMemoryTemplateProvider {
    /// Provider with no templates registered.
    pub fn empty(store: SharedCoordinationStore) -> Self {
        Self {
            store,
            templates: HashMap::new(),
        }
    }

    /// Provider carrying the built-in `default` template.
    pub fn with_builtin_templates(store: SharedCoordinationStore) -> Self {
        Self::empty(store).with_template(DEFAULT_TEMPLATE_ID, builtin_default())
    }

    pub fn with_template(
        mut self,
        template_id: impl Into<String>,
        artifacts: impl IntoIterator<Item = TemplateArtifact>,
    ) -> Self {
        self.templates
            .insert(template_id.into(), artifacts.into_iter().collect());
        self
    }

    pub fn template_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.templates.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

#[async_trait]
impl TemplateProvider for InMemoryTemplateProvider {
    async fn copy(&self, template_id: &str, destination: &str) -> Result<usize, TemplateError> {
        let artifacts = self
            .templates
            .get(template_id)
            .ok_or_else(|| TemplateError::UnknownTemplate(template_id.to_string()))?;
        write_artifacts(&*self.store, destination, artifacts).await
    }
}

fn builtin_default() -> Vec<TemplateArtifact> {
    vec![
        TemplateArtifact::new(
            "tenant-management.json",
            r#"{"datasetTemplate":"empty"}"#,
        ),
        TemplateArtifact::new(
            "device-management.json",
            r#"{"deviceTypes":[],"autoRegister":true}"#,
        ),
        TemplateArtifact::new(
            "event-management.json",
            r#"{"retentionDays":30}"#,
        ),
        TemplateArtifact::new("scripts/bootstrap.js", "// tenant seed hooks\n"),
    ]
}
