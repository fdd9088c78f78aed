//! Tenant templates: seed artifacts copied into a tenant's configuration node.
//!
//! The content of a template is opaque to provisioning. A provider only has to
//! copy every artifact of a template below a destination path.

use async_trait::async_trait;
use tracing::debug;

use iotforge_core::naming;

use crate::coordination::{CoordinationError, CoordinationStore};

mod filesystem;
mod in_memory;

pub use filesystem::FilesystemTemplateProvider;
pub use in_memory::{DEFAULT_TEMPLATE_ID, InMemoryTemplateProvider};

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("unknown template: {0}")]
    UnknownTemplate(String),

    #[error("invalid template: {0}")]
    Invalid(String),

    #[error("template io error: {0}")]
    Io(String),

    #[error(transparent)]
    Coordination(#[from] CoordinationError),
}

/// One file of a template, addressed relative to the template root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateArtifact {
    pub path: String,
    pub contents: Vec<u8>,
}

impl TemplateArtifact {
    pub fn new(path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
        }
    }
}

/// Copies a template's artifacts into the coordination store.
#[async_trait]
pub trait TemplateProvider: Send + Sync {
    /// Copy every artifact of `template_id` below `destination`.
    ///
    /// Returns the number of artifacts copied.
    async fn copy(&self, template_id: &str, destination: &str) -> Result<usize, TemplateError>;
}

/// Write artifacts below `destination`, creating intermediate directories.
///
/// The whole template is rejected before anything is written if an artifact
/// would land on the reserved marker name.
pub(crate) async fn write_artifacts<S>(
    store: &S,
    destination: &str,
    artifacts: &[TemplateArtifact],
) -> Result<usize, TemplateError>
where
    S: CoordinationStore + ?Sized,
{
    if let Some(reserved) = artifacts.iter().find(|a| targets_marker(&a.path)) {
        return Err(TemplateError::Invalid(format!(
            "artifact '{}' collides with the reserved '{}' marker",
            reserved.path,
            naming::BOOTSTRAPPED
        )));
    }

    for artifact in artifacts {
        let path = naming::join(destination, &artifact.path);
        store.create_all(&path, &artifact.contents).await?;
        debug!(path = %path, bytes = artifact.contents.len(), "template artifact copied");
    }
    Ok(artifacts.len())
}

fn targets_marker(path: &str) -> bool {
    path.split(naming::SEPARATOR)
        .find(|segment| !segment.is_empty())
        .is_some_and(|first| first == naming::BOOTSTRAPPED)
}
