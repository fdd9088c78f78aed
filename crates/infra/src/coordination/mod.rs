//! Coordination store: a hierarchical, strongly consistent namespace with
//! atomic node creation, existence checks and named distributed locks.
//!
//! All provisioning state lives here as contentless **marker nodes** whose
//! existence is the signal. Nodes are created once and never mutated.
//!
//! ## Implementations
//!
//! - [`InMemoryCoordinationStore`]: single-process, for tests/dev
//! - `RedisCoordinationStore` (feature `redis`): shared across processes

use std::sync::Arc;

use async_trait::async_trait;

mod in_memory;
#[cfg(feature = "redis")]
mod redis_store;

pub use in_memory::InMemoryCoordinationStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisCoordinationStore;

/// Shared handle used by every component that touches the store.
pub type SharedCoordinationStore = Arc<dyn CoordinationStore>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinationError {
    #[error("node already exists: {0}")]
    NodeExists(String),

    #[error("parent node missing for: {0}")]
    NoParent(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("coordination store unavailable: {0}")]
    Unavailable(String),

    #[error("coordination store state poisoned")]
    Poisoned,
}

/// Coordination store operations used by provisioning.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Whether a node exists at `path`.
    async fn exists(&self, path: &str) -> Result<bool, CoordinationError>;

    /// Atomically create a node. The parent must exist.
    ///
    /// Fails with [`CoordinationError::NodeExists`] if the node is already there.
    async fn create(&self, path: &str, data: &[u8]) -> Result<(), CoordinationError>;

    /// Create a node, creating any missing (empty) ancestors first.
    ///
    /// Fails with [`CoordinationError::NodeExists`] if the leaf is already there.
    async fn create_all(&self, path: &str, data: &[u8]) -> Result<(), CoordinationError>;

    /// Node contents, or `None` when the node does not exist.
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>, CoordinationError>;

    /// Names of the direct children of `path`, sorted.
    async fn children(&self, path: &str) -> Result<Vec<String>, CoordinationError>;

    /// Acquire the named lock at `path`, waiting as long as it takes.
    async fn acquire_lock(&self, path: &str) -> Result<Box<dyn LockLease>, CoordinationError>;
}

/// A held distributed lock.
///
/// Callers release explicitly so release errors can be observed. Dropping an
/// unreleased lease still gives the lock up (immediately in memory, at lease
/// expiry for shared backends).
#[async_trait]
pub trait LockLease: Send {
    fn path(&self) -> &str;

    async fn release(self: Box<Self>) -> Result<(), CoordinationError>;
}

#[async_trait]
impl<S> CoordinationStore for Arc<S>
where
    S: CoordinationStore + ?Sized,
{
    async fn exists(&self, path: &str) -> Result<bool, CoordinationError> {
        (**self).exists(path).await
    }

    async fn create(&self, path: &str, data: &[u8]) -> Result<(), CoordinationError> {
        (**self).create(path, data).await
    }

    async fn create_all(&self, path: &str, data: &[u8]) -> Result<(), CoordinationError> {
        (**self).create_all(path, data).await
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>, CoordinationError> {
        (**self).get(path).await
    }

    async fn children(&self, path: &str) -> Result<Vec<String>, CoordinationError> {
        (**self).children(path).await
    }

    async fn acquire_lock(&self, path: &str) -> Result<Box<dyn LockLease>, CoordinationError> {
        (**self).acquire_lock(path).await
    }
}

/// Create an empty node (and its ancestors) unless it already exists.
///
/// Returns `true` when this call created the node.
pub async fn ensure_node<S>(store: &S, path: &str) -> Result<bool, CoordinationError>
where
    S: CoordinationStore + ?Sized,
{
    match store.create_all(path, &[]).await {
        Ok(()) => Ok(true),
        Err(CoordinationError::NodeExists(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Reject anything that is not an absolute, normalized path.
pub(crate) fn validate_path(path: &str) -> Result<(), CoordinationError> {
    let valid = path.starts_with('/')
        && path.len() > 1
        && !path.ends_with('/')
        && path[1..].split('/').all(|s| !s.is_empty() && s != "." && s != "..");
    if valid {
        Ok(())
    } else {
        Err(CoordinationError::InvalidPath(path.to_string()))
    }
}

/// Every proper ancestor of `path`, outermost first.
pub(crate) fn ancestors(path: &str) -> Vec<&str> {
    path.match_indices('/')
        .skip(1)
        .map(|(idx, _)| &path[..idx])
        .collect()
}
