//! In-memory coordination store for tests/dev.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use super::{CoordinationError, CoordinationStore, LockLease, ancestors, validate_path};

/// In-memory hierarchical store with per-path async locks.
///
/// - Atomic create (single mutex around the node map)
/// - Locks are FIFO-fair async mutexes, one per path
/// - Counters for writes and lock acquisitions, for assertions in tests
/// - An outage switch to simulate an unavailable store
#[derive(Debug, Default)]
pub struct InMemoryCoordinationStore {
    nodes: Mutex<BTreeMap<String, Vec<u8>>>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    writes: AtomicU64,
    lock_acquisitions: AtomicU64,
    unavailable: AtomicBool,
}

impl InMemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes created so far (ancestors included).
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of locks handed out so far.
    pub fn lock_acquisitions(&self) -> u64 {
        self.lock_acquisitions.load(Ordering::SeqCst)
    }

    /// Simulate an outage: every operation fails with `Unavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Whether the lock at `path` is currently held.
    pub fn is_locked(&self, path: &str) -> bool {
        let locks = match self.locks.lock() {
            Ok(l) => l,
            Err(_) => return false,
        };
        locks.get(path).is_some_and(|m| m.try_lock().is_err())
    }

    /// Every node path, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.nodes
            .lock()
            .map(|nodes| nodes.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn check_available(&self) -> Result<(), CoordinationError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CoordinationError::Unavailable("in-memory store offline".to_string()));
        }
        Ok(())
    }

    fn insert(&self, path: &str, data: &[u8], with_parents: bool) -> Result<(), CoordinationError> {
        self.check_available()?;
        validate_path(path)?;

        let mut nodes = self.nodes.lock().map_err(|_| CoordinationError::Poisoned)?;
        if nodes.contains_key(path) {
            return Err(CoordinationError::NodeExists(path.to_string()));
        }

        let parents = ancestors(path);
        if with_parents {
            for parent in parents {
                if !nodes.contains_key(parent) {
                    nodes.insert(parent.to_string(), Vec::new());
                    self.writes.fetch_add(1, Ordering::SeqCst);
                }
            }
        } else if let Some(parent) = parents.last() {
            if !nodes.contains_key(*parent) {
                return Err(CoordinationError::NoParent(path.to_string()));
            }
        }

        nodes.insert(path.to_string(), data.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        debug!(path, "node created");
        Ok(())
    }
}

#[async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    async fn exists(&self, path: &str) -> Result<bool, CoordinationError> {
        self.check_available()?;
        let nodes = self.nodes.lock().map_err(|_| CoordinationError::Poisoned)?;
        Ok(nodes.contains_key(path))
    }

    async fn create(&self, path: &str, data: &[u8]) -> Result<(), CoordinationError> {
        self.insert(path, data, false)
    }

    async fn create_all(&self, path: &str, data: &[u8]) -> Result<(), CoordinationError> {
        self.insert(path, data, true)
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>, CoordinationError> {
        self.check_available()?;
        let nodes = self.nodes.lock().map_err(|_| CoordinationError::Poisoned)?;
        Ok(nodes.get(path).cloned())
    }

    async fn children(&self, path: &str) -> Result<Vec<String>, CoordinationError> {
        self.check_available()?;
        validate_path(path)?;
        let prefix = format!("{path}/");
        let nodes = self.nodes.lock().map_err(|_| CoordinationError::Poisoned)?;
        Ok(nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| &k[prefix.len()..])
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect())
    }

    async fn acquire_lock(&self, path: &str) -> Result<Box<dyn LockLease>, CoordinationError> {
        self.check_available()?;
        validate_path(path)?;

        let mutex = {
            let mut locks = self.locks.lock().map_err(|_| CoordinationError::Poisoned)?;
            locks.entry(path.to_string()).or_default().clone()
        };

        let guard = mutex.lock_owned().await;
        self.lock_acquisitions.fetch_add(1, Ordering::SeqCst);
        debug!(path, "lock acquired");

        Ok(Box::new(InMemoryLease {
            path: path.to_string(),
            guard: Some(guard),
        }))
    }
}

/// Lease over one in-memory lock; dropping it releases the lock.
struct InMemoryLease {
    path: String,
    guard: Option<OwnedMutexGuard<()>>,
}

#[async_trait]
impl LockLease for InMemoryLease {
    fn path(&self) -> &str {
        &self.path
    }

    async fn release(mut self: Box<Self>) -> Result<(), CoordinationError> {
        self.guard.take();
        debug!(path = %self.path, "lock released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::coordination::ensure_node;

    #[tokio::test]
    async fn create_requires_parent() {
        let store = InMemoryCoordinationStore::new();
        assert_eq!(
            store.create("/a/b", b"").await,
            Err(CoordinationError::NoParent("/a/b".to_string()))
        );
        store.create("/a", b"").await.unwrap();
        store.create("/a/b", b"x").await.unwrap();
        assert_eq!(store.get("/a/b").await.unwrap(), Some(b"x".to_vec()));
    }

    #[tokio::test]
    async fn create_is_exclusive() {
        let store = InMemoryCoordinationStore::new();
        store.create("/a", b"").await.unwrap();
        assert_eq!(
            store.create("/a", b"").await,
            Err(CoordinationError::NodeExists("/a".to_string()))
        );
    }

    #[tokio::test]
    async fn create_all_builds_ancestors_and_ensure_node_is_idempotent() {
        let store = InMemoryCoordinationStore::new();
        store.create_all("/x/y/z", b"leaf").await.unwrap();
        assert!(store.exists("/x").await.unwrap());
        assert!(store.exists("/x/y").await.unwrap());
        assert_eq!(store.write_count(), 3);

        assert!(!ensure_node(&store, "/x/y").await.unwrap());
        assert!(ensure_node(&store, "/x/w").await.unwrap());
    }

    #[tokio::test]
    async fn children_lists_direct_descendants_only() {
        let store = InMemoryCoordinationStore::new();
        store.create_all("/t/acme/a.json", b"").await.unwrap();
        store.create_all("/t/acme/scripts/init.js", b"").await.unwrap();
        store.create_all("/t/acmeco", b"").await.unwrap();

        assert_eq!(store.children("/t/acme").await.unwrap(), vec!["a.json", "scripts"]);
        assert_eq!(store.children("/t").await.unwrap(), vec!["acme", "acmeco"]);
    }

    #[tokio::test]
    async fn outage_fails_every_operation() {
        let store = InMemoryCoordinationStore::new();
        store.set_unavailable(true);
        assert!(matches!(store.exists("/a").await, Err(CoordinationError::Unavailable(_))));
        assert!(matches!(store.create_all("/a", b"").await, Err(CoordinationError::Unavailable(_))));
        store.set_unavailable(false);
        assert!(!store.exists("/a").await.unwrap());
    }

    #[tokio::test]
    async fn lock_excludes_second_holder_until_released() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let first = store.acquire_lock("/l").await.unwrap();
        assert!(store.is_locked("/l"));

        let contender = {
            let store = store.clone();
            tokio::spawn(async move { store.acquire_lock("/l").await.map(|lease| lease.path().to_string()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        first.release().await.unwrap();
        assert_eq!(contender.await.unwrap().unwrap(), "/l");
        assert_eq!(store.lock_acquisitions(), 2);
    }

    #[tokio::test]
    async fn dropped_lease_releases_lock() {
        let store = InMemoryCoordinationStore::new();
        drop(store.acquire_lock("/l").await.unwrap());
        assert!(!store.is_locked("/l"));
    }
}
