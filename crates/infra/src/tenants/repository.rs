use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use iotforge_core::TenantId;
use iotforge_events::TenantSnapshot;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TenantStoreError {
    #[error("tenant already exists: {0}")]
    AlreadyExists(TenantId),

    #[error("tenant not found: {0}")]
    NotFound(TenantId),

    #[error("tenant store unavailable: {0}")]
    Unavailable(String),
}

/// Tenant-management persistence (the write path the notifier wraps).
pub trait TenantRepository: Send + Sync {
    fn create(&self, tenant: TenantSnapshot) -> Result<TenantSnapshot, TenantStoreError>;
    fn update(&self, tenant: TenantSnapshot) -> Result<TenantSnapshot, TenantStoreError>;
    /// Remove a tenant, returning its last state.
    fn delete(&self, tenant_id: &TenantId) -> Result<TenantSnapshot, TenantStoreError>;
    fn get(&self, tenant_id: &TenantId) -> Result<Option<TenantSnapshot>, TenantStoreError>;
    fn list(&self) -> Result<Vec<TenantSnapshot>, TenantStoreError>;
}

impl<R> TenantRepository for Arc<R>
where
    R: TenantRepository + ?Sized,
{
    fn create(&self, tenant: TenantSnapshot) -> Result<TenantSnapshot, TenantStoreError> {
        (**self).create(tenant)
    }

    fn update(&self, tenant: TenantSnapshot) -> Result<TenantSnapshot, TenantStoreError> {
        (**self).update(tenant)
    }

    fn delete(&self, tenant_id: &TenantId) -> Result<TenantSnapshot, TenantStoreError> {
        (**self).delete(tenant_id)
    }

    fn get(&self, tenant_id: &TenantId) -> Result<Option<TenantSnapshot>, TenantStoreError> {
        (**self).get(tenant_id)
    }

    fn list(&self) -> Result<Vec<TenantSnapshot>, TenantStoreError> {
        (**self).list()
    }
}

/// In-memory tenant repository for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryTenantRepository {
    inner: RwLock<BTreeMap<TenantId, TenantSnapshot>>,
}

impl InMemoryTenantRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> TenantStoreError {
    TenantStoreError::Unavailable("tenant map poisoned".to_string())
}

impl TenantRepository for InMemoryTenantRepository {
    fn create(&self, tenant: TenantSnapshot) -> Result<TenantSnapshot, TenantStoreError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        if map.contains_key(tenant.id()) {
            return Err(TenantStoreError::AlreadyExists(tenant.id().clone()));
        }
        map.insert(tenant.id().clone(), tenant.clone());
        Ok(tenant)
    }

    fn update(&self, tenant: TenantSnapshot) -> Result<TenantSnapshot, TenantStoreError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        match map.get_mut(tenant.id()) {
            Some(existing) => {
                *existing = tenant.clone();
                Ok(tenant)
            }
            None => Err(TenantStoreError::NotFound(tenant.id().clone())),
        }
    }

    fn delete(&self, tenant_id: &TenantId) -> Result<TenantSnapshot, TenantStoreError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        map.remove(tenant_id)
            .ok_or_else(|| TenantStoreError::NotFound(tenant_id.clone()))
    }

    fn get(&self, tenant_id: &TenantId) -> Result<Option<TenantSnapshot>, TenantStoreError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map.get(tenant_id).cloned())
    }

    fn list(&self) -> Result<Vec<TenantSnapshot>, TenantStoreError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(id: &str) -> TenantSnapshot {
        TenantSnapshot::new(TenantId::new(id).unwrap(), id.to_uppercase(), "default")
    }

    #[test]
    fn create_rejects_duplicates() {
        let repo = InMemoryTenantRepository::new();
        repo.create(tenant("acme")).unwrap();
        assert_eq!(
            repo.create(tenant("acme")),
            Err(TenantStoreError::AlreadyExists(TenantId::new("acme").unwrap()))
        );
    }

    #[test]
    fn update_and_delete_require_existing_tenant() {
        let repo = InMemoryTenantRepository::new();
        assert!(matches!(repo.update(tenant("ghost")), Err(TenantStoreError::NotFound(_))));
        assert!(matches!(
            repo.delete(&TenantId::new("ghost").unwrap()),
            Err(TenantStoreError::NotFound(_))
        ));
    }

    #[test]
    fn list_is_ordered_by_id() {
        let repo = InMemoryTenantRepository::new();
        repo.create(tenant("zeta")).unwrap();
        repo.create(tenant("acme")).unwrap();
        let ids: Vec<String> = repo.list().unwrap().iter().map(|t| t.id().to_string()).collect();
        assert_eq!(ids, vec!["acme", "zeta"]);
    }
}
