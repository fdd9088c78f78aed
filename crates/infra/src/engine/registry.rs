use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use iotforge_core::TenantId;
use iotforge_events::TenantSnapshot;

use super::lifecycle::{LifecycleStatus, TenantEngine};

/// Tenant engines of one service process.
///
/// Entries are inserted when Initialize starts and removed on any stage's
/// terminal failure, so a later attempt starts from scratch. The pending set
/// holds tenants whose pipeline has not finished yet. The last failure per
/// tenant is kept for reporting until the tenant is attempted again.
#[derive(Default)]
pub struct TenantEngineRegistry {
    inner: Mutex<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    engines: BTreeMap<TenantId, EngineEntry>,
    pending: HashSet<TenantId>,
    failures: BTreeMap<TenantId, EngineStatusView>,
}

struct EngineEntry {
    tenant: TenantSnapshot,
    engine: Arc<dyn TenantEngine>,
    status: LifecycleStatus,
    last_error: Option<String>,
    updated_at: DateTime<Utc>,
}

impl EngineEntry {
    fn view(&self, pending: bool) -> EngineStatusView {
        EngineStatusView {
            tenant_id: self.tenant.id().to_string(),
            status: self.status,
            last_error: self.last_error.clone(),
            pending,
            updated_at: self.updated_at,
        }
    }
}

/// Point-in-time view of one engine, for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusView {
    pub tenant_id: String,
    pub status: LifecycleStatus,
    pub last_error: Option<String>,
    pub pending: bool,
    pub updated_at: DateTime<Utc>,
}

impl TenantEngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Every mutation is a single map update, so a panicked holder cannot leave
    // the state half-written.
    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `engine` as `Created` and mark its tenant pending.
    ///
    /// Returns `false` (and registers nothing) when the tenant is already
    /// pending or registered.
    pub fn begin(&self, tenant: TenantSnapshot, engine: Arc<dyn TenantEngine>) -> bool {
        let mut state = self.state();
        let id = tenant.id().clone();
        if state.pending.contains(&id) || state.engines.contains_key(&id) {
            return false;
        }
        state.failures.remove(&id);
        state.pending.insert(id.clone());
        state.engines.insert(
            id,
            EngineEntry {
                tenant,
                engine,
                status: LifecycleStatus::Created,
                last_error: None,
                updated_at: Utc::now(),
            },
        );
        true
    }

    pub fn set_status(&self, tenant_id: &TenantId, status: LifecycleStatus) {
        if let Some(entry) = self.state().engines.get_mut(tenant_id) {
            entry.status = status;
            entry.updated_at = Utc::now();
        }
    }

    pub fn engine(&self, tenant_id: &TenantId) -> Option<Arc<dyn TenantEngine>> {
        self.state().engines.get(tenant_id).map(|e| e.engine.clone())
    }

    pub fn tenant(&self, tenant_id: &TenantId) -> Option<TenantSnapshot> {
        self.state().engines.get(tenant_id).map(|e| e.tenant.clone())
    }

    pub fn status(&self, tenant_id: &TenantId) -> Option<LifecycleStatus> {
        self.state().engines.get(tenant_id).map(|e| e.status)
    }

    pub fn is_pending(&self, tenant_id: &TenantId) -> bool {
        self.state().pending.contains(tenant_id)
    }

    pub fn contains(&self, tenant_id: &TenantId) -> bool {
        self.state().engines.contains_key(tenant_id)
    }

    /// The pipeline finished; the engine stays registered.
    pub fn complete(&self, tenant_id: &TenantId) {
        self.state().pending.remove(tenant_id);
    }

    /// Terminal failure: drop the engine and its pending mark, keep the error.
    pub fn fail(&self, tenant_id: &TenantId, status: LifecycleStatus, error: impl Into<String>) {
        let mut state = self.state();
        state.pending.remove(tenant_id);
        let Some(mut entry) = state.engines.remove(tenant_id) else {
            return;
        };
        entry.status = status;
        entry.last_error = Some(error.into());
        entry.updated_at = Utc::now();
        state.failures.insert(tenant_id.clone(), entry.view(false));
    }

    /// Registered engines followed by recent failures, each ordered by tenant.
    pub fn statuses(&self) -> Vec<EngineStatusView> {
        let state = self.state();
        state
            .engines
            .iter()
            .map(|(id, entry)| entry.view(state.pending.contains(id)))
            .chain(state.failures.values().cloned())
            .collect()
    }
}
