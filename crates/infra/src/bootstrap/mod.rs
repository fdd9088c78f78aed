//! Instance-wide tenant bootstrap.
//!
//! ```text
//! tenant change topic (group <instance>.tenant-bootstrap-consumers)
//!   ↓
//! TenantBootstrapConsumer   (one consumer thread per process)
//!   ↓ ADDED only
//! WorkerPool                (fixed size, default 3)
//!   ↓
//! TenantBootstrapper        (config node → template copy → bootstrapped marker)
//! ```
//!
//! There is no lock around the per-tenant sequence. Exclusivity comes from
//! consumer-group delivery: one `ADDED` event for a tenant reaches one group
//! member at a time. Module-local seeding takes a lock instead; see
//! [`crate::engine`].

mod consumer;

pub use consumer::{BootstrapDispatcher, TenantBootstrapConsumer};

use std::sync::Arc;

use tracing::{error, info, instrument};

use iotforge_core::{InstanceId, naming};
use iotforge_events::TenantSnapshot;

use crate::coordination::{CoordinationError, SharedCoordinationStore, ensure_node};
use crate::templates::{TemplateError, TemplateProvider};

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Coordination(#[from] CoordinationError),

    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// What a bootstrap pass did for one tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Config node created, template copied, marker written.
    Provisioned { artifacts: usize },
    /// The tenant's config node was already there; nothing written.
    AlreadyProvisioned,
}

/// Performs the one-time, instance-wide provisioning of a tenant.
#[derive(Clone)]
pub struct TenantBootstrapper {
    instance: InstanceId,
    store: SharedCoordinationStore,
    templates: Arc<dyn TemplateProvider>,
}

impl TenantBootstrapper {
    pub fn new(
        instance: InstanceId,
        store: SharedCoordinationStore,
        templates: Arc<dyn TemplateProvider>,
    ) -> Self {
        Self {
            instance,
            store,
            templates,
        }
    }

    pub fn instance(&self) -> &InstanceId {
        &self.instance
    }

    /// Provision `tenant` unless its config node already exists.
    ///
    /// A failure after the config node was created leaves the tenant without
    /// its bootstrapped marker. A later pass then sees the config node and
    /// no-ops, so a partially copied template needs operator repair.
    #[instrument(skip(self, tenant), fields(tenant_id = %tenant.id(), template_id = %tenant.template_id()), err)]
    pub async fn bootstrap_tenant(&self, tenant: &TenantSnapshot) -> Result<BootstrapOutcome, BootstrapError> {
        let root = naming::tenants_root(&self.instance);
        if ensure_node(&*self.store, &root).await? {
            info!(path = %root, "tenants root created");
        }

        let config = naming::tenant_config(&self.instance, tenant.id());
        if self.store.exists(&config).await? {
            info!(path = %config, "tenant already provisioned; skipping");
            return Ok(BootstrapOutcome::AlreadyProvisioned);
        }

        self.store.create(&config, &[]).await?;
        info!(path = %config, "tenant config node created");

        let artifacts = self
            .templates
            .copy(tenant.template_id(), &config)
            .await
            .inspect_err(|e| error!(error = %e, "template copy failed; tenant left unbootstrapped"))?;

        let marker = naming::tenant_bootstrapped(&self.instance, tenant.id());
        self.store.create(&marker, &[]).await?;
        info!(path = %marker, artifacts, "tenant bootstrapped");

        Ok(BootstrapOutcome::Provisioned { artifacts })
    }
}
