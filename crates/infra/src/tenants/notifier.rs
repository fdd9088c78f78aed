//! Tenant change notification (write path → event bus).
//!
//! The notifier wraps a [`TenantRepository`] and publishes one
//! [`TenantChangeEvent`] per successful mutation:
//!
//! ```text
//! create/update/delete
//!   ↓
//! 1. Write to the tenant repository
//!   ↓
//! 2. Publish ADDED / UPDATED / DELETED on the instance's tenant change topic
//! ```
//!
//! Publication happens only after the write succeeded. A publish failure is
//! returned to the caller as [`NotifyError::Publish`]: the mutation counts as
//! failed even though the write is not rolled back, so nothing is silently lost
//! at this boundary.

use tracing::{info, instrument, warn};

use iotforge_core::{InstanceId, TenantId, naming};
use iotforge_events::{EventBus, TenantChangeEvent, TenantChangeType, TenantSnapshot};

use super::repository::{TenantRepository, TenantStoreError};

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error(transparent)]
    Store(#[from] TenantStoreError),

    /// The write succeeded but the change event could not be published.
    #[error("tenant {tenant_id} {change} written but not published: {message}")]
    Publish {
        tenant_id: TenantId,
        change: TenantChangeType,
        message: String,
    },
}

/// Tenant-management facade that publishes a change event after every write.
#[derive(Debug)]
pub struct TenantChangeNotifier<R, B> {
    repository: R,
    bus: B,
    topic: String,
}

impl<R, B> TenantChangeNotifier<R, B> {
    pub fn new(instance: &InstanceId, repository: R, bus: B) -> Self {
        Self {
            repository,
            bus,
            topic: naming::tenant_change_topic(instance),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }
}

impl<R, B> TenantChangeNotifier<R, B>
where
    R: TenantRepository,
    B: EventBus<TenantChangeEvent>,
{
    pub fn create_tenant(&self, tenant: TenantSnapshot) -> Result<TenantSnapshot, NotifyError> {
        let created = self.repository.create(tenant)?;
        self.publish(TenantChangeEvent::added(created.clone()))?;
        Ok(created)
    }

    pub fn update_tenant(&self, tenant: TenantSnapshot) -> Result<TenantSnapshot, NotifyError> {
        let updated = self.repository.update(tenant)?;
        self.publish(TenantChangeEvent::updated(updated.clone()))?;
        Ok(updated)
    }

    pub fn delete_tenant(&self, tenant_id: &TenantId) -> Result<TenantSnapshot, NotifyError> {
        let deleted = self.repository.delete(tenant_id)?;
        self.publish(TenantChangeEvent::deleted(deleted.clone()))?;
        Ok(deleted)
    }

    pub fn get_tenant(&self, tenant_id: &TenantId) -> Result<Option<TenantSnapshot>, NotifyError> {
        Ok(self.repository.get(tenant_id)?)
    }

    pub fn list_tenants(&self) -> Result<Vec<TenantSnapshot>, NotifyError> {
        Ok(self.repository.list()?)
    }

    #[instrument(
        skip(self, event),
        fields(
            topic = %self.topic,
            tenant_id = %event.tenant().id(),
            change = %event.change_type()
        ),
        err
    )]
    fn publish(&self, event: TenantChangeEvent) -> Result<(), NotifyError> {
        let tenant_id = event.tenant().id().clone();
        let change = event.change_type();

        match self.bus.publish(&self.topic, event) {
            Ok(()) => {
                info!("tenant change published");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "tenant change publish failed after write");
                Err(NotifyError::Publish {
                    tenant_id,
                    change,
                    message: e.to_string(),
                })
            }
        }
    }
}
