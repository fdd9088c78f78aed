use std::convert::Infallible;
use std::sync::Arc;

use tracing::{debug, error, info};
use uuid::Uuid;

use iotforge_core::naming;
use iotforge_events::{EventBus, TenantChangeEvent, TenantChangeType};

use crate::workers::{ConsumerWorker, SpawnError, TaskHandle, WorkerHandle, WorkerPool};

use super::{BootstrapError, BootstrapOutcome, TenantBootstrapper};

/// Routes tenant change events to the bootstrap worker pool.
///
/// `Received → (ADDED ? Dispatch : Discard)`. Dispatched work is isolated per
/// tenant: its failure is logged and never reaches the consumer loop.
#[derive(Clone)]
pub struct BootstrapDispatcher {
    bootstrapper: TenantBootstrapper,
    pool: Arc<WorkerPool>,
}

impl BootstrapDispatcher {
    pub fn new(bootstrapper: TenantBootstrapper, pool: Arc<WorkerPool>) -> Self {
        Self { bootstrapper, pool }
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Hand an `ADDED` tenant to the pool; other event types are discarded.
    pub fn dispatch(
        &self,
        event: TenantChangeEvent,
    ) -> Option<TaskHandle<Result<BootstrapOutcome, BootstrapError>>> {
        let change = event.change_type();
        if change != TenantChangeType::Added {
            debug!(tenant_id = %event.tenant().id(), change = %change, "tenant change ignored by bootstrap");
            return None;
        }

        let tenant = event.into_tenant();
        info!(tenant_id = %tenant.id(), "tenant bootstrap dispatched");

        let bootstrapper = self.bootstrapper.clone();
        Some(self.pool.submit(async move {
            let result = bootstrapper.bootstrap_tenant(&tenant).await;
            if let Err(e) = &result {
                error!(tenant_id = %tenant.id(), error = %e, "tenant bootstrap failed");
            }
            result
        }))
    }
}

/// The instance-wide bootstrap consumer of one process.
#[derive(Debug)]
pub struct TenantBootstrapConsumer;

impl TenantBootstrapConsumer {
    /// Join the bootstrap consumer group and start consuming on a named thread.
    pub fn spawn<B>(bus: &B, dispatcher: BootstrapDispatcher) -> Result<WorkerHandle, SpawnError>
    where
        B: EventBus<TenantChangeEvent> + ?Sized,
    {
        let instance = dispatcher.bootstrapper.instance();
        let topic = naming::tenant_change_topic(instance);
        let group = naming::tenant_bootstrap_group(instance);
        let consumer = format!("bootstrap-{}", Uuid::now_v7());

        let subscription = bus
            .subscribe_group(&topic, &group, &consumer)
            .map_err(|e| SpawnError::Subscribe(e.to_string()))?;
        info!(topic = %topic, group = %group, consumer = %consumer, "tenant bootstrap consumer joined");

        ConsumerWorker::spawn(consumer, subscription, move |event: TenantChangeEvent| {
            // The handle is dropped: completion and failure are logged by the job.
            let _ = dispatcher.dispatch(event);
            Ok::<(), Infallible>(())
        })
        .map_err(SpawnError::from)
    }
}

#[cfg(test)]
mod tests {
    use iotforge_core::{InstanceId, TenantId};
    use iotforge_events::TenantSnapshot;

    use super::*;
    use crate::coordination::InMemoryCoordinationStore;
    use crate::templates::InMemoryTemplateProvider;

    fn dispatcher(store: Arc<InMemoryCoordinationStore>) -> BootstrapDispatcher {
        let templates = Arc::new(InMemoryTemplateProvider::with_builtin_templates(store.clone()));
        let bootstrapper = TenantBootstrapper::new(InstanceId::new("i").unwrap(), store, templates);
        BootstrapDispatcher::new(bootstrapper, Arc::new(WorkerPool::new("bootstrap", 3)))
    }

    fn acme() -> TenantSnapshot {
        TenantSnapshot::new(TenantId::new("acme").unwrap(), "Acme", "default")
    }

    #[tokio::test]
    async fn only_added_events_are_dispatched() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let dispatcher = dispatcher(store.clone());

        assert!(dispatcher.dispatch(TenantChangeEvent::updated(acme())).is_none());
        assert!(dispatcher.dispatch(TenantChangeEvent::deleted(acme())).is_none());
        assert_eq!(store.write_count(), 0);

        let handle = dispatcher.dispatch(TenantChangeEvent::added(acme())).unwrap();
        assert!(matches!(
            handle.await.unwrap(),
            Ok(BootstrapOutcome::Provisioned { artifacts: 4 })
        ));
    }

    #[tokio::test]
    async fn failing_tenant_does_not_affect_others() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let dispatcher = dispatcher(store);

        let broken = TenantSnapshot::new(TenantId::new("broken").unwrap(), "Broken", "missing");
        let bad = dispatcher.dispatch(TenantChangeEvent::added(broken)).unwrap();
        let good = dispatcher.dispatch(TenantChangeEvent::added(acme())).unwrap();

        assert!(bad.await.unwrap().is_err());
        assert!(good.await.unwrap().is_ok());
    }
}
