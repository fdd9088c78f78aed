use std::convert::Infallible;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use iotforge_core::naming;
use iotforge_events::{EventBus, TenantChangeEvent, TenantChangeType, TenantSnapshot};

use crate::workers::{ConsumerWorker, SpawnError, WorkerHandle};

use super::lifecycle::TenantEngine;
use super::pipeline::{PipelineError, TenantEnginePipeline};

type ProvisionHandle = JoinHandle<Result<Arc<dyn TenantEngine>, PipelineError>>;

/// Drives the provisioning pipeline for every tenant this replica learns about.
///
/// Each replica listens on its own consumer group, so every replica of a
/// service sees every `ADDED` event and builds its own engine.
#[derive(Clone)]
pub struct TenantEngineManager {
    pipeline: TenantEnginePipeline,
    runtime: Handle,
    replica_id: String,
}

impl TenantEngineManager {
    /// Must be called from within a tokio runtime; pipelines run on it.
    pub fn new(pipeline: TenantEnginePipeline) -> Self {
        Self::with_runtime(pipeline, Handle::current())
    }

    pub fn with_runtime(pipeline: TenantEnginePipeline, runtime: Handle) -> Self {
        Self {
            pipeline,
            runtime,
            replica_id: Uuid::now_v7().to_string(),
        }
    }

    pub fn pipeline(&self) -> &TenantEnginePipeline {
        &self.pipeline
    }

    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }

    /// Run Initialize → Bootstrap → Start for `tenant` in the background.
    ///
    /// Returns `None` when the tenant is already pending or has an engine.
    pub fn provision(&self, tenant: TenantSnapshot) -> Option<ProvisionHandle> {
        let registry = self.pipeline.registry();
        if registry.is_pending(tenant.id()) || registry.contains(tenant.id()) {
            debug!(tenant_id = %tenant.id(), "tenant engine already pending or registered");
            return None;
        }

        let pipeline = self.pipeline.clone();
        Some(self.runtime.spawn(async move {
            let tenant_id = tenant.id().clone();
            let result = pipeline.run(tenant).await;
            match &result {
                Ok(_) => info!(tenant_id = %tenant_id, module_id = %pipeline.module(), "tenant engine ready"),
                Err(PipelineError::AlreadyPending(_)) => {}
                Err(e) => warn!(
                    tenant_id = %tenant_id,
                    module_id = %pipeline.module(),
                    error = %e,
                    "tenant engine provisioning failed"
                ),
            }
            result
        }))
    }

    /// `ADDED` starts provisioning; other changes are not acted on here.
    pub fn handle_event(&self, event: TenantChangeEvent) -> Option<ProvisionHandle> {
        match event.change_type() {
            TenantChangeType::Added => self.provision(event.into_tenant()),
            other => {
                debug!(tenant_id = %event.tenant().id(), change = %other, "tenant change ignored by engine manager");
                None
            }
        }
    }

    /// Subscribe this replica to tenant changes and consume on a named thread.
    pub fn spawn<B>(&self, bus: &B) -> Result<WorkerHandle, SpawnError>
    where
        B: EventBus<TenantChangeEvent> + ?Sized,
    {
        let instance = self.pipeline.instance();
        let topic = naming::tenant_change_topic(instance);
        let group = format!(
            "{}.{}",
            naming::tenant_engine_group(instance, self.pipeline.module()),
            self.replica_id
        );
        let consumer = format!("engines-{}", self.replica_id);

        let subscription = bus
            .subscribe_group(&topic, &group, &consumer)
            .map_err(|e| SpawnError::Subscribe(e.to_string()))?;
        info!(topic = %topic, group = %group, "tenant engine manager subscribed");

        let manager = self.clone();
        ConsumerWorker::spawn(consumer, subscription, move |event: TenantChangeEvent| {
            let _ = manager.handle_event(event);
            Ok::<(), Infallible>(())
        })
        .map_err(SpawnError::from)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use iotforge_core::{InstanceId, ModuleId, TenantId};

    use super::*;
    use crate::coordination::{CoordinationStore, InMemoryCoordinationStore};
    use crate::engine::lifecycle::LifecycleStatus;
    use crate::engine::pipeline::PipelineSettings;
    use crate::engine::registry::TenantEngineRegistry;
    use crate::engine::testing::{ScriptedEngine, SharedEngineFactory};
    use crate::workers::WorkerPool;

    fn acme() -> TenantSnapshot {
        TenantSnapshot::new(TenantId::new("acme").unwrap(), "Acme", "default")
    }

    async fn manager(engine: Arc<ScriptedEngine>) -> TenantEngineManager {
        let instance = InstanceId::new("i").unwrap();
        let store = Arc::new(InMemoryCoordinationStore::new());
        store
            .create_all(&naming::tenant_bootstrapped(&instance, acme().id()), b"")
            .await
            .unwrap();
        let pipeline = TenantEnginePipeline::new(
            instance,
            ModuleId::new("m").unwrap(),
            store,
            Arc::new(SharedEngineFactory(engine)),
            Arc::new(TenantEngineRegistry::new()),
            Arc::new(WorkerPool::new("engine", 2)),
            PipelineSettings::default(),
        );
        TenantEngineManager::new(pipeline)
    }

    #[tokio::test]
    async fn added_event_provisions_once() {
        let engine = Arc::new(ScriptedEngine::default());
        let manager = manager(engine.clone()).await;

        let handle = manager.handle_event(TenantChangeEvent::added(acme())).unwrap();
        handle.await.unwrap().unwrap();

        assert!(manager.handle_event(TenantChangeEvent::added(acme())).is_none());
        assert!(manager.handle_event(TenantChangeEvent::updated(acme())).is_none());
        assert_eq!(engine.initialize_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            manager.pipeline().registry().status(acme().id()),
            Some(LifecycleStatus::Started)
        );
    }
}
