//! Tenant engine provisioning pipeline: Initialize → Bootstrap → Start.
//!
//! ```text
//! Initialize   register engine (CREATED), poll for the instance-wide
//!              bootstrapped marker until the deadline, run initialize()
//! Bootstrap    take the module lock, seed unless the module marker exists,
//!              write the marker, always release the lock
//! Start        run start()
//! ```
//!
//! Each stage is submitted to the service's worker pool on its own. Callers
//! sequence them by awaiting one stage before submitting the next, which is
//! what [`TenantEnginePipeline::run`] does.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use iotforge_core::{InstanceId, ModuleId, TenantId, naming};
use iotforge_events::TenantSnapshot;

use crate::coordination::{CoordinationError, SharedCoordinationStore, ensure_node};
use crate::workers::{PoolError, TaskHandle, WorkerPool};

use super::lifecycle::{
    BootstrapContext, InitializeOutcome, LifecycleStatus, StartOutcome, TenantEngine,
    TenantEngineFactory,
};
use super::registry::TenantEngineRegistry;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_DEADLINE: Duration = Duration::from_millis(5000);

/// Timing of the wait for instance-wide provisioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub poll_interval: Duration,
    pub deadline: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            deadline: DEFAULT_DEADLINE,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The instance-wide bootstrapped marker never appeared.
    #[error("tenant {tenant_id} not provisioned in time (waited {waited:?})")]
    ProvisioningTimeout { tenant_id: TenantId, waited: Duration },

    #[error("tenant {tenant_id} initialization failed: {message}")]
    Initialization { tenant_id: TenantId, message: String },

    #[error("tenant {tenant_id} bootstrap failed: {message}")]
    Bootstrap { tenant_id: TenantId, message: String },

    #[error("tenant {tenant_id} start failed: {message}")]
    Start { tenant_id: TenantId, message: String },

    #[error("no tenant engine registered for {0}")]
    EngineNotFound(TenantId),

    #[error("tenant {0} is already being provisioned")]
    AlreadyPending(TenantId),

    #[error("tenant {tenant_id} engine is {actual}, expected {expected}")]
    InvalidState {
        tenant_id: TenantId,
        expected: LifecycleStatus,
        actual: LifecycleStatus,
    },

    #[error(transparent)]
    Coordination(#[from] CoordinationError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// What the Bootstrap stage did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOutcome {
    /// This replica ran the seed routine and wrote the module marker.
    Seeded,
    /// The module marker was already there.
    AlreadySeeded,
}

struct PipelineInner {
    instance: InstanceId,
    module: ModuleId,
    store: SharedCoordinationStore,
    factory: Arc<dyn TenantEngineFactory>,
    registry: Arc<TenantEngineRegistry>,
    pool: Arc<WorkerPool>,
    settings: PipelineSettings,
}

/// Per-service provisioning pipeline. Cheap to clone.
#[derive(Clone)]
pub struct TenantEnginePipeline {
    inner: Arc<PipelineInner>,
}

impl TenantEnginePipeline {
    pub fn new(
        instance: InstanceId,
        module: ModuleId,
        store: SharedCoordinationStore,
        factory: Arc<dyn TenantEngineFactory>,
        registry: Arc<TenantEngineRegistry>,
        pool: Arc<WorkerPool>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                instance,
                module,
                store,
                factory,
                registry,
                pool,
                settings,
            }),
        }
    }

    pub fn instance(&self) -> &InstanceId {
        &self.inner.instance
    }

    pub fn module(&self) -> &ModuleId {
        &self.inner.module
    }

    pub fn registry(&self) -> &Arc<TenantEngineRegistry> {
        &self.inner.registry
    }

    pub fn settings(&self) -> PipelineSettings {
        self.inner.settings
    }

    /// Stage A: register the tenant's engine and initialize it once the
    /// tenant is provisioned instance-wide.
    pub fn initialize(
        &self,
        tenant: TenantSnapshot,
    ) -> TaskHandle<Result<Arc<dyn TenantEngine>, PipelineError>> {
        let inner = self.inner.clone();
        self.inner.pool.submit(async move { inner.initialize(tenant).await })
    }

    /// Stage B: module-local seeding under the module lock.
    pub fn bootstrap(&self, tenant_id: TenantId) -> TaskHandle<Result<SeedOutcome, PipelineError>> {
        let inner = self.inner.clone();
        self.inner.pool.submit(async move { inner.bootstrap(tenant_id).await })
    }

    /// Stage C: start serving the tenant.
    pub fn start(
        &self,
        tenant_id: TenantId,
    ) -> TaskHandle<Result<Arc<dyn TenantEngine>, PipelineError>> {
        let inner = self.inner.clone();
        self.inner.pool.submit(async move { inner.start(tenant_id).await })
    }

    /// All three stages in order; each gates the next.
    pub async fn run(&self, tenant: TenantSnapshot) -> Result<Arc<dyn TenantEngine>, PipelineError> {
        let tenant_id = tenant.id().clone();
        let result = self.sequence(tenant).await;

        if let Err(PipelineError::Pool(e)) = &result {
            // A panicked stage never reached its own failure handling.
            self.inner
                .registry
                .fail(&tenant_id, LifecycleStatus::LifecycleError, e.to_string());
        }
        result
    }

    async fn sequence(&self, tenant: TenantSnapshot) -> Result<Arc<dyn TenantEngine>, PipelineError> {
        let tenant_id = tenant.id().clone();
        self.initialize(tenant).await??;
        self.bootstrap(tenant_id.clone()).await??;
        self.start(tenant_id).await?
    }
}

impl PipelineInner {
    #[instrument(skip(self, tenant), fields(tenant_id = %tenant.id(), module_id = %self.module))]
    async fn initialize(&self, tenant: TenantSnapshot) -> Result<Arc<dyn TenantEngine>, PipelineError> {
        let tenant_id = tenant.id().clone();
        let engine = self.factory.create(&tenant);
        if !self.registry.begin(tenant, engine.clone()) {
            debug!("tenant engine already pending or registered");
            return Err(PipelineError::AlreadyPending(tenant_id));
        }

        if let Err(e) = self.wait_for_provisioning(&tenant_id).await {
            error!(error = %e, "tenant engine not initialized");
            self.registry
                .fail(&tenant_id, LifecycleStatus::InitializationError, e.to_string());
            return Err(e);
        }

        self.registry.set_status(&tenant_id, LifecycleStatus::Initializing);
        match engine.initialize().await {
            InitializeOutcome::Initialized => {
                self.registry.set_status(&tenant_id, LifecycleStatus::Initialized);
                info!("tenant engine initialized");
                Ok(engine)
            }
            InitializeOutcome::InitializationError(message) => {
                error!(error = %message, "tenant engine initialization failed");
                self.registry
                    .fail(&tenant_id, LifecycleStatus::InitializationError, message.clone());
                Err(PipelineError::Initialization { tenant_id, message })
            }
        }
    }

    /// Poll for the instance-wide bootstrapped marker until the deadline.
    async fn wait_for_provisioning(&self, tenant_id: &TenantId) -> Result<(), PipelineError> {
        let marker = naming::tenant_bootstrapped(&self.instance, tenant_id);
        let started = Instant::now();
        let deadline = started + self.settings.deadline;

        loop {
            if self.store.exists(&marker).await? {
                debug!(path = %marker, waited = ?started.elapsed(), "tenant provisioned");
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(PipelineError::ProvisioningTimeout {
                    tenant_id: tenant_id.clone(),
                    waited: now - started,
                });
            }
            tokio::time::sleep(self.settings.poll_interval.min(deadline - now)).await;
        }
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, module_id = %self.module))]
    async fn bootstrap(&self, tenant_id: TenantId) -> Result<SeedOutcome, PipelineError> {
        let engine = self.ready_engine(&tenant_id, LifecycleStatus::Initialized)?;
        let tenant = self
            .registry
            .tenant(&tenant_id)
            .ok_or_else(|| PipelineError::EngineNotFound(tenant_id.clone()))?;
        self.registry.set_status(&tenant_id, LifecycleStatus::Bootstrapping);

        let lock_path = naming::module_lock(&self.instance, &self.module, &tenant_id);
        let lease = match self.store.acquire_lock(&lock_path).await {
            Ok(lease) => lease,
            Err(e) => {
                error!(path = %lock_path, error = %e, "module lock not acquired");
                self.registry
                    .fail(&tenant_id, LifecycleStatus::BootstrapError, e.to_string());
                return Err(e.into());
            }
        };
        debug!(path = %lock_path, "module lock acquired");

        let result = self.seed_locked(engine.as_ref(), tenant).await;

        if let Err(e) = lease.release().await {
            warn!(path = %lock_path, error = %e, "module lock release failed");
        } else {
            debug!(path = %lock_path, "module lock released");
        }

        match result {
            Ok(outcome) => {
                self.registry.set_status(&tenant_id, LifecycleStatus::Bootstrapped);
                info!(outcome = ?outcome, "tenant engine bootstrapped");
                Ok(outcome)
            }
            Err(e) => {
                error!(error = %e, "tenant engine bootstrap failed");
                self.registry
                    .fail(&tenant_id, LifecycleStatus::BootstrapError, e.to_string());
                Err(e)
            }
        }
    }

    /// Check-then-seed; the caller holds the module lock.
    async fn seed_locked(
        &self,
        engine: &dyn TenantEngine,
        tenant: TenantSnapshot,
    ) -> Result<SeedOutcome, PipelineError> {
        let marker = naming::module_bootstrapped(&self.instance, &self.module, tenant.id());
        if self.store.exists(&marker).await? {
            info!(path = %marker, "module already seeded for tenant");
            return Ok(SeedOutcome::AlreadySeeded);
        }

        let context = BootstrapContext {
            instance: self.instance.clone(),
            module: self.module.clone(),
            config_path: naming::tenant_config(&self.instance, tenant.id()),
            tenant,
        };
        engine
            .bootstrap_tenant(&context)
            .await
            .map_err(|e| PipelineError::Bootstrap {
                tenant_id: context.tenant.id().clone(),
                message: e.to_string(),
            })?;

        ensure_node(&*self.store, &marker).await?;
        info!(path = %marker, "module seeded for tenant");
        Ok(SeedOutcome::Seeded)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, module_id = %self.module))]
    async fn start(&self, tenant_id: TenantId) -> Result<Arc<dyn TenantEngine>, PipelineError> {
        let engine = self.ready_engine(&tenant_id, LifecycleStatus::Bootstrapped)?;
        self.registry.set_status(&tenant_id, LifecycleStatus::Starting);

        match engine.start().await {
            StartOutcome::Started => {
                self.registry.set_status(&tenant_id, LifecycleStatus::Started);
                self.registry.complete(&tenant_id);
                info!("tenant engine started");
                Ok(engine)
            }
            StartOutcome::LifecycleError(message) => {
                error!(error = %message, "tenant engine start failed");
                self.registry
                    .fail(&tenant_id, LifecycleStatus::LifecycleError, message.clone());
                Err(PipelineError::Start { tenant_id, message })
            }
        }
    }

    /// The registered engine, provided the previous stage left it in `expected`.
    fn ready_engine(
        &self,
        tenant_id: &TenantId,
        expected: LifecycleStatus,
    ) -> Result<Arc<dyn TenantEngine>, PipelineError> {
        let (Some(engine), Some(actual)) =
            (self.registry.engine(tenant_id), self.registry.status(tenant_id))
        else {
            return Err(PipelineError::EngineNotFound(tenant_id.clone()));
        };
        if actual != expected {
            return Err(PipelineError::InvalidState {
                tenant_id: tenant_id.clone(),
                expected,
                actual,
            });
        }
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::coordination::{CoordinationStore, InMemoryCoordinationStore};
    use crate::engine::testing::{ScriptedEngine, SharedEngineFactory};

    fn instance() -> InstanceId {
        InstanceId::new("i").unwrap()
    }

    fn module() -> ModuleId {
        ModuleId::new("device-management").unwrap()
    }

    fn acme() -> TenantSnapshot {
        TenantSnapshot::new(TenantId::new("acme").unwrap(), "Acme", "default")
    }

    fn pipeline(store: Arc<InMemoryCoordinationStore>, engine: Arc<ScriptedEngine>) -> TenantEnginePipeline {
        TenantEnginePipeline::new(
            instance(),
            module(),
            store,
            Arc::new(SharedEngineFactory(engine)),
            Arc::new(TenantEngineRegistry::new()),
            Arc::new(WorkerPool::new("engine", 4)),
            PipelineSettings::default(),
        )
    }

    async fn provisioned_store() -> Arc<InMemoryCoordinationStore> {
        let store = Arc::new(InMemoryCoordinationStore::new());
        store
            .create_all(&naming::tenant_bootstrapped(&instance(), acme().id()), b"")
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn runs_all_stages_once_provisioned() {
        let store = provisioned_store().await;
        let engine = Arc::new(ScriptedEngine::default());
        let pipeline = pipeline(store.clone(), engine.clone());

        pipeline.run(acme()).await.unwrap();

        let registry = pipeline.registry();
        assert_eq!(registry.status(acme().id()), Some(LifecycleStatus::Started));
        assert!(!registry.is_pending(acme().id()));
        assert_eq!(engine.seeds.load(Ordering::SeqCst), 1);
        assert!(
            store
                .exists(&naming::module_bootstrapped(&instance(), &module(), acme().id()))
                .await
                .unwrap()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn initialize_times_out_without_marker() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let engine = Arc::new(ScriptedEngine::default());
        let pipeline = pipeline(store, engine.clone());
        let started = Instant::now();

        let result = pipeline.initialize(acme()).await.unwrap();

        match result {
            Err(PipelineError::ProvisioningTimeout { waited, .. }) => {
                assert_eq!(waited, DEFAULT_DEADLINE);
            }
            other => panic!("expected timeout, got {:?}", other.map(|_| ())),
        }
        let elapsed = started.elapsed();
        assert!(elapsed >= DEFAULT_DEADLINE && elapsed <= DEFAULT_DEADLINE + DEFAULT_POLL_INTERVAL);
        assert_eq!(engine.initialize_calls.load(Ordering::SeqCst), 0);
        assert!(!pipeline.registry().is_pending(acme().id()));
        assert!(!pipeline.registry().contains(acme().id()));
    }

    #[tokio::test(start_paused = true)]
    async fn initialize_proceeds_when_marker_appears_mid_wait() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let pipeline = pipeline(store.clone(), Arc::new(ScriptedEngine::default()));

        let handle = pipeline.initialize(acme());
        tokio::time::sleep(Duration::from_millis(1200)).await;
        store
            .create_all(&naming::tenant_bootstrapped(&instance(), acme().id()), b"")
            .await
            .unwrap();

        handle.await.unwrap().unwrap();
        assert_eq!(
            pipeline.registry().status(acme().id()),
            Some(LifecycleStatus::Initialized)
        );
    }

    #[tokio::test]
    async fn concurrent_replicas_seed_exactly_once() {
        let store = provisioned_store().await;
        let engine = Arc::new(ScriptedEngine {
            seed_delay: Duration::from_millis(20),
            ..ScriptedEngine::default()
        });
        let replicas: Vec<_> = (0..3).map(|_| pipeline(store.clone(), engine.clone())).collect();

        for replica in &replicas {
            replica.initialize(acme()).await.unwrap().unwrap();
        }
        let handles: Vec<_> = replicas.iter().map(|r| r.bootstrap(acme().id().clone())).collect();
        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(engine.seeds.load(Ordering::SeqCst), 1);
        assert_eq!(outcomes.iter().filter(|o| **o == SeedOutcome::Seeded).count(), 1);
        assert_eq!(outcomes.iter().filter(|o| **o == SeedOutcome::AlreadySeeded).count(), 2);
        assert_eq!(store.lock_acquisitions(), 3);
        assert!(!store.is_locked(&naming::module_lock(&instance(), &module(), acme().id())));
    }

    #[tokio::test]
    async fn failed_seed_releases_lock_for_next_replica() {
        let store = provisioned_store().await;
        let engine = Arc::new(ScriptedEngine {
            failing_seeds: 1,
            ..ScriptedEngine::default()
        });
        let first = pipeline(store.clone(), engine.clone());
        let second = pipeline(store.clone(), engine.clone());
        first.initialize(acme()).await.unwrap().unwrap();
        second.initialize(acme()).await.unwrap().unwrap();

        let err = first.bootstrap(acme().id().clone()).await.unwrap().unwrap_err();
        assert!(matches!(err, PipelineError::Bootstrap { .. }));
        assert!(!store.is_locked(&naming::module_lock(&instance(), &module(), acme().id())));
        assert!(!first.registry().contains(acme().id()));

        let outcome = second.bootstrap(acme().id().clone()).await.unwrap().unwrap();
        assert_eq!(outcome, SeedOutcome::Seeded);
        assert_eq!(engine.seeds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn start_is_gated_on_earlier_stages() {
        let store = provisioned_store().await;
        let broken_init = Arc::new(ScriptedEngine {
            initialize: InitializeOutcome::InitializationError("schema missing".into()),
            ..ScriptedEngine::default()
        });
        let p = pipeline(store.clone(), broken_init.clone());

        assert!(matches!(
            p.run(acme()).await,
            Err(PipelineError::Initialization { .. })
        ));
        assert!(matches!(
            p.start(acme().id().clone()).await.unwrap(),
            Err(PipelineError::EngineNotFound(_))
        ));
        assert_eq!(broken_init.start_calls.load(Ordering::SeqCst), 0);

        let broken_seed = Arc::new(ScriptedEngine {
            failing_seeds: usize::MAX,
            ..ScriptedEngine::default()
        });
        let p = pipeline(store, broken_seed.clone());
        assert!(matches!(p.run(acme()).await, Err(PipelineError::Bootstrap { .. })));
        assert_eq!(broken_seed.start_calls.load(Ordering::SeqCst), 0);
        assert_ne!(p.registry().status(acme().id()), Some(LifecycleStatus::Started));
    }

    #[tokio::test]
    async fn start_before_bootstrap_is_rejected() {
        let store = provisioned_store().await;
        let p = pipeline(store, Arc::new(ScriptedEngine::default()));
        p.initialize(acme()).await.unwrap().unwrap();

        assert!(matches!(
            p.start(acme().id().clone()).await.unwrap(),
            Err(PipelineError::InvalidState {
                expected: LifecycleStatus::Bootstrapped,
                actual: LifecycleStatus::Initialized,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn start_failure_is_surfaced() {
        let store = provisioned_store().await;
        let engine = Arc::new(ScriptedEngine {
            start: StartOutcome::LifecycleError("port in use".into()),
            ..ScriptedEngine::default()
        });
        let p = pipeline(store, engine);

        match p.run(acme()).await {
            Err(PipelineError::Start { message, .. }) => assert_eq!(message, "port in use"),
            other => panic!("expected start failure, got {:?}", other.map(|_| ())),
        }
        assert!(!p.registry().contains(acme().id()));
    }

    #[tokio::test]
    async fn second_initialize_while_pending_is_refused() {
        let store = provisioned_store().await;
        let p = pipeline(store, Arc::new(ScriptedEngine::default()));
        p.initialize(acme()).await.unwrap().unwrap();

        assert!(matches!(
            p.initialize(acme()).await.unwrap(),
            Err(PipelineError::AlreadyPending(_))
        ));
        // The refused attempt must not disturb the first one.
        assert_eq!(p.registry().status(acme().id()), Some(LifecycleStatus::Initialized));
    }
}
