//! Infrastructure wiring for one node.
//!
//! ```text
//! TenantChangeNotifier ──publish──▶ tenant change topic
//!                                    ├─▶ TenantBootstrapConsumer ─▶ bootstrap WorkerPool
//!                                    └─▶ TenantEngineManager     ─▶ engine WorkerPool
//! ```

use std::sync::{Arc, Mutex};

use tracing::info;

use iotforge_events::{InMemoryEventBus, SharedEventBus, TenantChangeEvent, shared};
use iotforge_infra::bootstrap::{BootstrapDispatcher, TenantBootstrapConsumer, TenantBootstrapper};
use iotforge_infra::config::{ConfigError, PlatformConfig};
use iotforge_infra::coordination::{CoordinationError, InMemoryCoordinationStore, SharedCoordinationStore};
use iotforge_infra::engine::{NoopEngineFactory, TenantEngineManager, TenantEnginePipeline, TenantEngineRegistry};
use iotforge_infra::templates::{FilesystemTemplateProvider, InMemoryTemplateProvider, TemplateProvider};
use iotforge_infra::tenants::{InMemoryTenantRepository, TenantChangeNotifier, TenantRepository, TenantStoreError};
use iotforge_infra::workers::{SpawnError, WorkerHandle, WorkerPool};

pub type Notifier = TenantChangeNotifier<Arc<dyn TenantRepository>, SharedEventBus<TenantChangeEvent>>;

#[derive(Debug, thiserror::Error)]
pub enum ServicesError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Coordination(#[from] CoordinationError),

    #[error("event bus unavailable: {0}")]
    Bus(String),

    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error(transparent)]
    TenantStore(#[from] TenantStoreError),
}

/// Everything the HTTP handlers and the background consumers share.
pub struct AppServices {
    pub config: PlatformConfig,
    pub store: SharedCoordinationStore,
    pub bus: SharedEventBus<TenantChangeEvent>,
    pub notifier: Notifier,
    pub manager: TenantEngineManager,
    pub registry: Arc<TenantEngineRegistry>,
    bootstrap_pool: Arc<WorkerPool>,
    engine_pool: Arc<WorkerPool>,
    workers: Mutex<Vec<WorkerHandle>>,
}

impl AppServices {
    /// Stop the consumers, then drain both pools.
    pub async fn shutdown(&self) {
        let workers = match self.workers.lock() {
            Ok(mut w) => std::mem::take(&mut *w),
            Err(_) => Vec::new(),
        };
        let _ = tokio::task::spawn_blocking(move || {
            workers.into_iter().for_each(WorkerHandle::shutdown);
        })
        .await;
        self.bootstrap_pool.shutdown().await;
        self.engine_pool.shutdown().await;
        info!("services stopped");
    }
}

/// Wire backends, start the bootstrap consumer and the engine manager, and
/// queue provisioning for tenants that already exist.
pub async fn build_services(config: PlatformConfig) -> Result<AppServices, ServicesError> {
    config.validate()?;
    let instance = config.instance()?;
    let module = config.module()?;

    let (store, bus) = backends(&config).await?;

    let templates: Arc<dyn TemplateProvider> = match &config.template_root {
        Some(root) => {
            info!(root = %root.display(), "using filesystem templates");
            Arc::new(FilesystemTemplateProvider::new(store.clone(), root.clone()))
        }
        None => Arc::new(InMemoryTemplateProvider::with_builtin_templates(store.clone())),
    };

    let repository: Arc<dyn TenantRepository> = Arc::new(InMemoryTenantRepository::new());
    let notifier = TenantChangeNotifier::new(&instance, repository.clone(), bus.clone());

    let bootstrap_pool = Arc::new(WorkerPool::new("tenant-bootstrap", config.bootstrap_workers));
    let bootstrapper = TenantBootstrapper::new(instance.clone(), store.clone(), templates);
    let consumer = TenantBootstrapConsumer::spawn(
        &bus,
        BootstrapDispatcher::new(bootstrapper, bootstrap_pool.clone()),
    )?;

    let engine_pool = Arc::new(WorkerPool::new("tenant-engines", config.engine_workers));
    let registry = Arc::new(TenantEngineRegistry::new());
    let pipeline = TenantEnginePipeline::new(
        instance,
        module,
        store.clone(),
        Arc::new(NoopEngineFactory),
        registry.clone(),
        engine_pool.clone(),
        config.pipeline_settings(),
    );
    let manager = TenantEngineManager::new(pipeline);
    let engine_consumer = manager.spawn(&bus)?;

    let existing = repository.list()?;
    info!(tenants = existing.len(), "provisioning engines for existing tenants");
    for tenant in existing {
        let _ = manager.provision(tenant);
    }

    Ok(AppServices {
        config,
        store,
        bus,
        notifier,
        manager,
        registry,
        bootstrap_pool,
        engine_pool,
        workers: Mutex::new(vec![consumer, engine_consumer]),
    })
}

async fn backends(
    config: &PlatformConfig,
) -> Result<(SharedCoordinationStore, SharedEventBus<TenantChangeEvent>), ServicesError> {
    if let Some(url) = &config.redis_url {
        #[cfg(feature = "redis")]
        {
            use iotforge_infra::coordination::RedisCoordinationStore;
            use iotforge_infra::event_bus::RedisStreamsEventBus;

            let store = RedisCoordinationStore::connect(url).await?;
            let bus = RedisStreamsEventBus::new(url).map_err(|e| ServicesError::Bus(e.to_string()))?;
            info!("using Redis coordination store and event bus");
            return Ok((Arc::new(store), shared(bus)));
        }
        #[cfg(not(feature = "redis"))]
        {
            tracing::warn!(url = %url, "REDIS_URL set but redis feature not enabled, falling back to in-memory");
        }
    }

    let store: SharedCoordinationStore = Arc::new(InMemoryCoordinationStore::new());
    let bus = shared(InMemoryEventBus::<TenantChangeEvent>::with_partitions(config.bus_partitions));
    Ok((store, bus))
}
