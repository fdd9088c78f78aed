use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use iotforge_core::{InstanceId, ModuleId};
use iotforge_events::TenantSnapshot;

/// Lifecycle status of one service's engine for one tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleStatus {
    Created,
    Initializing,
    Initialized,
    InitializationError,
    Bootstrapping,
    Bootstrapped,
    BootstrapError,
    Starting,
    Started,
    LifecycleError,
}

impl LifecycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Initializing => "INITIALIZING",
            Self::Initialized => "INITIALIZED",
            Self::InitializationError => "INITIALIZATION_ERROR",
            Self::Bootstrapping => "BOOTSTRAPPING",
            Self::Bootstrapped => "BOOTSTRAPPED",
            Self::BootstrapError => "BOOTSTRAP_ERROR",
            Self::Starting => "STARTING",
            Self::Started => "STARTED",
            Self::LifecycleError => "LIFECYCLE_ERROR",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::InitializationError | Self::BootstrapError | Self::LifecycleError
        )
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an engine's local initialization routine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitializeOutcome {
    Initialized,
    InitializationError(String),
}

/// Result of an engine's start routine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    LifecycleError(String),
}

/// Failure raised by an engine's seed routine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct EngineError(pub String);

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// What an engine sees when it seeds its tenant.
#[derive(Debug, Clone)]
pub struct BootstrapContext {
    pub instance: InstanceId,
    pub module: ModuleId,
    pub tenant: TenantSnapshot,
    /// Coordination path of the tenant's copied template artifacts.
    pub config_path: String,
}

/// Service-specific runtime state for one tenant.
///
/// Initialize and start report failure through their outcome instead of an
/// error; the pipeline turns a non-success outcome into a stage failure.
#[async_trait]
pub trait TenantEngine: Send + Sync {
    async fn initialize(&self) -> InitializeOutcome;

    /// Module-local seeding. Runs under the module lock, at most once to
    /// completion per module and tenant, but may be re-run after a crash
    /// mid-seed, so it must be idempotent.
    async fn bootstrap_tenant(&self, context: &BootstrapContext) -> Result<(), EngineError>;

    async fn start(&self) -> StartOutcome;
}

/// Builds a service's engine for a tenant.
pub trait TenantEngineFactory: Send + Sync {
    fn create(&self, tenant: &TenantSnapshot) -> Arc<dyn TenantEngine>;
}

impl<F> TenantEngineFactory for F
where
    F: Fn(&TenantSnapshot) -> Arc<dyn TenantEngine> + Send + Sync,
{
    fn create(&self, tenant: &TenantSnapshot) -> Arc<dyn TenantEngine> {
        self(tenant)
    }
}

/// Engine with no service logic; every routine succeeds.
///
/// Used by nodes whose module has no tenant-local state of its own.
#[derive(Debug, Default)]
pub struct NoopTenantEngine;

#[async_trait]
impl TenantEngine for NoopTenantEngine {
    async fn initialize(&self) -> InitializeOutcome {
        InitializeOutcome::Initialized
    }

    async fn bootstrap_tenant(&self, _context: &BootstrapContext) -> Result<(), EngineError> {
        Ok(())
    }

    async fn start(&self) -> StartOutcome {
        StartOutcome::Started
    }
}

/// Factory handing out [`NoopTenantEngine`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEngineFactory;

impl TenantEngineFactory for NoopEngineFactory {
    fn create(&self, _tenant: &TenantSnapshot) -> Arc<dyn TenantEngine> {
        Arc::new(NoopTenantEngine)
    }
}
