//! Scripted engine for pipeline tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use iotforge_events::TenantSnapshot;

use super::lifecycle::{
    BootstrapContext, EngineError, InitializeOutcome, StartOutcome, TenantEngine,
    TenantEngineFactory,
};

/// Engine whose routines succeed or fail as configured and count their calls.
#[derive(Debug)]
pub(crate) struct ScriptedEngine {
    pub initialize: InitializeOutcome,
    /// Fail the first `failing_seeds` seed attempts.
    pub failing_seeds: usize,
    pub seed_delay: Duration,
    pub start: StartOutcome,
    pub initialize_calls: AtomicUsize,
    pub seed_attempts: AtomicUsize,
    pub seeds: AtomicUsize,
    pub start_calls: AtomicUsize,
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self {
            initialize: InitializeOutcome::Initialized,
            failing_seeds: 0,
            seed_delay: Duration::ZERO,
            start: StartOutcome::Started,
            initialize_calls: AtomicUsize::new(0),
            seed_attempts: AtomicUsize::new(0),
            seeds: AtomicUsize::new(0),
            start_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TenantEngine for ScriptedEngine {
    async fn initialize(&self) -> InitializeOutcome {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        self.initialize.clone()
    }

    async fn bootstrap_tenant(&self, _context: &BootstrapContext) -> Result<(), EngineError> {
        let attempt = self.seed_attempts.fetch_add(1, Ordering::SeqCst);
        if !self.seed_delay.is_zero() {
            tokio::time::sleep(self.seed_delay).await;
        }
        if attempt < self.failing_seeds {
            return Err(EngineError::new("seed failed"));
        }
        self.seeds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn start(&self) -> StartOutcome {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        self.start.clone()
    }
}

/// Hands out the same engine for every tenant.
pub(crate) struct SharedEngineFactory(pub Arc<ScriptedEngine>);

impl TenantEngineFactory for SharedEngineFactory {
    fn create(&self, _tenant: &TenantSnapshot) -> Arc<dyn TenantEngine> {
        self.0.clone()
    }
}
