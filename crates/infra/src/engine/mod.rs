//! Per-service tenant engines and their provisioning pipeline.
//!
//! Every replica of every tenant-aware service runs the pipeline for every
//! tenant. The instance-wide wait is a poll on a marker written by
//! [`crate::bootstrap`]; module-local seeding is serialized across replicas of
//! one service by the module lock.

pub mod lifecycle;
pub mod manager;
pub mod pipeline;
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;

pub use lifecycle::{
    BootstrapContext, EngineError, InitializeOutcome, LifecycleStatus, NoopEngineFactory, NoopTenantEngine,
    StartOutcome, TenantEngine, TenantEngineFactory,
};
pub use manager::TenantEngineManager;
pub use pipeline::{PipelineError, PipelineSettings, SeedOutcome, TenantEnginePipeline};
pub use registry::{EngineStatusView, TenantEngineRegistry};
