//! Process configuration, read from the environment.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use iotforge_core::{DomainError, InstanceId, ModuleId};

use crate::engine::PipelineSettings;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: expected {expected}, got {value:?}")]
    Parse {
        var: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("provisioning deadline ({deadline_ms} ms) is shorter than the poll interval ({interval_ms} ms)")]
    DeadlineBelowInterval { deadline_ms: u64, interval_ms: u64 },

    #[error(transparent)]
    Id(#[from] DomainError),
}

/// Settings shared by every component of one node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub instance_id: String,
    pub module_id: String,
    pub bootstrap_workers: usize,
    pub engine_workers: usize,
    pub provisioning_poll_interval_ms: u64,
    pub provisioning_deadline_ms: u64,
    pub bus_partitions: u32,
    pub template_root: Option<PathBuf>,
    pub redis_url: Option<String>,
    pub bind_addr: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            instance_id: "iotforge".to_string(),
            module_id: "tenant-management".to_string(),
            bootstrap_workers: 3,
            engine_workers: 4,
            provisioning_poll_interval_ms: 500,
            provisioning_deadline_ms: 5000,
            bus_partitions: 8,
            template_root: None,
            redis_url: None,
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl PlatformConfig {
    /// Defaults overridden by `IOTFORGE_*` / `REDIS_URL`, then validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(v) = get("IOTFORGE_INSTANCE_ID") {
            config.instance_id = v;
        }
        if let Some(v) = get("IOTFORGE_MODULE_ID") {
            config.module_id = v;
        }
        if let Some(v) = get("IOTFORGE_BOOTSTRAP_WORKERS") {
            config.bootstrap_workers = parse("IOTFORGE_BOOTSTRAP_WORKERS", &v)?;
        }
        if let Some(v) = get("IOTFORGE_ENGINE_WORKERS") {
            config.engine_workers = parse("IOTFORGE_ENGINE_WORKERS", &v)?;
        }
        if let Some(v) = get("IOTFORGE_PROVISIONING_POLL_MS") {
            config.provisioning_poll_interval_ms = parse("IOTFORGE_PROVISIONING_POLL_MS", &v)?;
        }
        if let Some(v) = get("IOTFORGE_PROVISIONING_DEADLINE_MS") {
            config.provisioning_deadline_ms = parse("IOTFORGE_PROVISIONING_DEADLINE_MS", &v)?;
        }
        if let Some(v) = get("IOTFORGE_BUS_PARTITIONS") {
            config.bus_partitions = parse("IOTFORGE_BUS_PARTITIONS", &v)?;
        }
        if let Some(v) = get("IOTFORGE_TEMPLATE_ROOT") {
            config.template_root = Some(PathBuf::from(v));
        }
        if let Some(v) = get("REDIS_URL") {
            config.redis_url = Some(v);
        }
        if let Some(v) = get("IOTFORGE_BIND_ADDR") {
            config.bind_addr = v;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.instance()?;
        self.module()?;
        if self.bootstrap_workers == 0 {
            return Err(ConfigError::Zero("bootstrap_workers"));
        }
        if self.engine_workers == 0 {
            return Err(ConfigError::Zero("engine_workers"));
        }
        if self.bus_partitions == 0 {
            return Err(ConfigError::Zero("bus_partitions"));
        }
        if self.provisioning_poll_interval_ms == 0 {
            return Err(ConfigError::Zero("provisioning_poll_interval_ms"));
        }
        if self.provisioning_deadline_ms < self.provisioning_poll_interval_ms {
            return Err(ConfigError::DeadlineBelowInterval {
                deadline_ms: self.provisioning_deadline_ms,
                interval_ms: self.provisioning_poll_interval_ms,
            });
        }
        Ok(())
    }

    pub fn instance(&self) -> Result<InstanceId, ConfigError> {
        Ok(InstanceId::new(self.instance_id.clone())?)
    }

    pub fn module(&self) -> Result<ModuleId, ConfigError> {
        Ok(ModuleId::new(self.module_id.clone())?)
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            poll_interval: Duration::from_millis(self.provisioning_poll_interval_ms),
            deadline: Duration::from_millis(self.provisioning_deadline_ms),
        }
    }
}

fn parse<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Parse {
        var,
        expected: "a non-negative integer",
        value: value.to_string(),
    })
}
