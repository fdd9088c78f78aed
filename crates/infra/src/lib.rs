//! Infrastructure layer: coordination store, buses, templates, tenant provisioning.

pub mod bootstrap;
pub mod config;
pub mod coordination;
pub mod engine;
pub mod event_bus;
pub mod templates;
pub mod tenants;
pub mod workers;


pub use config::{ConfigError, PlatformConfig};
