//! `iotforge-core`: identifiers, errors and naming shared by every platform service.
//!
//! This crate contains **pure** primitives (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod naming;

pub use error::{DomainError, DomainResult};
pub use id::{InstanceId, ModuleId, TenantId};
