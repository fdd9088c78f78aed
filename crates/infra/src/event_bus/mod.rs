//! Infrastructure event bus implementations.
//!
//! The bus abstraction and the in-memory bus live in `iotforge-events`.
//! This module provides infrastructure-backed implementations (e.g. Redis).

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::{RedisStreamsError, RedisStreamsEventBus};
