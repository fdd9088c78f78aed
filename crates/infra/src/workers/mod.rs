//! Background execution: subscription consumers and the async worker pool.

pub mod consumer;
pub mod pool;

pub use consumer::{ConsumerWorker, SpawnError, WorkerHandle};
pub use pool::{PoolError, PoolStats, TaskHandle, WorkerPool};
