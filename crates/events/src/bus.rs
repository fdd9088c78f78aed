//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus is **topic-based** and **at-least-once**:
//!
//! - Every message is published to a named topic.
//! - A plain subscription (`subscribe`) sees every message of its topic.
//! - A group subscription (`subscribe_group`) shares the topic with the other
//!   members of the same consumer group: each message goes to exactly one live
//!   member. Messages are partitioned by tenant, and a partition is owned by one
//!   member at a time, so per-tenant order is preserved within a group between
//!   membership changes. A join or leave may move a partition while the old
//!   owner still holds some of its messages.
//! - Redelivery is possible (retried publish, member failover); consumers must
//!   be idempotent.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

/// A subscription to an event stream.
///
/// ## Usage Pattern
///
/// ```ignore
/// let subscription = bus.subscribe_group(&topic, &group, "replica-1")?;
///
/// loop {
///     match subscription.recv_timeout(Duration::from_millis(250)) {
///         Ok(event) => process(event)?,
///         Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,  // Check for shutdown
///         Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,  // Bus closed
///     }
/// }
/// ```
///
/// Subscriptions are designed for single-threaded consumption. Dropping a
/// subscription leaves its group; its partitions move to the remaining members.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Topic-based, partitioned pub/sub bus.
///
/// `publish()` can fail (closed connection, poisoned state). Failures are
/// surfaced to the caller; nothing is retried here.
pub trait EventBus<M>: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Append `message` to `topic`.
    fn publish(&self, topic: &str, message: M) -> Result<(), Self::Error>;

    /// Subscribe to every message of `topic` (broadcast).
    fn subscribe(&self, topic: &str) -> Result<Subscription<M>, Self::Error>;

    /// Join consumer group `group` on `topic` as member `consumer`.
    fn subscribe_group(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Subscription<M>, Self::Error>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, topic: &str, message: M) -> Result<(), Self::Error> {
        (**self).publish(topic, message)
    }

    fn subscribe(&self, topic: &str) -> Result<Subscription<M>, Self::Error> {
        (**self).subscribe(topic)
    }

    fn subscribe_group(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Subscription<M>, Self::Error> {
        (**self).subscribe_group(topic, group, consumer)
    }
}

/// Backend-independent bus error, used behind [`SharedEventBus`].
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct BusError(Box<dyn std::error::Error + Send + Sync + 'static>);

impl BusError {
    pub fn new(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self(Box::new(error))
    }
}

/// A bus whose backend is chosen at runtime.
pub type SharedEventBus<M> = Arc<dyn EventBus<M, Error = BusError>>;

/// Erase `bus`'s concrete type (and error type).
pub fn shared<M, B>(bus: B) -> SharedEventBus<M>
where
    M: 'static,
    B: EventBus<M> + 'static,
{
    Arc::new(ErasedBus(bus))
}

struct ErasedBus<B>(B);

impl<M, B> EventBus<M> for ErasedBus<B>
where
    B: EventBus<M>,
{
    type Error = BusError;

    fn publish(&self, topic: &str, message: M) -> Result<(), Self::Error> {
        self.0.publish(topic, message).map_err(BusError::new)
    }

    fn subscribe(&self, topic: &str) -> Result<Subscription<M>, Self::Error> {
        self.0.subscribe(topic).map_err(BusError::new)
    }

    fn subscribe_group(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Subscription<M>, Self::Error> {
        self.0
            .subscribe_group(topic, group, consumer)
            .map_err(BusError::new)
    }
}
