//! Redis Streams-backed event bus (durable, at-least-once delivery).
//!
//! - **Topic**: one stream per topic, the stream key is the topic name
//! - **Entry**: `tenant_id` + JSON `payload` fields (XADD)
//! - **Consumer groups**: XGROUP CREATE … MKSTREAM, read with XREADGROUP
//! - **Broadcast**: `subscribe` joins a consumer-unique group starting at `$`
//! - **Malformed entries**: logged, acknowledged and discarded
//!
//! Entries are acknowledged once handed to the subscription channel. Redis
//! balances a group's entries across its consumers without tenant affinity, so
//! per-tenant order only holds within one consumer.

use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use redis::Commands;
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use iotforge_events::{EventBus, Subscription, TenantChangeEvent, TenantScoped};

/// Entries fetched per XREADGROUP call.
const READ_COUNT: usize = 10;

/// How long XREADGROUP blocks waiting for new entries.
const BLOCK_MS: usize = 1000;

/// Pause before reconnecting after a failed read.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum RedisStreamsError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis command error: {0}")]
    Command(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Consumer group error: {0}")]
    ConsumerGroup(String),

    #[error("failed to spawn reader thread: {0}")]
    Thread(String),
}

/// Publishing reuses one blocking connection; each subscription reads on its
/// own connection and thread.
#[derive(Clone)]
pub struct RedisStreamsEventBus {
    client: Arc<redis::Client>,
    publisher: Arc<Mutex<Option<redis::Connection>>>,
}

impl std::fmt::Debug for RedisStreamsEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStreamsEventBus")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

impl RedisStreamsEventBus {
    /// Create a bus for `redis_url` (e.g. "redis://localhost:6379").
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, RedisStreamsError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;
        Ok(Self {
            client: Arc::new(client),
            publisher: Arc::new(Mutex::new(None)),
        })
    }

    fn connection(&self) -> Result<redis::Connection, RedisStreamsError> {
        self.client
            .get_connection()
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))
    }

    /// Create `group` on `stream` starting at `start_id` (idempotent).
    fn ensure_consumer_group(
        &self,
        conn: &mut redis::Connection,
        stream: &str,
        group: &str,
        start_id: &str,
    ) -> Result<(), RedisStreamsError> {
        let created: redis::RedisResult<()> = conn.xgroup_create_mkstream(stream, group, start_id);
        match created {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(RedisStreamsError::ConsumerGroup(format!("{group}: {e}"))),
        }
    }

    #[instrument(
        skip(self, message),
        fields(stream_key = %topic, tenant_id = %message.tenant_id()),
        err
    )]
    fn publish_sync(&self, topic: &str, message: &TenantChangeEvent) -> Result<(), RedisStreamsError> {
        let payload = message
            .to_json()
            .map_err(|e| RedisStreamsError::Serialization(e.to_string()))?;
        let mut slot = self
            .publisher
            .lock()
            .map_err(|_| RedisStreamsError::Connection("publisher connection poisoned".to_string()))?;
        let mut conn = match slot.take() {
            Some(conn) => conn,
            None => self.connection()?,
        };

        let added: redis::RedisResult<String> = conn.xadd(
            topic,
            "*",
            &[("tenant_id", message.tenant_id().as_str()), ("payload", payload.as_str())],
        );
        match added {
            Ok(_) => {
                *slot = Some(conn);
                Ok(())
            }
            // The connection is dropped; the next publish reconnects.
            Err(e) => Err(RedisStreamsError::Command(format!("XADD failed: {e}"))),
        }
    }

    fn subscribe_inner(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        start_id: &str,
    ) -> Result<Subscription<TenantChangeEvent>, RedisStreamsError> {
        let mut conn = self.connection()?;
        self.ensure_consumer_group(&mut conn, stream, group, start_id)?;

        let (tx, rx) = mpsc::channel();
        let reader = StreamReader {
            bus: self.clone(),
            stream: stream.to_string(),
            group: group.to_string(),
            consumer: consumer.to_string(),
        };
        thread::Builder::new()
            .name(format!("redis-stream-{consumer}"))
            .spawn(move || reader.run(conn, tx))
            .map_err(|e| RedisStreamsError::Thread(e.to_string()))?;

        Ok(Subscription::new(rx))
    }
}

/// Background reader forwarding one consumer's entries into a channel.
struct StreamReader {
    bus: RedisStreamsEventBus,
    stream: String,
    group: String,
    consumer: String,
}

impl StreamReader {
    fn run(self, mut conn: redis::Connection, tx: mpsc::Sender<TenantChangeEvent>) {
        let opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(READ_COUNT)
            .block(BLOCK_MS);

        loop {
            let reply: redis::RedisResult<Option<StreamReadReply>> =
                conn.xread_options(&[&self.stream], &[">"], &opts);

            let reply = match reply {
                Ok(reply) => reply,
                Err(e) => {
                    error!(stream_key = %self.stream, group = %self.group, error = %e, "XREADGROUP failed");
                    thread::sleep(RECONNECT_DELAY);
                    match self.bus.connection() {
                        Ok(fresh) => conn = fresh,
                        Err(e) => warn!(error = %e, "Redis reconnect failed"),
                    }
                    continue;
                }
            };

            let entries = reply
                .into_iter()
                .flat_map(|r| r.keys)
                .flat_map(|k| k.ids);
            for entry in entries {
                if let Some(event) = self.decode(&entry) {
                    if tx.send(event).is_err() {
                        debug!(consumer = %self.consumer, "subscription dropped; reader exiting");
                        return;
                    }
                }
                let acked: redis::RedisResult<i64> = conn.xack(&self.stream, &self.group, &[&entry.id]);
                if let Err(e) = acked {
                    error!(message_id = %entry.id, error = %e, "XACK failed");
                }
            }
        }
    }

    fn decode(&self, entry: &StreamId) -> Option<TenantChangeEvent> {
        let Some(payload) = entry.get::<String>("payload") else {
            warn!(message_id = %entry.id, "stream entry without payload discarded");
            return None;
        };
        match TenantChangeEvent::from_json(&payload) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(message_id = %entry.id, error = %e, "malformed tenant change discarded");
                None
            }
        }
    }
}

impl EventBus<TenantChangeEvent> for RedisStreamsEventBus {
    type Error = RedisStreamsError;

    fn publish(&self, topic: &str, message: TenantChangeEvent) -> Result<(), Self::Error> {
        self.publish_sync(topic, &message)
    }

    fn subscribe(&self, topic: &str) -> Result<Subscription<TenantChangeEvent>, Self::Error> {
        let id = Uuid::now_v7();
        self.subscribe_inner(topic, &format!("broadcast-{id}"), &format!("consumer-{id}"), "$")
    }

    fn subscribe_group(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Subscription<TenantChangeEvent>, Self::Error> {
        // "0": a new group also receives entries published before it existed.
        self.subscribe_inner(topic, group, consumer, "0")
    }
}
