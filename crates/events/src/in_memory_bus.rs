//! In-memory event bus for tests/dev.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, mpsc};

use tracing::{debug, warn};

use crate::bus::{EventBus, Subscription};
use crate::tenant::TenantScoped;

/// Partition count used by [`InMemoryEventBus::new`].
pub const DEFAULT_PARTITIONS: u32 = 8;

/// Messages a member-less group keeps before dropping the oldest.
pub const DEFAULT_BACKLOG_LIMIT: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum InMemoryBusError {
    /// Internal lock poisoning.
    #[error("in-memory bus state poisoned")]
    Poisoned,
}

#[derive(Debug)]
struct Member<M> {
    consumer: String,
    tx: mpsc::Sender<M>,
}

#[derive(Debug)]
struct Group<M> {
    members: Vec<Member<M>>,
    /// Messages published while the group had no live member.
    backlog: VecDeque<(u32, M)>,
}

impl<M> Default for Group<M> {
    fn default() -> Self {
        Self {
            members: Vec::new(),
            backlog: VecDeque::new(),
        }
    }
}

impl<M> Group<M> {
    /// Hand `message` to the member owning `partition`, dropping dead members
    /// until one accepts it. Returns the message if nobody is left.
    fn deliver(&mut self, partition: u32, mut message: M) -> Option<M> {
        while !self.members.is_empty() {
            let owner = partition as usize % self.members.len();
            match self.members[owner].tx.send(message) {
                Ok(()) => return None,
                Err(mpsc::SendError(returned)) => {
                    let gone = self.members.remove(owner);
                    debug!(consumer = %gone.consumer, "dropping disconnected group member");
                    message = returned;
                }
            }
        }
        Some(message)
    }

    fn drain_backlog(&mut self) {
        while let Some((partition, message)) = self.backlog.pop_front() {
            if let Some(undelivered) = self.deliver(partition, message) {
                self.backlog.push_front((partition, undelivered));
                return;
            }
        }
    }
}

#[derive(Debug)]
struct Topic<M> {
    broadcast: Vec<mpsc::Sender<M>>,
    groups: BTreeMap<String, Group<M>>,
}

impl<M> Default for Topic<M> {
    fn default() -> Self {
        Self {
            broadcast: Vec::new(),
            groups: BTreeMap::new(),
        }
    }
}

/// In-memory, partitioned pub/sub bus.
///
/// - No IO / no async
/// - Broadcast subscribers each get every message
/// - Consumer groups get each message once, routed by tenant partition
/// - A partition's owner is `partition % members`, so a join or leave
///   remaps partitions. Messages already queued on the old owner's channel
///   stay there: per-tenant order holds only between membership changes.
/// - Groups keep a backlog while they have no members, so a late joiner
///   still sees earlier messages. The backlog is capped; past the cap the
///   oldest messages are dropped (abandoned groups cannot grow forever).
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    partitions: u32,
    backlog_limit: usize,
    topics: Mutex<HashMap<String, Topic<M>>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    /// Create a bus with an explicit partition count (at least one).
    pub fn with_partitions(partitions: u32) -> Self {
        Self {
            partitions: partitions.max(1),
            backlog_limit: DEFAULT_BACKLOG_LIMIT,
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Cap each member-less group's backlog at `limit` messages.
    pub fn with_backlog_limit(mut self, limit: usize) -> Self {
        self.backlog_limit = limit;
        self
    }

    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    /// Partition a key maps to (FNV-1a, stable across processes).
    pub fn partition_for(&self, key: &str) -> u32 {
        let mut hash: u32 = 0x811c_9dc5;
        for byte in key.as_bytes() {
            hash ^= u32::from(*byte);
            hash = hash.wrapping_mul(0x0100_0193);
        }
        hash % self.partitions
    }

    /// Number of live members currently registered in `group` on `topic`.
    pub fn group_size(&self, topic: &str, group: &str) -> usize {
        self.topics
            .lock()
            .ok()
            .and_then(|topics| topics.get(topic).and_then(|t| t.groups.get(group)).map(|g| g.members.len()))
            .unwrap_or(0)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: TenantScoped + Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, topic: &str, message: M) -> Result<(), Self::Error> {
        let partition = self.partition_for(message.tenant_id().as_str());
        let mut topics = self.topics.lock().map_err(|_| InMemoryBusError::Poisoned)?;
        let state = topics.entry(topic.to_string()).or_default();

        // Drop any dead subscribers while publishing.
        state.broadcast.retain(|tx| tx.send(message.clone()).is_ok());

        for (name, group) in state.groups.iter_mut() {
            let undelivered = if group.backlog.is_empty() {
                group.deliver(partition, message.clone())
            } else {
                Some(message.clone())
            };
            let Some(undelivered) = undelivered else { continue };
            if self.backlog_limit == 0 {
                continue;
            }

            if group.backlog.len() >= self.backlog_limit {
                group.backlog.pop_front();
                warn!(topic = %topic, group = %name, "group backlog full, dropping oldest message");
            }
            group.backlog.push_back((partition, undelivered));
        }

        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<Subscription<M>, Self::Error> {
        let (tx, rx) = mpsc::channel();
        let mut topics = self.topics.lock().map_err(|_| InMemoryBusError::Poisoned)?;
        topics.entry(topic.to_string()).or_default().broadcast.push(tx);
        Ok(Subscription::new(rx))
    }

    fn subscribe_group(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Subscription<M>, Self::Error> {
        let (tx, rx) = mpsc::channel();
        let mut topics = self.topics.lock().map_err(|_| InMemoryBusError::Poisoned)?;
        let group = topics
            .entry(topic.to_string())
            .or_default()
            .groups
            .entry(group.to_string())
            .or_default();

        group.members.push(Member {
            consumer: consumer.to_string(),
            tx,
        });
        group.drain_backlog();

        Ok(Subscription::new(rx))
    }
}
