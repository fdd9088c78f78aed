//! Redis-backed coordination store.
//!
//! Layout under a key prefix:
//!
//! ```text
//! <prefix>node:<path>       node contents (existence = node exists)
//! <prefix>children:<path>   set of child names
//! <prefix>lock:<path>       lock token, with a lease TTL
//! ```
//!
//! Node creation runs as one Lua script (exists check, parent check, SET,
//! SADD), so it is atomic across processes. Locks are `SET NX PX` with a random
//! token; a keep-alive task renews the TTL while the lease is held and release
//! only deletes the key if it still carries our token. Acquisition retries on
//! a fixed backoff and never gives up.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use iotforge_core::naming;

use super::{CoordinationError, CoordinationStore, LockLease, ancestors, validate_path};

const DEFAULT_PREFIX: &str = "iotforge:coord:";
const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);
const LOCK_RETRY: Duration = Duration::from_millis(100);
const ROOT_CHILDREN: &str = "/";

/// Returns 0 on create, 1 if the node exists, 2 if the parent is missing.
const CREATE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then return 1 end
if KEYS[2] ~= '' and redis.call('EXISTS', KEYS[2]) == 0 then return 2 end
redis.call('SET', KEYS[1], ARGV[1])
redis.call('SADD', KEYS[3], ARGV[2])
return 0
"#;

const RENEW_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

fn unavailable(e: redis::RedisError) -> CoordinationError {
    CoordinationError::Unavailable(e.to_string())
}

/// Coordination store shared by every process pointing at the same Redis.
#[derive(Clone)]
pub struct RedisCoordinationStore {
    conn: MultiplexedConnection,
    prefix: String,
    lock_ttl: Duration,
}

impl RedisCoordinationStore {
    /// Connect to `redis_url` (e.g. "redis://localhost:6379").
    pub async fn connect(redis_url: impl AsRef<str>) -> Result<Self, CoordinationError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(unavailable)?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(unavailable)?;
        Ok(Self {
            conn,
            prefix: DEFAULT_PREFIX.to_string(),
            lock_ttl: DEFAULT_LOCK_TTL,
        })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Lease TTL; the keep-alive renews at a third of it.
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    fn node_key(&self, path: &str) -> String {
        format!("{}node:{path}", self.prefix)
    }

    fn children_key(&self, path: &str) -> String {
        format!("{}children:{path}", self.prefix)
    }

    fn lock_key(&self, path: &str) -> String {
        format!("{}lock:{path}", self.prefix)
    }

    /// Run the create script; `Ok(false)` when the node already existed.
    async fn create_node(&self, path: &str, data: &[u8]) -> Result<bool, CoordinationError> {
        let parent = naming::parent(path);
        let parent_key = parent.map(|p| self.node_key(p)).unwrap_or_default();
        let children_key = self.children_key(parent.unwrap_or(ROOT_CHILDREN));
        let name = path.rsplit('/').next().unwrap_or(path);

        let mut conn = self.conn.clone();
        let code: i64 = redis::Script::new(CREATE_SCRIPT)
            .key(self.node_key(path))
            .key(parent_key)
            .key(children_key)
            .arg(data)
            .arg(name)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;

        match code {
            0 => {
                debug!(path, "node created");
                Ok(true)
            }
            1 => Ok(false),
            _ => Err(CoordinationError::NoParent(path.to_string())),
        }
    }
}

#[async_trait]
impl CoordinationStore for RedisCoordinationStore {
    async fn exists(&self, path: &str) -> Result<bool, CoordinationError> {
        let mut conn = self.conn.clone();
        conn.exists(self.node_key(path)).await.map_err(unavailable)
    }

    async fn create(&self, path: &str, data: &[u8]) -> Result<(), CoordinationError> {
        validate_path(path)?;
        if self.create_node(path, data).await? {
            Ok(())
        } else {
            Err(CoordinationError::NodeExists(path.to_string()))
        }
    }

    async fn create_all(&self, path: &str, data: &[u8]) -> Result<(), CoordinationError> {
        validate_path(path)?;
        for ancestor in ancestors(path) {
            self.create_node(ancestor, &[]).await?;
        }
        self.create(path, data).await
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>, CoordinationError> {
        let mut conn = self.conn.clone();
        conn.get(self.node_key(path)).await.map_err(unavailable)
    }

    async fn children(&self, path: &str) -> Result<Vec<String>, CoordinationError> {
        validate_path(path)?;
        let mut conn = self.conn.clone();
        let mut names: Vec<String> = conn
            .smembers(self.children_key(path))
            .await
            .map_err(unavailable)?;
        names.sort();
        Ok(names)
    }

    async fn acquire_lock(&self, path: &str) -> Result<Box<dyn LockLease>, CoordinationError> {
        validate_path(path)?;
        let key = self.lock_key(path);
        let token = Uuid::now_v7().to_string();
        let ttl_ms = u64::try_from(self.lock_ttl.as_millis()).unwrap_or(u64::MAX);
        let mut conn = self.conn.clone();

        loop {
            let acquired: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut conn)
                .await
                .map_err(unavailable)?;
            if acquired.is_some() {
                break;
            }
            tokio::time::sleep(LOCK_RETRY).await;
        }
        debug!(path, "lock acquired");

        let keep_alive = tokio::spawn(keep_alive(conn.clone(), key.clone(), token.clone(), self.lock_ttl));
        Ok(Box::new(RedisLease {
            path: path.to_string(),
            key,
            token,
            conn,
            keep_alive,
        }))
    }
}

/// Renew the lease every third of its TTL until aborted.
async fn keep_alive(mut conn: MultiplexedConnection, key: String, token: String, ttl: Duration) {
    let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
    let script = redis::Script::new(RENEW_SCRIPT);
    loop {
        tokio::time::sleep(ttl / 3).await;
        let renewed: redis::RedisResult<i64> = script
            .key(&key)
            .arg(&token)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await;
        match renewed {
            Ok(1) => {}
            Ok(_) => {
                warn!(key = %key, "lock lease lost before release");
                return;
            }
            Err(e) => warn!(key = %key, error = %e, "lock lease renewal failed"),
        }
    }
}

/// Held Redis lock. Dropping it stops renewal; the key then expires.
struct RedisLease {
    path: String,
    key: String,
    token: String,
    conn: MultiplexedConnection,
    keep_alive: JoinHandle<()>,
}

impl Drop for RedisLease {
    fn drop(&mut self) {
        self.keep_alive.abort();
    }
}

#[async_trait]
impl LockLease for RedisLease {
    fn path(&self) -> &str {
        &self.path
    }

    async fn release(self: Box<Self>) -> Result<(), CoordinationError> {
        self.keep_alive.abort();
        let mut conn = self.conn.clone();
        let _: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(&self.key)
            .arg(&self.token)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        debug!(path = %self.path, "lock released");
        Ok(())
    }
}
