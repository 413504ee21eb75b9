//! Redis-backed coordination store
//!
//! Key layout (all under the configured namespace):
//!
//! ```text
//! {ns}lease:seq           INCR counter for lease ids
//! {ns}lease:{id}          lease record, value = ttl in ms, PX = ttl
//! {ns}lease:{id}:keys     set of keys bound to the lease
//! {ns}{key}               user keys, e.g. taskgrid:/workers/w1
//! ```
//!
//! Bound keys carry the same TTL as their lease and are refreshed together by
//! the keepalive script, so a lease that stops being renewed takes its keys
//! with it. Watches poll the prefix and diff consecutive snapshots.

use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Connection, Pool, Runtime};
use redis::Script;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{
    CoordinationClient, CoordinationError, CoordinationResult, KeyValue, LeaseId, WatchEvent,
    WatchReceiver, WATCH_CHANNEL_CAPACITY,
};

const PUT_WITH_LEASE: &str = r#"
local ttl = redis.call('PTTL', KEYS[1])
if ttl <= 0 then
  return -1
end
if ARGV[2] == '1' then
  local ok = redis.call('SET', KEYS[3], ARGV[1], 'NX', 'PX', ttl)
  if not ok then
    return 0
  end
else
  redis.call('SET', KEYS[3], ARGV[1], 'PX', ttl)
end
redis.call('SADD', KEYS[2], KEYS[3])
redis.call('PEXPIRE', KEYS[2], ttl)
return 1
"#;

const KEEP_ALIVE: &str = r#"
local ttl = redis.call('GET', KEYS[1])
if not ttl then
  return 0
end
redis.call('PEXPIRE', KEYS[1], ttl)
local members = redis.call('SMEMBERS', KEYS[2])
for _, key in ipairs(members) do
  if redis.call('PEXPIRE', key, ttl) == 0 then
    redis.call('SREM', KEYS[2], key)
  end
end
redis.call('PEXPIRE', KEYS[2], ttl)
return 1
"#;

const REVOKE: &str = r#"
local members = redis.call('SMEMBERS', KEYS[2])
for _, key in ipairs(members) do
  redis.call('DEL', key)
end
redis.call('DEL', KEYS[1], KEYS[2])
return #members
"#;

/// Redis coordination configuration
#[derive(Debug, Clone)]
pub struct RedisCoordinationConfig {
    /// Redis URL (e.g., redis://localhost:6379)
    pub url: String,

    /// Connection pool size
    pub pool_size: usize,

    /// Namespace prepended to every key
    pub namespace: String,

    /// How often watches rescan their prefix
    pub watch_poll_interval: Duration,
}

impl Default for RedisCoordinationConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 8,
            namespace: "taskgrid:".to_string(),
            watch_poll_interval: Duration::from_millis(500),
        }
    }
}

/// Coordination client on top of a Redis connection pool
#[derive(Clone)]
pub struct RedisCoordination {
    pool: Pool,
    config: RedisCoordinationConfig,
}

impl RedisCoordination {
    /// Connect and verify the store answers PING
    pub async fn connect(config: RedisCoordinationConfig) -> CoordinationResult<Self> {
        let pool = PoolConfig::from_url(&config.url)
            .builder()
            .map_err(|e| CoordinationError::Unavailable(format!("pool builder: {e}")))?
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| CoordinationError::Unavailable(format!("pool build: {e}")))?;

        let mut conn = pool.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut *conn).await?;

        tracing::info!(url = %config.url, namespace = %config.namespace, "Connected to coordination store");

        Ok(Self { pool, config })
    }

    async fn conn(&self) -> CoordinationResult<Connection> {
        Ok(self.pool.get().await?)
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.config.namespace, key)
    }

    fn lease_key(&self, lease: LeaseId) -> String {
        format!("{}lease:{}", self.config.namespace, lease)
    }

    fn lease_members_key(&self, lease: LeaseId) -> String {
        format!("{}lease:{}:keys", self.config.namespace, lease)
    }

    fn strip<'a>(&self, full: &'a str) -> &'a str {
        full.strip_prefix(&self.config.namespace).unwrap_or(full)
    }

    async fn write(
        &self,
        key: &str,
        value: &str,
        lease: Option<LeaseId>,
        only_if_absent: bool,
    ) -> CoordinationResult<bool> {
        let mut conn = self.conn().await?;
        let full = self.key(key);

        match lease {
            Some(lease) => {
                let outcome: i64 = Script::new(PUT_WITH_LEASE)
                    .key(self.lease_key(lease))
                    .key(self.lease_members_key(lease))
                    .key(&full)
                    .arg(value)
                    .arg(if only_if_absent { "1" } else { "0" })
                    .invoke_async(&mut *conn)
                    .await?;
                match outcome {
                    -1 => Err(CoordinationError::LeaseExpired(lease)),
                    0 => Ok(false),
                    _ => Ok(true),
                }
            }
            None => {
                let mut cmd = redis::cmd("SET");
                cmd.arg(&full).arg(value);
                if only_if_absent {
                    cmd.arg("NX");
                }
                let reply: Option<String> = cmd.query_async(&mut *conn).await?;
                Ok(reply.is_some())
            }
        }
    }

    async fn snapshot(&self, prefix: &str) -> CoordinationResult<BTreeMap<String, String>> {
        Ok(self
            .get_prefix(prefix)
            .await?
            .into_iter()
            .map(|kv| (kv.key, kv.value))
            .collect())
    }
}

/// Escape glob metacharacters so a prefix can be used in `SCAN MATCH`
fn glob_escape(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 4);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Compute the events that turn `before` into `after`
fn diff_snapshots(
    before: &BTreeMap<String, String>,
    after: &BTreeMap<String, String>,
) -> Vec<WatchEvent> {
    let mut events = Vec::new();

    for (key, value) in after {
        if before.get(key) != Some(value) {
            events.push(WatchEvent::Put(KeyValue::new(key.clone(), value.clone())));
        }
    }

    for key in before.keys() {
        if !after.contains_key(key) {
            events.push(WatchEvent::Delete { key: key.clone() });
        }
    }

    events
}

#[async_trait]
impl CoordinationClient for RedisCoordination {
    async fn grant_lease(&self, ttl: Duration) -> CoordinationResult<LeaseId> {
        let mut conn = self.conn().await?;
        let ttl_ms = ttl.as_millis().max(1) as u64;

        let id: LeaseId = redis::cmd("INCR")
            .arg(format!("{}lease:seq", self.config.namespace))
            .query_async(&mut *conn)
            .await?;

        let _: () = redis::cmd("SET")
            .arg(self.lease_key(id))
            .arg(ttl_ms)
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut *conn)
            .await?;

        Ok(id)
    }

    async fn keep_alive(&self, lease: LeaseId) -> CoordinationResult<bool> {
        let mut conn = self.conn().await?;
        let alive: i64 = Script::new(KEEP_ALIVE)
            .key(self.lease_key(lease))
            .key(self.lease_members_key(lease))
            .invoke_async(&mut *conn)
            .await?;
        Ok(alive == 1)
    }

    async fn revoke_lease(&self, lease: LeaseId) -> CoordinationResult<()> {
        let mut conn = self.conn().await?;
        let removed: i64 = Script::new(REVOKE)
            .key(self.lease_key(lease))
            .key(self.lease_members_key(lease))
            .invoke_async(&mut *conn)
            .await?;
        tracing::debug!(lease, removed, "Lease revoked");
        Ok(())
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> CoordinationResult<()> {
        self.write(key, value, lease, false).await.map(|_| ())
    }

    async fn create(
        &self,
        key: &str,
        value: &str,
        lease: Option<LeaseId>,
    ) -> CoordinationResult<bool> {
        self.write(key, value, lease, true).await
    }

    async fn get(&self, key: &str) -> CoordinationResult<Option<String>> {
        let mut conn = self.conn().await?;
        let value: Option<String> = redis::cmd("GET")
            .arg(self.key(key))
            .query_async(&mut *conn)
            .await?;
        Ok(value)
    }

    async fn get_prefix(&self, prefix: &str) -> CoordinationResult<Vec<KeyValue>> {
        let mut conn = self.conn().await?;
        let pattern = format!("{}*", glob_escape(&self.key(prefix)));

        let mut keys: Vec<String> = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut *conn)
                .await?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        if keys.is_empty() {
            return Ok(Vec::new());
        }

        keys.sort();
        keys.dedup();

        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut *conn)
            .await?;

        Ok(keys
            .iter()
            .zip(values)
            .filter_map(|(key, value)| value.map(|v| KeyValue::new(self.strip(key), v)))
            .collect())
    }

    async fn delete(&self, key: &str) -> CoordinationResult<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = redis::cmd("DEL")
            .arg(self.key(key))
            .query_async(&mut *conn)
            .await?;
        Ok(removed > 0)
    }

    async fn watch_prefix(&self, prefix: &str) -> CoordinationResult<WatchReceiver> {
        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let mut previous = self.snapshot(prefix).await?;

        let store = self.clone();
        let prefix = prefix.to_string();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(store.config.watch_poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    break;
                }

                let current = match store.snapshot(&prefix).await {
                    Ok(current) => current,
                    Err(e) => {
                        tracing::warn!(prefix = %prefix, error = %e, "Watch scan failed");
                        continue;
                    }
                };

                for event in diff_snapshots(&previous, &current) {
                    if tx.send(event).await.is_err() {
                        tracing::debug!(prefix = %prefix, "Watch receiver dropped");
                        return;
                    }
                }
                previous = current;
            }
        });

        Ok(rx)
    }
}
