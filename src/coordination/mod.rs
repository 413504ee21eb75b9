//! Coordination store client
//!
//! The scheduler and the workers share state through a small key/value
//! contract borrowed from consensus stores:
//!
//! - **Leases**: time-bounded ownership tokens. Keys written under a lease
//!   disappear when the lease expires or is revoked.
//! - **Prefix reads**: consistent listing of a namespace such as `/workers/`.
//! - **Prefix watches**: a stream of put/delete events under a namespace.
//! - **Create**: write-if-absent, used for the election key.
//!
//! Two backends implement [`CoordinationClient`]:
//!
//! - [`RedisCoordination`] - lease records with TTLs and Lua scripts; watches
//!   are produced by diffing periodic prefix scans.
//! - [`MemoryCoordination`] - in-process store for tests and single-node runs.
//!
//! [`Session`] wraps a lease together with its keepalive loop.

pub mod memory;
pub mod redis;
pub mod session;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

pub use self::memory::MemoryCoordination;
pub use self::redis::{RedisCoordination, RedisCoordinationConfig};
pub use session::Session;

/// Lease identifier
pub type LeaseId = i64;

/// Capacity of a watch channel before events are dropped
pub const WATCH_CHANNEL_CAPACITY: usize = 256;

/// Receiving side of a prefix watch
pub type WatchReceiver = mpsc::Receiver<WatchEvent>;

/// Result type for coordination operations
pub type CoordinationResult<T> = Result<T, CoordinationError>;

/// A key and its current value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Change notification delivered by a prefix watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// Key created or overwritten
    Put(KeyValue),
    /// Key deleted or its lease expired
    Delete { key: String },
}

impl WatchEvent {
    /// The key the event refers to
    pub fn key(&self) -> &str {
        match self {
            Self::Put(kv) => &kv.key,
            Self::Delete { key } => key,
        }
    }
}

/// Coordination store errors
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// The lease is unknown or already expired
    #[error("Lease {0} not found or expired")]
    LeaseExpired(LeaseId),

    /// Connection could not be obtained
    #[error("Coordination store unavailable: {0}")]
    Unavailable(String),

    /// Operation did not complete in time
    #[error("Coordination store timeout during '{0}'")]
    Timeout(String),

    /// Backend command failed
    #[error("Coordination backend error: {0}")]
    Backend(String),
}

impl CoordinationError {
    /// Check if the error is worth retrying on the next tick
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::LeaseExpired(_))
    }
}

impl From<::redis::RedisError> for CoordinationError {
    fn from(err: ::redis::RedisError) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_io_error() || err.is_connection_dropped() {
            Self::Unavailable(err.to_string())
        } else {
            Self::Backend(err.to_string())
        }
    }
}

impl From<deadpool_redis::PoolError> for CoordinationError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Contract the core needs from the coordination store
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Grant a lease that expires after `ttl` unless kept alive
    async fn grant_lease(&self, ttl: Duration) -> CoordinationResult<LeaseId>;

    /// Renew a lease; returns `false` when the lease no longer exists
    async fn keep_alive(&self, lease: LeaseId) -> CoordinationResult<bool>;

    /// Revoke a lease and delete every key bound to it
    async fn revoke_lease(&self, lease: LeaseId) -> CoordinationResult<()>;

    /// Write a key, optionally bound to a lease
    ///
    /// Fails with [`CoordinationError::LeaseExpired`] when the lease is gone.
    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> CoordinationResult<()>;

    /// Write a key only if it does not exist; returns whether it was written
    async fn create(&self, key: &str, value: &str, lease: Option<LeaseId>)
        -> CoordinationResult<bool>;

    /// Read a single key
    async fn get(&self, key: &str) -> CoordinationResult<Option<String>>;

    /// Read every key under a prefix, ordered by key
    async fn get_prefix(&self, prefix: &str) -> CoordinationResult<Vec<KeyValue>>;

    /// Delete a key; returns whether it existed
    async fn delete(&self, key: &str) -> CoordinationResult<bool>;

    /// Subscribe to changes under a prefix
    ///
    /// Events are delivered in store order. The subscription ends when the
    /// receiver is dropped.
    async fn watch_prefix(&self, prefix: &str) -> CoordinationResult<WatchReceiver>;
}
