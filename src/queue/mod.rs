//! Queue store client
//!
//! Task transport runs over a list/sorted-set store:
//!
//! - the main queue that ingestion pushes serialized tasks onto
//! - the shared in-flight marker queue
//! - one dedicated queue per worker
//! - a sorted set of delayed tasks scored by due time (unix seconds)
//! - short-lived claim keys used by workers to suppress duplicates
//!
//! [`RedisQueue`] is the production backend; [`MemoryQueue`] keeps the same
//! semantics in process for tests.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use self::memory::MemoryQueue;
pub use self::redis::RedisQueue;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Queue store errors
#[derive(Debug, Error)]
pub enum QueueError {
    /// Connection could not be obtained
    #[error("Queue store unavailable: {0}")]
    Unavailable(String),

    /// Operation did not complete in time
    #[error("Queue store timeout: {0}")]
    Timeout(String),

    /// Push was rejected by the store
    #[error("Push to '{queue}' rejected: {reason}")]
    PushRejected { queue: String, reason: String },

    /// Backend command failed
    #[error("Queue backend error: {0}")]
    Backend(String),
}

impl From<::redis::RedisError> for QueueError {
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

impl From<deadpool_redis::PoolError> for QueueError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Names of the logical channels in the queue store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueNames {
    /// Main task queue
    pub main: String,

    /// Shared in-flight marker queue
    pub processing: String,

    /// Sorted set of delayed tasks
    pub delayed: String,

    /// Prefix of per-worker queues
    pub worker_prefix: String,

    /// Prefix of worker claim keys
    pub claim_prefix: String,
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            main: "task-queue".to_string(),
            processing: "processing-queue".to_string(),
            delayed: "delayed-tasks".to_string(),
            worker_prefix: "worker-queue:".to_string(),
            claim_prefix: "task-executed:".to_string(),
        }
    }
}

impl QueueNames {
    /// Dedicated queue of a worker
    pub fn worker_queue(&self, worker_id: &str) -> String {
        format!("{}{}", self.worker_prefix, worker_id)
    }

    /// Claim key of a task
    pub fn claim_key(&self, task_id: &str) -> String {
        format!("{}{}", self.claim_prefix, task_id)
    }
}

/// Contract the core needs from the queue store
///
/// Lists are pushed on the right and popped from the left, so `push_back`
/// keeps FIFO order and `push_front` jumps the line.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Atomically pop the head of `src` and append it to `dst`
    ///
    /// Waits at most `timeout` for an element; `None` on timeout.
    async fn blocking_move(
        &self,
        src: &str,
        dst: &str,
        timeout: Duration,
    ) -> QueueResult<Option<String>>;

    /// Pop the head of a queue, waiting at most `timeout`
    async fn blocking_pop(&self, queue: &str, timeout: Duration) -> QueueResult<Option<String>>;

    /// Append to the tail
    async fn push_back(&self, queue: &str, value: &str) -> QueueResult<()>;

    /// Insert at the head
    async fn push_front(&self, queue: &str, value: &str) -> QueueResult<()>;

    /// Remove the first element equal to `value`; returns whether one was removed
    async fn remove(&self, queue: &str, value: &str) -> QueueResult<bool>;

    /// Every element, head first
    async fn range_all(&self, queue: &str) -> QueueResult<Vec<String>>;

    async fn len(&self, queue: &str) -> QueueResult<usize>;

    /// Whether some element equals `value`
    async fn contains(&self, queue: &str, value: &str) -> QueueResult<bool>;

    /// Write a key only if absent, expiring after `ttl`; returns whether written
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> QueueResult<bool>;

    /// Delete a key; returns whether it existed
    async fn delete_key(&self, key: &str) -> QueueResult<bool>;

    /// Add a member to a sorted set with the given score
    async fn schedule(&self, set: &str, value: &str, score: i64) -> QueueResult<()>;

    /// Remove and return up to `limit` members scored at or below `max_score`
    ///
    /// Only members this call actually removed are returned, so two callers
    /// never receive the same member.
    async fn pop_due(&self, set: &str, max_score: i64, limit: usize) -> QueueResult<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_names() {
        let names = QueueNames::default();
        assert_eq!(names.main, "task-queue");
        assert_eq!(names.processing, "processing-queue");
        assert_eq!(names.worker_queue("w1"), "worker-queue:w1");
        assert_eq!(names.claim_key("T1"), "task-executed:T1");
    }

    #[test]
    fn test_queue_names_partial_toml() {
        let names: QueueNames = toml::from_str(r#"main = "jobs""#).unwrap();
        assert_eq!(names.main, "jobs");
        assert_eq!(names.processing, "processing-queue");
    }
}
