//! Task status and execution log storage
//!
//! Dispatch and execution report status transitions (`Expired`, `Completed`,
//! `Failed`) and append execution log entries. Those writes go through
//! [`StatusRecorder`], which bounds each call with a timeout and logs
//! failures instead of returning them.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::models::{TaskLogEntry, TaskStatus};

pub use memory::MemoryTaskStore;
pub use postgres::{PostgresConfig, PostgresTaskStore};

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection pool could not hand out a connection
    #[error("Storage pool error: {0}")]
    Pool(String),

    /// Statement failed
    #[error("Storage query failed: {0}")]
    Query(String),

    /// Backend refused the write
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(err: tokio_postgres::Error) -> Self {
        Self::Query(err.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for StoreError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}

/// Storage collaborator
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Set the status of a task
    async fn update_status(&self, task_id: &str, status: TaskStatus) -> StoreResult<()>;

    /// Append an execution log entry
    async fn append_log(&self, entry: &TaskLogEntry) -> StoreResult<()>;
}

/// Store that accepts and discards every write
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTaskStore;

#[async_trait]
impl TaskStore for NullTaskStore {
    async fn update_status(&self, _task_id: &str, _status: TaskStatus) -> StoreResult<()> {
        Ok(())
    }

    async fn append_log(&self, _entry: &TaskLogEntry) -> StoreResult<()> {
        Ok(())
    }
}

/// Fire-and-forget front of a [`TaskStore`]
#[derive(Clone)]
pub struct StatusRecorder {
    store: Arc<dyn TaskStore>,
    timeout: Duration,
}

impl StatusRecorder {
    pub fn new(store: Arc<dyn TaskStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Recorder that drops every write
    pub fn disabled() -> Self {
        Self::new(Arc::new(NullTaskStore), Duration::from_secs(1))
    }

    /// Record a status transition; failures are logged
    pub async fn status(&self, task_id: &str, status: TaskStatus) {
        match tokio::time::timeout(self.timeout, self.store.update_status(task_id, status)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(task_id = %task_id, status = %status, error = %e, "Failed to update task status")
            }
            Err(_) => {
                tracing::warn!(task_id = %task_id, status = %status, "Task status update timed out")
            }
        }
    }

    /// Append an execution log entry; failures are logged
    pub async fn log(&self, entry: TaskLogEntry) {
        match tokio::time::timeout(self.timeout, self.store.append_log(&entry)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(task_id = %entry.task_id, error = %e, "Failed to append task log")
            }
            Err(_) => tracing::warn!(task_id = %entry.task_id, "Task log append timed out"),
        }
    }
}
