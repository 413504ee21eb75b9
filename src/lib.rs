//! taskgrid - Distributed task scheduler
//!
//! Schedulers elect a single leader that moves tasks from a shared queue to
//! per-worker queues. Workers execute each task id at most once per claim and
//! report their health through a lease-bound discovery entry.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`models`] - Task and status documents
//! - [`coordination`] - Leases, discovery keys and prefix watches
//! - [`queue`] - Task queues, marker queue, claim keys, delayed set
//! - [`scheduler`] - Election, worker pool, dispatch, recovery
//! - [`worker`] - Registration, execution loop, health
//! - [`storage`] - Task status and execution log (PostgreSQL)
//! - [`prediction`] - Placement hints from the prediction service
//! - [`metrics`] - Prometheus counters
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use taskgrid::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let queue = RedisQueue::connect("redis://127.0.0.1:6379", 8).await?;
//!     let task = Task::new("echo", "hello");
//!     taskgrid::scheduler::submit(&queue, &QueueNames::default(), &task, None).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordination;
pub mod error;
pub mod metrics;
pub mod models;
pub mod prediction;
pub mod queue;
pub mod scheduler;
pub mod shutdown;
pub mod storage;
pub mod worker;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::coordination::{
        CoordinationClient, MemoryCoordination, RedisCoordination, RedisCoordinationConfig,
        Session,
    };
    pub use crate::error::{Error, ErrorCategory, Result, TaskgridErrorTrait};
    pub use crate::models::{HealthState, Task, TaskStatus, WorkerStatus};
    pub use crate::queue::{MemoryQueue, QueueClient, QueueNames, RedisQueue};
    pub use crate::scheduler::{SchedulerDeps, SchedulerNode, SchedulerSettings};
    pub use crate::storage::{StatusRecorder, TaskStore};
    pub use crate::worker::{HandlerRegistry, WorkerRegistry, WorkerRunner, WorkerSettings};
}

// Direct re-exports for convenience
pub use models::{Task, TaskStatus};
