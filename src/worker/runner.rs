//! Worker execution loop
//!
//! One consumer per worker pops its dedicated queue. Every delivery is
//! guarded by a claim key so a task id runs at most once per claim TTL, no
//! matter how many times the scheduler or the sweeper redelivers it.
//!
//! ```text
//! pop ─▶ decode ─▶ claim ─┬─ held ──▶ drop marker (duplicate)
//!                         └─ won ───▶ execute ─┬─ ok ───▶ drop marker, Completed
//!                                              └─ err ──▶ release claim, drop marker,
//!                                                         retry or Failed
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::executor::HandlerRegistry;
use super::health::WorkerHealth;
use super::registry::{RegistryError, WorkerRegistry};
use crate::config::Config;
use crate::error::TaskgridErrorTrait;
use crate::metrics;
use crate::models::{Task, TaskLogEntry, TaskStatus, WorkerStatus};
use crate::queue::{QueueClient, QueueNames, QueueResult};
use crate::shutdown;
use crate::storage::StatusRecorder;

/// Pause after a queue store error
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Worker process settings
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub id: String,
    pub names: QueueNames,
    pub workers_prefix: String,
    pub lease_ttl: Duration,
    pub heartbeat: Duration,
    pub claim_ttl: Duration,
    pub failure_threshold: u32,
    pub pop_block: Duration,
}

impl WorkerSettings {
    pub fn from_config(id: impl Into<String>, config: &Config) -> Self {
        Self {
            id: id.into(),
            names: config.queues.clone(),
            workers_prefix: config.coordination.workers_prefix.clone(),
            lease_ttl: config.worker.lease_ttl(),
            heartbeat: config.worker.heartbeat(),
            claim_ttl: config.worker.claim_ttl(),
            failure_threshold: config.worker.failure_threshold,
            pop_block: config.worker.pop_block(),
        }
    }
}

/// What happened to one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Nothing arrived within the pop bound
    Idle,
    /// Entry did not decode and was dropped
    Poison,
    /// Claim already held; execution skipped
    Duplicate { task_id: String },
    Completed { task_id: String },
    /// Execution failed and the task went back onto the main queue
    Retried { task_id: String, attempt: u32 },
    /// Execution failed with no retries left
    Failed { task_id: String },
}

pub struct WorkerRunner {
    settings: WorkerSettings,
    queue: Arc<dyn QueueClient>,
    registry: Arc<WorkerRegistry>,
    handlers: HandlerRegistry,
    recorder: StatusRecorder,
    health: WorkerHealth,
}

impl WorkerRunner {
    pub fn new(
        settings: WorkerSettings,
        queue: Arc<dyn QueueClient>,
        registry: Arc<WorkerRegistry>,
        handlers: HandlerRegistry,
        recorder: StatusRecorder,
    ) -> Self {
        let health = WorkerHealth::new(settings.failure_threshold);
        Self {
            settings,
            queue,
            registry,
            handlers,
            recorder,
            health,
        }
    }

    pub fn id(&self) -> &str {
        &self.settings.id
    }

    pub fn health(&self) -> &WorkerHealth {
        &self.health
    }

    /// Current status document
    pub fn status(&self) -> WorkerStatus {
        WorkerStatus::new(self.settings.id.clone()).with_status(self.health.state())
    }

    /// Register, then consume and heartbeat until shutdown
    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> Result<(), RegistryError> {
        self.registry
            .register(&self.status(), self.settings.lease_ttl)
            .await?;

        let heartbeat = tokio::spawn(self.clone().heartbeat_loop(shutdown_rx.clone()));
        tracing::info!(worker = %self.settings.id, queue = %self.settings.names.worker_queue(&self.settings.id), "Worker started");

        // A delivery in progress always runs to the end; the pop itself is bounded
        while !shutdown::is_signalled(&shutdown_rx) {
            if let Err(e) = self.poll_once().await {
                tracing::warn!(worker = %self.settings.id, error = %e, "Failed to read task queue");
                tokio::select! {
                    _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                    _ = shutdown::signalled(&mut shutdown_rx) => {}
                }
            }
        }

        if let Err(e) = heartbeat.await {
            tracing::warn!(error = %e, "Heartbeat task ended abnormally");
        }
        self.registry.unregister().await;
        tracing::info!(worker = %self.settings.id, "Worker stopped");
        Ok(())
    }

    /// Pop at most one delivery and process it
    pub async fn poll_once(&self) -> QueueResult<DeliveryOutcome> {
        let queue = self.settings.names.worker_queue(&self.settings.id);
        match self.queue.blocking_pop(&queue, self.settings.pop_block).await? {
            Some(raw) => self.process(&raw).await,
            None => Ok(DeliveryOutcome::Idle),
        }
    }

    /// Handle one delivered entry
    ///
    /// Only the claim write can fail this call; the marker entry is then
    /// left for the sweeper.
    pub async fn process(&self, raw: &str) -> QueueResult<DeliveryOutcome> {
        let worker = self.settings.id.as_str();

        let task = match Task::decode(raw) {
            Ok(task) => task,
            Err(e) => {
                tracing::warn!(worker = %worker, error = %e, "Dropping undecodable task");
                metrics::record_poison(worker);
                return Ok(DeliveryOutcome::Poison);
            }
        };

        let claim_key = self.settings.names.claim_key(&task.id);
        let claimed = self
            .queue
            .set_if_absent(&claim_key, worker, self.settings.claim_ttl)
            .await?;

        if !claimed {
            tracing::info!(worker = %worker, task_id = %task.id, "Task already executed, skipping");
            self.remove_marker(raw).await;
            metrics::record_duplicate(worker);
            return Ok(DeliveryOutcome::Duplicate { task_id: task.id });
        }

        tracing::debug!(worker = %worker, task_id = %task.id, task_type = %task.task_type, "Executing task");
        let result = {
            let _timer = metrics::start_execution_timer(worker, &task.task_type);
            self.handlers.execute(&task).await
        };

        match result {
            Ok(output) => {
                self.remove_marker(raw).await;
                self.recorder.status(&task.id, TaskStatus::Completed).await;
                self.recorder
                    .log(TaskLogEntry::new(&task.id, worker, output))
                    .await;
                metrics::record_execution(worker, true);

                if self.health.record_success() {
                    tracing::info!(worker = %worker, "Worker recovered");
                    self.publish_status().await;
                }

                tracing::info!(worker = %worker, task_id = %task.id, "Task completed");
                Ok(DeliveryOutcome::Completed { task_id: task.id })
            }
            Err(e) => {
                tracing::warn!(worker = %worker, task_id = %task.id, error = %e, "Task execution failed");

                if let Err(e) = self.queue.delete_key(&claim_key).await {
                    tracing::warn!(worker = %worker, task_id = %task.id, error = %e, "Failed to release claim");
                }
                self.remove_marker(raw).await;
                self.recorder
                    .log(TaskLogEntry::new(&task.id, worker, format!("failed: {e}")))
                    .await;
                metrics::record_execution(worker, false);

                if self.health.record_failure() {
                    tracing::error!(
                        worker = %worker,
                        failures = self.health.consecutive_failures(),
                        "Worker marked failed"
                    );
                    self.publish_status().await;
                }

                let retryable = e.is_recoverable();
                if !retryable {
                    tracing::warn!(task_id = %task.id, category = %e.category(), "Failure is not retryable");
                }
                Ok(self.retry_or_fail(task, retryable).await)
            }
        }
    }

    async fn retry_or_fail(&self, mut task: Task, retryable: bool) -> DeliveryOutcome {
        if retryable && task.can_retry() {
            task.retries += 1;
            let requeued = match task.encode() {
                Ok(raw) => self.queue.push_back(&self.settings.names.main, &raw).await,
                Err(e) => {
                    tracing::warn!(task_id = %task.id, error = %e, "Failed to encode retried task");
                    Ok(())
                }
            };
            match requeued {
                Ok(()) => {
                    tracing::info!(task_id = %task.id, attempt = task.retries, "Task requeued for retry");
                    return DeliveryOutcome::Retried {
                        attempt: task.retries,
                        task_id: task.id,
                    };
                }
                Err(e) => {
                    tracing::warn!(task_id = %task.id, error = %e, "Failed to requeue task for retry");
                }
            }
        }

        self.recorder.status(&task.id, TaskStatus::Failed).await;
        DeliveryOutcome::Failed { task_id: task.id }
    }

    /// Republish the status document, registering again if the lease is gone
    pub async fn publish_status(&self) {
        let status = self.status();
        match self.registry.update(&status).await {
            Ok(()) => {}
            Err(RegistryError::LeaseLost | RegistryError::NotRegistered) => {
                tracing::error!(worker = %self.settings.id, "Registration lease lost, registering again");
                if let Err(e) = self
                    .registry
                    .register(&status, self.settings.lease_ttl)
                    .await
                {
                    tracing::warn!(worker = %self.settings.id, error = %e, "Failed to register worker");
                }
            }
            Err(e) => {
                tracing::warn!(worker = %self.settings.id, error = %e, "Failed to update heartbeat");
            }
        }
    }

    async fn heartbeat_loop(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.settings.heartbeat);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.publish_status().await,
                _ = shutdown::signalled(&mut shutdown_rx) => break,
            }
        }
    }

    async fn remove_marker(&self, raw: &str) {
        if let Err(e) = self.queue.remove(&self.settings.names.processing, raw).await {
            tracing::warn!(worker = %self.settings.id, error = %e, "Failed to remove marker entry");
        }
    }
}
