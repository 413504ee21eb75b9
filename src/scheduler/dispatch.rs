//! Dispatch engine
//!
//! Runs on the leader only. One iteration moves one task:
//!
//! ```text
//! main queue --BLMOVE--> marker queue --push--> worker queue
//! ```
//!
//! The marker entry stays in place after a successful push; the worker
//! removes it once the task is done, or the recovery sweeper requeues it
//! when it goes stale. Marker entries are forwarded verbatim so removal by
//! value matches exactly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::election::LeaderFlag;
use super::node::StatusDoc;
use super::placement::{Placement, Placer};
use super::pool::WorkerPool;
use crate::error::TaskgridErrorTrait;
use crate::metrics;
use crate::models::{PredictionRequest, Task, TaskStatus};
use crate::prediction::Predictor;
use crate::queue::{QueueClient, QueueNames, QueueResult};
use crate::shutdown;
use crate::storage::StatusRecorder;

/// Dispatch settings
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Upper bound of one blocking move
    pub pop_block: Duration,

    /// Pause after a requeue or a queue error
    pub idle_backoff: Duration,

    /// Consecutive push failures before eviction
    pub max_worker_failures: u32,

    /// Bound on one prediction call
    pub prediction_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            pop_block: Duration::from_secs(1),
            idle_backoff: Duration::from_millis(500),
            max_worker_failures: 3,
            prediction_timeout: Duration::from_secs(2),
        }
    }
}

/// Result of one dispatch iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Nothing arrived within the pop bound
    Idle,
    /// Entry did not decode and was dropped
    Poison,
    /// Task was past its expiry and was dropped
    Expired { task_id: String },
    /// Prediction failed; the marker entry is left for the sweeper
    PredictionFailed { task_id: String },
    /// No eligible destination; the task went back onto the main queue
    Requeued { task_id: String },
    /// Task handed to a worker's queue
    Scheduled { task_id: String, worker: String },
    /// Push to the worker's queue failed; the task went back onto the main queue
    PushFailed {
        task_id: String,
        worker: String,
        evicted: bool,
    },
}

impl DispatchOutcome {
    /// Label used for metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Poison => "poison",
            Self::Expired { .. } => "expired",
            Self::PredictionFailed { .. } => "prediction_failed",
            Self::Requeued { .. } => "requeued",
            Self::Scheduled { .. } => "scheduled",
            Self::PushFailed { .. } => "push_failed",
        }
    }
}

/// Main scheduling loop of a leadership term
pub struct Dispatcher {
    queue: Arc<dyn QueueClient>,
    names: QueueNames,
    pool: Arc<WorkerPool>,
    placer: Placer,
    predictor: Arc<dyn Predictor>,
    recorder: StatusRecorder,
    status: Arc<StatusDoc>,
    config: DispatchConfig,
    failures: HashMap<String, u32>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<dyn QueueClient>,
        names: QueueNames,
        pool: Arc<WorkerPool>,
        placer: Placer,
        predictor: Arc<dyn Predictor>,
        recorder: StatusRecorder,
        status: Arc<StatusDoc>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            queue,
            names,
            pool,
            placer,
            predictor,
            recorder,
            status,
            config,
            failures: HashMap::new(),
        }
    }

    /// Consecutive push failures recorded for a worker
    pub fn failure_count(&self, worker: &str) -> u32 {
        self.failures.get(worker).copied().unwrap_or(0)
    }

    /// Number of workers with a non-zero failure count
    pub fn tracked_workers(&self) -> usize {
        self.failures.len()
    }

    /// Run iterations while leadership is held and no stop was requested
    pub async fn run(mut self, leader: LeaderFlag, mut stop: watch::Receiver<bool>) {
        tracing::info!("Dispatch loop started");

        while leader.is_leader() && !shutdown::is_signalled(&stop) {
            let pause = match self.dispatch_once().await {
                Ok(outcome) => {
                    metrics::record_dispatch(outcome.label());
                    matches!(outcome, DispatchOutcome::Requeued { .. })
                }
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(category = %e.category(), error = %e, "Dispatch iteration failed");
                    true
                }
                Err(e) => {
                    tracing::error!(category = %e.category(), error = %e, "Dispatch iteration failed");
                    true
                }
            };

            if pause {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.idle_backoff) => {}
                    _ = shutdown::signalled(&mut stop) => {}
                }
            }
        }

        tracing::info!("Dispatch loop stopped");
    }

    /// Move at most one task from the main queue towards a worker
    pub async fn dispatch_once(&mut self) -> QueueResult<DispatchOutcome> {
        self.status.heartbeat().await;

        let Some(raw) = self
            .queue
            .blocking_move(&self.names.main, &self.names.processing, self.config.pop_block)
            .await?
        else {
            return Ok(DispatchOutcome::Idle);
        };

        let task = match Task::decode(&raw) {
            Ok(task) => task,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping undecodable task");
                self.remove_marker(&raw).await;
                return Ok(DispatchOutcome::Poison);
            }
        };

        tracing::debug!(task_id = %task.id, task_type = %task.task_type, "Task popped");

        if task.is_expired() {
            tracing::info!(task_id = %task.id, "Task expired, skipping");
            self.remove_marker(&raw).await;
            self.recorder.status(&task.id, TaskStatus::Expired).await;
            return Ok(DispatchOutcome::Expired { task_id: task.id });
        }

        let request = PredictionRequest::for_task(&task);
        let prediction =
            match tokio::time::timeout(self.config.prediction_timeout, self.predictor.predict(&request))
                .await
            {
                Ok(Ok(prediction)) => prediction,
                Ok(Err(e)) => {
                    tracing::warn!(task_id = %task.id, error = %e, "Prediction failed");
                    return Ok(DispatchOutcome::PredictionFailed { task_id: task.id });
                }
                Err(_) => {
                    tracing::warn!(task_id = %task.id, "Prediction timed out");
                    return Ok(DispatchOutcome::PredictionFailed { task_id: task.id });
                }
            };

        let placement = self.placer.choose(&prediction).await;
        let worker = match placement {
            Some(Placement { worker, .. }) if self.pool.exists(&worker).await => worker,
            other => {
                let worker = other.map(|p| p.worker).unwrap_or_default();
                tracing::warn!(task_id = %task.id, worker = %worker, "Worker not registered or online, requeueing task");
                if let Err(e) = self.queue.push_back(&self.names.main, &raw).await {
                    tracing::warn!(task_id = %task.id, error = %e, "Failed to requeue task");
                }
                return Ok(DispatchOutcome::Requeued { task_id: task.id });
            }
        };

        match self
            .queue
            .push_back(&self.names.worker_queue(&worker), &raw)
            .await
        {
            Ok(()) => {
                self.failures.remove(&worker);
                tracing::info!(task_id = %task.id, worker = %worker, "Task scheduled");
                Ok(DispatchOutcome::Scheduled {
                    task_id: task.id,
                    worker,
                })
            }
            Err(e) => {
                tracing::warn!(task_id = %task.id, worker = %worker, error = %e, "Failed to push task to worker");

                if let Err(e) = self.queue.push_back(&self.names.main, &raw).await {
                    tracing::warn!(task_id = %task.id, error = %e, "Failed to requeue task");
                }
                self.remove_marker(&raw).await;

                let evicted = self.record_push_failure(&worker).await;
                Ok(DispatchOutcome::PushFailed {
                    task_id: task.id,
                    worker,
                    evicted,
                })
            }
        }
    }

    /// Count a push failure; evicts and resets at the threshold
    async fn record_push_failure(&mut self, worker: &str) -> bool {
        let count = self.failures.entry(worker.to_string()).or_insert(0);
        *count += 1;

        if *count < self.config.max_worker_failures {
            return false;
        }

        tracing::error!(
            worker = %worker,
            failures = *count,
            "Worker marked as unhealthy, removing from pool"
        );
        self.failures.remove(worker);
        self.pool.remove(worker).await;
        metrics::record_eviction(worker);
        true
    }

    async fn remove_marker(&self, raw: &str) {
        if let Err(e) = self.queue.remove(&self.names.processing, raw).await {
            tracing::warn!(error = %e, "Failed to remove marker entry");
        }
    }
}
