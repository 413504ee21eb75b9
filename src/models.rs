// Core data structures shared by the scheduler and the workers

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

// ============================================================================
// Task
// ============================================================================

/// Lifecycle status of a task as recorded in storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Expired,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Get string representation (matches the value stored in the tasks table)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Expired => "Expired",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        }
    }

    /// Whether the status is final
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A unit of work travelling through the queues
///
/// The payload is opaque to the scheduler. Every field except `id` has a
/// serde default so that records written by older ingestion code still decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Externally assigned unique identifier
    pub id: String,

    /// Type tag used to pick a handler on the worker
    #[serde(rename = "type", default)]
    pub task_type: String,

    /// Uninterpreted payload
    #[serde(default)]
    pub payload: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,

    /// Number of execution attempts already retried
    #[serde(default)]
    pub retries: u32,

    /// Maximum number of retries after a failed execution
    #[serde(default)]
    pub max_retry: u32,

    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    /// Tasks past this instant are never dispatched
    #[serde(default)]
    pub expire_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new pending task with a random id and the current creation time
    pub fn new(task_type: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_type: task_type.into(),
            payload: payload.into(),
            status: Some(TaskStatus::Pending),
            retries: 0,
            max_retry: 0,
            priority: 0,
            created_at: Some(Utc::now()),
            expire_at: None,
        }
    }

    /// Set the identifier
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Expire the task `ttl` after its creation time
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        let base = self.created_at.unwrap_or_else(Utc::now);
        self.expire_at = ChronoDuration::from_std(ttl).ok().map(|ttl| base + ttl);
        self
    }

    /// Set an absolute expiry time
    pub fn with_expire_at(mut self, expire_at: DateTime<Utc>) -> Self {
        self.expire_at = Some(expire_at);
        self
    }

    /// Set the creation time
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Set the retry budget
    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Decode a serialized queue entry
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Serialize for a queue
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Check whether the task expired at the given instant
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expire_at, Some(expire_at) if now > expire_at)
    }

    /// Check whether the task is expired now
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Check whether the task was created more than `threshold` before `now`
    ///
    /// Tasks without a creation time are never stale.
    pub fn is_stale_at(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        let threshold = match ChronoDuration::from_std(threshold) {
            Ok(threshold) => threshold,
            Err(_) => return false,
        };
        matches!(self.created_at, Some(created_at) if now - created_at > threshold)
    }

    /// Whether another attempt is allowed after a failed execution
    pub fn can_retry(&self) -> bool {
        self.retries < self.max_retry
    }

    /// Metadata sent to the prediction service
    pub fn prediction_metadata(&self) -> HashMap<String, String> {
        let mut meta = HashMap::new();
        meta.insert("TaskId".to_string(), self.id.clone());
        meta.insert("TaskType".to_string(), self.task_type.clone());
        meta.insert("Priority".to_string(), self.priority.to_string());
        meta
    }
}

// ============================================================================
// Worker / Scheduler status documents
// ============================================================================

/// Self-reported worker health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    #[default]
    Ok,
    Failed,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Failed => "failed",
        }
    }

    /// Check if the worker should receive work
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

/// Discovery document published by each worker under `/workers/<id>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub id: String,

    #[serde(default)]
    pub status: HealthState,

    pub heartbeat: DateTime<Utc>,
}

impl WorkerStatus {
    /// Create a healthy status with the current heartbeat
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: HealthState::Ok,
            heartbeat: Utc::now(),
        }
    }

    /// Set the health state
    pub fn with_status(mut self, status: HealthState) -> Self {
        self.status = status;
        self
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Run state of a scheduler process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Stopped,
}

/// Discovery document published by each scheduler under `/schedulers/<id>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub id: String,
    pub status: RunState,
    pub is_leader: bool,
    pub heartbeat: DateTime<Utc>,
}

impl SchedulerStatus {
    /// Create a running, non-leader status
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: RunState::Running,
            is_leader: false,
            heartbeat: Utc::now(),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ============================================================================
// Prediction DTOs
// ============================================================================

/// Request sent to the prediction service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub task_id: String,
    pub metadata: HashMap<String, String>,
}

impl PredictionRequest {
    /// Build the request for a task
    pub fn for_task(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            metadata: task.prediction_metadata(),
        }
    }
}

/// Response returned by the prediction service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PredictionResponse {
    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub estimated_time: f64,

    /// Empty when the service has no opinion
    #[serde(default)]
    pub recommended_worker: String,
}

impl PredictionResponse {
    /// Create a response recommending the given worker
    pub fn recommending(worker: impl Into<String>) -> Self {
        Self {
            recommended_worker: worker.into(),
            ..Default::default()
        }
    }

    /// The recommended worker, if any
    pub fn recommendation(&self) -> Option<&str> {
        let worker = self.recommended_worker.trim();
        if worker.is_empty() {
            None
        } else {
            Some(worker)
        }
    }
}

// ============================================================================
// Execution log
// ============================================================================

/// Append-only execution log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLogEntry {
    pub task_id: String,
    pub executed_by: String,
    pub result: String,
}

impl TaskLogEntry {
    pub fn new(
        task_id: impl Into<String>,
        executed_by: impl Into<String>,
        result: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            executed_by: executed_by.into(),
            result: result.into(),
        }
    }
}
