//! In-memory task store

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{StoreError, StoreResult, TaskStore};
use crate::models::{TaskLogEntry, TaskStatus};

/// Task store that keeps statuses and logs in memory
#[derive(Default)]
pub struct MemoryTaskStore {
    statuses: Mutex<HashMap<String, TaskStatus>>,
    logs: Mutex<Vec<TaskLogEntry>>,
    failing: AtomicBool,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail while `failing` is set
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn status_of(&self, task_id: &str) -> Option<TaskStatus> {
        self.statuses
            .lock()
            .ok()
            .and_then(|statuses| statuses.get(task_id).copied())
    }

    pub fn logs(&self) -> Vec<TaskLogEntry> {
        self.logs.lock().map(|logs| logs.clone()).unwrap_or_default()
    }

    pub fn logs_for(&self, task_id: &str) -> Vec<TaskLogEntry> {
        self.logs()
            .into_iter()
            .filter(|entry| entry.task_id == task_id)
            .collect()
    }

    fn check(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("memory store lock poisoned".to_string())
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn update_status(&self, task_id: &str, status: TaskStatus) -> StoreResult<()> {
        self.check()?;
        self.statuses
            .lock()
            .map_err(poisoned)?
            .insert(task_id.to_string(), status);
        Ok(())
    }

    async fn append_log(&self, entry: &TaskLogEntry) -> StoreResult<()> {
        self.check()?;
        self.logs.lock().map_err(poisoned)?.push(entry.clone());
        Ok(())
    }
}
