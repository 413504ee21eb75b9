//! Task body execution
//!
//! Handlers are looked up by the task's type tag. Types without a handler go
//! to the default handler when one is set.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::models::Task;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("No handler for task type: {0}")]
    UnknownType(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Task failed: {0}")]
    Failed(String),
}

/// Runs the body of one kind of task; the returned text is logged as the result
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> Result<String, ExecutionError>;
}

/// Sleeps for a fixed time and echoes the payload
#[derive(Debug, Clone)]
pub struct SimulatedHandler {
    duration: Duration,
}

impl SimulatedHandler {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl TaskHandler for SimulatedHandler {
    async fn handle(&self, task: &Task) -> Result<String, ExecutionError> {
        tokio::time::sleep(self.duration).await;
        Ok(format!("processed: {}", task.payload))
    }
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    fallback: Option<Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose only handler is the given default
    pub fn with_default(handler: Arc<dyn TaskHandler>) -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: Some(handler),
        }
    }

    pub fn register(&mut self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(task_type.into(), handler);
    }

    pub fn set_default(&mut self, handler: Arc<dyn TaskHandler>) {
        self.fallback = Some(handler);
    }

    pub fn handles(&self, task_type: &str) -> bool {
        self.fallback.is_some() || self.handlers.contains_key(task_type)
    }

    pub async fn execute(&self, task: &Task) -> Result<String, ExecutionError> {
        let handler = self
            .handlers
            .get(&task.task_type)
            .or(self.fallback.as_ref())
            .ok_or_else(|| ExecutionError::UnknownType(task.task_type.clone()))?;

        handler.handle(task).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    #[async_trait]
    impl TaskHandler for Upper {
        async fn handle(&self, task: &Task) -> Result<String, ExecutionError> {
            if task.payload.is_empty() {
                return Err(ExecutionError::InvalidPayload("empty".to_string()));
            }
            Ok(task.payload.to_uppercase())
        }
    }

    #[tokio::test]
    async fn test_dispatch_by_type() {
        let mut registry = HandlerRegistry::with_default(Arc::new(SimulatedHandler::new(Duration::ZERO)));
        registry.register("upper", Arc::new(Upper));

        let out = registry.execute(&Task::new("upper", "abc")).await.unwrap();
        assert_eq!(out, "ABC");

        let out = registry.execute(&Task::new("other", "abc")).await.unwrap();
        assert_eq!(out, "processed: abc");
    }

    #[tokio::test]
    async fn test_unknown_type_without_default() {
        let registry = HandlerRegistry::new();
        assert!(!registry.handles("x"));
        let err = registry.execute(&Task::new("x", "p")).await.unwrap_err();
        assert!(matches!(err, ExecutionError::UnknownType(t) if t == "x"));
    }

    #[tokio::test]
    async fn test_handler_error_propagates() {
        let mut registry = HandlerRegistry::new();
        registry.register("upper", Arc::new(Upper));
        assert!(registry.execute(&Task::new("upper", "")).await.is_err());
    }
}
