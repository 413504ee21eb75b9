//! Unified error handling for the taskgrid crate
//!
//! Each boundary module owns a `thiserror` enum. [`Error`] wraps all of them
//! so callers crossing module boundaries can use one type.
//!
//! # Architecture
//!
//! - [`TaskgridErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use taskgrid::error::{Error, TaskgridErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!(error = %err, "Retrying on next tick");
//!     } else {
//!         tracing::error!(error = %err, "Giving up");
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::coordination::CoordinationError;
pub use crate::prediction::PredictionError;
pub use crate::queue::QueueError;
pub use crate::scheduler::election::ElectionError;
pub use crate::storage::StoreError;
pub use crate::worker::executor::ExecutionError;
pub use crate::worker::registry::RegistryError;

/// Common trait for all taskgrid error types
pub trait TaskgridErrorTrait: std::error::Error {
    /// Whether the operation may succeed on the next loop iteration or tick
    fn is_recoverable(&self) -> bool;

    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Discovery store, leases, election
    Coordination,
    /// Task queues and claim keys
    Queue,
    /// Relational task storage
    Storage,
    /// Prediction service
    Prediction,
    /// Configuration and validation errors
    Config,
    /// Task body execution
    Execution,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coordination => "coordination",
            Self::Queue => "queue",
            Self::Storage => "storage",
            Self::Prediction => "prediction",
            Self::Config => "config",
            Self::Execution => "execution",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Module errors
// ============================================================================

impl TaskgridErrorTrait for CoordinationError {
    fn is_recoverable(&self) -> bool {
        CoordinationError::is_recoverable(self)
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Coordination
    }
}

impl TaskgridErrorTrait for QueueError {
    fn is_recoverable(&self) -> bool {
        // Store errors clear up or get retried on the next iteration
        true
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Queue
    }
}

impl TaskgridErrorTrait for StoreError {
    fn is_recoverable(&self) -> bool {
        true
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Storage
    }
}

impl TaskgridErrorTrait for PredictionError {
    fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Client(_) | Self::Decode(_))
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Prediction
    }
}

impl TaskgridErrorTrait for ElectionError {
    fn is_recoverable(&self) -> bool {
        true
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Coordination
    }
}

impl TaskgridErrorTrait for RegistryError {
    fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Encode(_))
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Coordination
    }
}

impl TaskgridErrorTrait for ExecutionError {
    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Execution
    }
}

// ============================================================================
// Unified error
// ============================================================================

/// Unified error type for the taskgrid crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Coordination error: {0}")]
    Coordination(#[from] CoordinationError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Prediction error: {0}")]
    Prediction(#[from] PredictionError),

    #[error("Election error: {0}")]
    Election(#[from] ElectionError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Malformed serialized record; never retried
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl TaskgridErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Coordination(e) => TaskgridErrorTrait::is_recoverable(e),
            Self::Queue(e) => e.is_recoverable(),
            Self::Storage(e) => e.is_recoverable(),
            Self::Prediction(e) => e.is_recoverable(),
            Self::Election(e) => e.is_recoverable(),
            Self::Registry(e) => e.is_recoverable(),
            Self::Execution(e) => e.is_recoverable(),
            Self::Json(_) => false,
            Self::Io(_) => true,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Coordination(e) => e.category(),
            Self::Queue(e) => e.category(),
            Self::Storage(e) => e.category(),
            Self::Prediction(e) => e.category(),
            Self::Election(e) => e.category(),
            Self::Registry(e) => e.category(),
            Self::Execution(e) => e.category(),
            Self::Json(_) => ErrorCategory::Queue,
            Self::Io(_) => ErrorCategory::Other,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
