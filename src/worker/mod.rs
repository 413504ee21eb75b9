//! Worker side
//!
//! A worker registers itself in the discovery namespace, consumes its
//! dedicated queue and reports its health through a periodic heartbeat.
//!
//! - [`registry`] - Lease-bound discovery entry
//! - [`health`] - Consecutive failure bookkeeping
//! - [`executor`] - Task handlers keyed by task type
//! - [`runner`] - Execution loop with claim-based deduplication

pub mod executor;
pub mod health;
pub mod registry;
pub mod runner;

pub use executor::{ExecutionError, HandlerRegistry, SimulatedHandler, TaskHandler};
pub use health::WorkerHealth;
pub use registry::{RegistryError, RegistryResult, WorkerRegistry};
pub use runner::{DeliveryOutcome, WorkerRunner, WorkerSettings};
