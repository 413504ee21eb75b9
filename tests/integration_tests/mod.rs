//! Integration tests module
//!
//! End-to-end scenarios run against the in-memory coordination, queue and
//! storage backends, so no external services are needed:
//! - Dispatch from the main queue to worker queues
//! - Worker execution with claim-based deduplication
//! - Leader election across several candidates
//! - Recovery sweeps over the marker queue

pub mod dispatch_test;
pub mod election_test;
pub mod fixtures;
pub mod recovery_test;
pub mod worker_test;
