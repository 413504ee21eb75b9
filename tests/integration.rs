//! Integration tests entry point
//!
//! This file serves as the entry point for all integration tests.
//! It includes the integration_tests module which contains:
//! - Dispatch scenarios
//! - Worker delivery and deduplication
//! - Leader election and scheduler process lifecycle
//! - Recovery of stale in-flight tasks

mod integration_tests;
