//! Self-reported worker health
//!
//! Consecutive execution failures turn the worker `failed` once they reach
//! the threshold; the next success turns it back to `ok`.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::models::HealthState;

#[derive(Debug)]
pub struct WorkerHealth {
    failures: AtomicU32,
    threshold: u32,
}

impl WorkerHealth {
    pub fn new(threshold: u32) -> Self {
        Self {
            failures: AtomicU32::new(0),
            threshold: threshold.max(1),
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> HealthState {
        if self.consecutive_failures() >= self.threshold {
            HealthState::Failed
        } else {
            HealthState::Ok
        }
    }

    /// Reset the failure count; returns `true` if this recovered a failed worker
    pub fn record_success(&self) -> bool {
        self.failures.swap(0, Ordering::SeqCst) >= self.threshold
    }

    /// Count a failure; returns `true` on the transition to failed
    pub fn record_failure(&self) -> bool {
        let count = self.failures.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        count == self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_transition() {
        let health = WorkerHealth::new(3);
        assert!(!health.record_failure());
        assert!(!health.record_failure());
        assert_eq!(health.state(), HealthState::Ok);

        assert!(health.record_failure());
        assert_eq!(health.state(), HealthState::Failed);

        assert!(!health.record_failure());
        assert_eq!(health.state(), HealthState::Failed);
    }

    #[test]
    fn test_success_resets() {
        let health = WorkerHealth::new(2);
        health.record_failure();
        assert!(!health.record_success());

        health.record_failure();
        health.record_failure();
        assert!(health.record_success());
        assert_eq!(health.state(), HealthState::Ok);
        assert_eq!(health.consecutive_failures(), 0);
    }
}
