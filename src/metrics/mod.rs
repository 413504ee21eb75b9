//! Prometheus metrics for schedulers and workers
//!
//! - Scheduler: dispatch outcomes, recovery, evictions, pool size, leadership
//! - Worker: executions, failures, duplicates suppressed, execution duration
//!
//! # Usage
//!
//! Call `init_metrics()` at process startup. Until it has run (or if it
//! failed) every recording function is a no-op.

use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec,
    CounterVec, Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

struct SchedulerMetrics {
    dispatch_outcomes: CounterVec,
    recovered: CounterVec,
    evictions: CounterVec,
    promoted: CounterVec,
    pool_size: Gauge,
    is_leader: GaugeVec,
}

struct WorkerMetrics {
    executions: CounterVec,
    duplicates: CounterVec,
    poison: CounterVec,
    execution_duration: HistogramVec,
}

static SCHEDULER_METRICS: OnceLock<SchedulerMetrics> = OnceLock::new();

static WORKER_METRICS: OnceLock<WorkerMetrics> = OnceLock::new();

static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Register all metrics with the default registry
///
/// Safe to call more than once; only the first call registers.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let scheduler = SchedulerMetrics {
        dispatch_outcomes: register_counter_vec!(
            "taskgrid_scheduler_dispatch_total",
            "Dispatch iterations by outcome",
            &["outcome"]
        )?,
        recovered: register_counter_vec!(
            "taskgrid_scheduler_recovered_total",
            "Marker entries handled by the recovery sweeper",
            &["action"]
        )?,
        evictions: register_counter_vec!(
            "taskgrid_scheduler_evictions_total",
            "Workers evicted after repeated push failures",
            &["worker"]
        )?,
        promoted: register_counter_vec!(
            "taskgrid_scheduler_delayed_promoted_total",
            "Delayed tasks promoted to the main queue",
            &["scheduler"]
        )?,
        pool_size: register_gauge!(
            "taskgrid_scheduler_pool_size",
            "Workers currently in the leader's pool"
        )?,
        is_leader: register_gauge_vec!(
            "taskgrid_scheduler_is_leader",
            "Whether this scheduler holds leadership (1 = yes, 0 = no)",
            &["scheduler"]
        )?,
    };

    let worker = WorkerMetrics {
        executions: register_counter_vec!(
            "taskgrid_worker_executions_total",
            "Task executions by worker and result",
            &["worker", "result"]
        )?,
        duplicates: register_counter_vec!(
            "taskgrid_worker_duplicates_total",
            "Deliveries suppressed because the task was already claimed",
            &["worker"]
        )?,
        poison: register_counter_vec!(
            "taskgrid_worker_poison_total",
            "Undecodable deliveries dropped",
            &["worker"]
        )?,
        execution_duration: register_histogram_vec!(
            "taskgrid_worker_execution_duration_seconds",
            "Task execution duration in seconds",
            &["worker", "task_type"],
            vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
        )?,
    };

    SCHEDULER_METRICS
        .set(scheduler)
        .map_err(|_| "Scheduler metrics already initialized")?;
    WORKER_METRICS
        .set(worker)
        .map_err(|_| "Worker metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    SCHEDULER_METRICS.get().is_some() && WORKER_METRICS.get().is_some()
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

// ============================================================================
// Scheduler
// ============================================================================

/// Record one dispatch iteration
pub fn record_dispatch(outcome: &str) {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.dispatch_outcomes.with_label_values(&[outcome]).inc();
    }
}

/// Record a sweeper action (`requeued`, `poison`, `skipped`)
pub fn record_recovery(action: &str, count: usize) {
    if count == 0 {
        return;
    }
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.recovered
            .with_label_values(&[action])
            .inc_by(count as f64);
    }
}

pub fn record_eviction(worker: &str) {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.evictions.with_label_values(&[worker]).inc();
    }
}

pub fn record_promoted(scheduler: &str, count: usize) {
    if count == 0 {
        return;
    }
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.promoted
            .with_label_values(&[scheduler])
            .inc_by(count as f64);
    }
}

pub fn update_pool_size(size: usize) {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.pool_size.set(size as f64);
    }
}

pub fn update_leadership(scheduler: &str, is_leader: bool) {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.is_leader
            .with_label_values(&[scheduler])
            .set(if is_leader { 1.0 } else { 0.0 });
    }
}

// ============================================================================
// Worker
// ============================================================================

/// Record a finished execution
pub fn record_execution(worker: &str, success: bool) {
    if let Some(m) = WORKER_METRICS.get() {
        let result = if success { "success" } else { "failure" };
        m.executions.with_label_values(&[worker, result]).inc();
    }
}

pub fn record_duplicate(worker: &str) {
    if let Some(m) = WORKER_METRICS.get() {
        m.duplicates.with_label_values(&[worker]).inc();
    }
}

pub fn record_poison(worker: &str) {
    if let Some(m) = WORKER_METRICS.get() {
        m.poison.with_label_values(&[worker]).inc();
    }
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start timing a task execution
pub fn start_execution_timer(worker: &str, task_type: &str) -> MetricsTimer {
    match WORKER_METRICS.get() {
        Some(m) => MetricsTimer {
            timer: Some(
                m.execution_duration
                    .with_label_values(&[worker, task_type])
                    .start_timer(),
            ),
        },
        None => MetricsTimer::noop(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
        assert!(metrics_initialized());
    }

    #[test]
    fn test_recording_after_init() {
        let _ = init_metrics();
        record_dispatch("scheduled");
        record_recovery("requeued", 2);
        record_eviction("w1");
        record_promoted("s1", 3);
        update_pool_size(2);
        update_leadership("s1", true);
        record_execution("w1", true);
        record_duplicate("w1");
        record_poison("w1");
        let _timer = start_execution_timer("w1", "email");

        let text = encode_metrics().unwrap();
        assert!(text.contains("taskgrid_scheduler_dispatch_total"));
    }

    #[test]
    fn test_zero_counts_are_skipped() {
        record_recovery("requeued", 0);
        record_promoted("s1", 0);
    }
}
