//! Recovery sweeper
//!
//! Scans the marker queue on a fixed tick. Undecodable entries are dropped;
//! entries whose task was created longer ago than the staleness threshold go
//! back onto the head of the main queue and leave the marker queue.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::metrics;
use crate::models::Task;
use crate::queue::{QueueClient, QueueNames, QueueResult};
use crate::shutdown;

/// Counts from one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Marker entries examined
    pub scanned: usize,
    /// Undecodable entries dropped
    pub poison: usize,
    /// Stale entries pushed back onto the main queue
    pub requeued: usize,
    /// Stale entries already waiting in the main queue; only the marker was removed
    pub skipped: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.poison == 0 && self.requeued == 0 && self.skipped == 0
    }
}

pub struct RecoverySweeper {
    queue: Arc<dyn QueueClient>,
    names: QueueNames,
    stale_threshold: Duration,
}

impl RecoverySweeper {
    pub fn new(queue: Arc<dyn QueueClient>, names: QueueNames, stale_threshold: Duration) -> Self {
        Self {
            queue,
            names,
            stale_threshold,
        }
    }

    /// Sweep once per tick until shutdown
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        tracing::info!(
            interval_secs = interval.as_secs(),
            threshold_secs = self.stale_threshold.as_secs(),
            "Recovery sweeper started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep().await {
                        Ok(report) if report.is_empty() => {
                            tracing::debug!(scanned = report.scanned, "Sweep found nothing to recover");
                        }
                        Ok(report) => {
                            tracing::info!(
                                scanned = report.scanned,
                                poison = report.poison,
                                requeued = report.requeued,
                                skipped = report.skipped,
                                "Sweep recovered tasks"
                            );
                        }
                        Err(e) => tracing::warn!(error = %e, "Failed to read processing queue"),
                    }
                }
                _ = shutdown::signalled(&mut shutdown) => break,
            }
        }

        tracing::info!("Recovery sweeper stopped");
    }

    pub async fn sweep(&self) -> QueueResult<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    /// Sweep with an explicit notion of now
    ///
    /// Only reading the marker queue can fail the sweep; per-entry errors are
    /// logged and the entry is retried on the next tick.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> QueueResult<SweepReport> {
        let entries = self.queue.range_all(&self.names.processing).await?;
        let mut report = SweepReport {
            scanned: entries.len(),
            ..Default::default()
        };

        for raw in entries {
            let task = match Task::decode(&raw) {
                Ok(task) => task,
                Err(e) => {
                    tracing::warn!(error = %e, "Removing undecodable entry from processing queue");
                    if self.remove_marker(&raw).await {
                        report.poison += 1;
                    }
                    continue;
                }
            };

            if !task.is_stale_at(now, self.stale_threshold) {
                continue;
            }

            match self.queue.contains(&self.names.main, &raw).await {
                Ok(true) => {
                    tracing::debug!(task_id = %task.id, "Stale task already queued, dropping marker copy");
                    if self.remove_marker(&raw).await {
                        report.skipped += 1;
                    }
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(task_id = %task.id, error = %e, "Failed to check main queue");
                    continue;
                }
            }

            if let Err(e) = self.queue.push_front(&self.names.main, &raw).await {
                tracing::warn!(task_id = %task.id, error = %e, "Failed to requeue stale task");
                continue;
            }
            self.remove_marker(&raw).await;
            report.requeued += 1;
            tracing::info!(task_id = %task.id, "Requeued stale task");
        }

        metrics::record_recovery("poison", report.poison);
        metrics::record_recovery("requeued", report.requeued);
        metrics::record_recovery("skipped", report.skipped);

        Ok(report)
    }

    async fn remove_marker(&self, raw: &str) -> bool {
        match self.queue.remove(&self.names.processing, raw).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to remove entry from processing queue");
                false
            }
        }
    }
}
