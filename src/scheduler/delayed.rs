//! Delayed tasks
//!
//! Tasks meant to run later wait in a sorted set scored by their due time in
//! unix seconds. The leader promotes due entries onto the main queue in small
//! batches. Promotion pops from the set before pushing, so two promoters never
//! move the same entry.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::metrics;
use crate::models::Task;
use crate::queue::{QueueClient, QueueError, QueueNames, QueueResult};
use crate::shutdown;

/// Enqueue a task now, or park it in the delayed set until `delay` elapses
pub async fn submit(
    queue: &dyn QueueClient,
    names: &QueueNames,
    task: &Task,
    delay: Option<Duration>,
) -> QueueResult<()> {
    let raw = task
        .encode()
        .map_err(|e| QueueError::Backend(format!("failed to encode task: {e}")))?;

    match delay.filter(|d| !d.is_zero()) {
        Some(delay) => {
            let due = Utc::now().timestamp() + delay.as_secs() as i64;
            queue.schedule(&names.delayed, &raw, due).await?;
            tracing::info!(task_id = %task.id, due, "Task scheduled for later");
        }
        None => {
            queue.push_back(&names.main, &raw).await?;
            tracing::info!(task_id = %task.id, "Task enqueued");
        }
    }
    Ok(())
}

/// Moves due delayed tasks onto the main queue
pub struct DelayedPromoter {
    queue: Arc<dyn QueueClient>,
    names: QueueNames,
    batch: usize,
    scheduler_id: String,
}

impl DelayedPromoter {
    pub fn new(
        queue: Arc<dyn QueueClient>,
        names: QueueNames,
        batch: usize,
        scheduler_id: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            names,
            batch: batch.max(1),
            scheduler_id: scheduler_id.into(),
        }
    }

    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.promote_due().await {
                        Ok(0) => {}
                        Ok(count) => tracing::debug!(count, "Promoted delayed tasks"),
                        Err(e) => tracing::warn!(error = %e, "Failed to promote delayed tasks"),
                    }
                }
                _ = shutdown::signalled(&mut shutdown) => break,
            }
        }

        tracing::debug!("Delayed promoter stopped");
    }

    pub async fn promote_due(&self) -> QueueResult<usize> {
        self.promote_due_at(Utc::now().timestamp()).await
    }

    /// Promote at most one batch of entries due at or before `now`
    pub async fn promote_due_at(&self, now: i64) -> QueueResult<usize> {
        let due = self
            .queue
            .pop_due(&self.names.delayed, now, self.batch)
            .await?;

        let mut promoted = 0;
        for raw in due {
            match self.queue.push_back(&self.names.main, &raw).await {
                Ok(()) => promoted += 1,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to push delayed task, rescheduling");
                    if let Err(e) = self.queue.schedule(&self.names.delayed, &raw, now).await {
                        tracing::error!(error = %e, "Delayed task lost while rescheduling");
                    }
                }
            }
        }

        metrics::record_promoted(&self.scheduler_id, promoted);
        Ok(promoted)
    }
}
