//! Destination selection
//!
//! Preference order:
//!
//! 1. the predicted worker, if it is a pool member
//! 2. the non-failed member with the shortest dedicated queue, scanning the
//!    pool in round-robin order from the cursor so ties go to the member the
//!    rotation would pick next
//! 3. round-robin, skipping failed members, for at most one full cycle
//!
//! A worker whose status document is missing or unreadable is treated as
//! ineligible for steps 2 and 3.

use std::sync::Arc;

use super::pool::WorkerPool;
use crate::coordination::CoordinationClient;
use crate::models::{HealthState, PredictionResponse, WorkerStatus};
use crate::queue::{QueueClient, QueueNames};

/// Which step produced a placement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementSource {
    Recommended,
    LeastLoaded,
    RoundRobin,
}

/// Chosen destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub worker: String,
    pub source: PlacementSource,
}

/// Picks destination workers for tasks
pub struct Placer {
    pool: Arc<WorkerPool>,
    coordination: Arc<dyn CoordinationClient>,
    queue: Arc<dyn QueueClient>,
    workers_prefix: String,
    names: QueueNames,
}

impl Placer {
    pub fn new(
        pool: Arc<WorkerPool>,
        coordination: Arc<dyn CoordinationClient>,
        queue: Arc<dyn QueueClient>,
        workers_prefix: impl Into<String>,
        names: QueueNames,
    ) -> Self {
        Self {
            pool,
            coordination,
            queue,
            workers_prefix: workers_prefix.into(),
            names,
        }
    }

    /// Choose a destination; `None` when no member is eligible
    pub async fn choose(&self, prediction: &PredictionResponse) -> Option<Placement> {
        if let Some(worker) = prediction.recommendation() {
            if self.pool.exists(worker).await {
                tracing::debug!(worker = %worker, "Using recommended worker");
                return Some(Placement {
                    worker: worker.to_string(),
                    source: PlacementSource::Recommended,
                });
            }
            tracing::debug!(worker = %worker, "Recommended worker is not a pool member");
        }

        if let Some(worker) = self.least_loaded().await {
            return Some(Placement {
                worker,
                source: PlacementSource::LeastLoaded,
            });
        }

        self.round_robin().await.map(|worker| Placement {
            worker,
            source: PlacementSource::RoundRobin,
        })
    }

    /// Last published health of a worker; `None` when unknown
    async fn health(&self, worker: &str) -> Option<HealthState> {
        let key = format!("{}{}", self.workers_prefix, worker);
        match self.coordination.get(&key).await {
            Ok(Some(raw)) => match WorkerStatus::decode(&raw) {
                Ok(status) => Some(status.status),
                Err(e) => {
                    tracing::warn!(worker = %worker, error = %e, "Failed to parse worker status");
                    None
                }
            },
            Ok(None) => {
                tracing::debug!(worker = %worker, "Worker status missing");
                None
            }
            Err(e) => {
                tracing::warn!(worker = %worker, error = %e, "Failed to get worker status");
                None
            }
        }
    }

    async fn is_eligible(&self, worker: &str) -> bool {
        match self.health(worker).await {
            Some(state) if state.is_failed() => {
                tracing::debug!(worker = %worker, "Skipping failed worker");
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    async fn least_loaded(&self) -> Option<String> {
        let mut best: Option<(String, usize)> = None;

        for worker in self.pool.rotation().await {
            if !self.is_eligible(&worker).await {
                continue;
            }

            let len = match self.queue.len(&self.names.worker_queue(&worker)).await {
                Ok(len) => len,
                Err(e) => {
                    tracing::warn!(worker = %worker, error = %e, "Failed to get queue length");
                    continue;
                }
            };

            if best.as_ref().map_or(true, |(_, min)| len < *min) {
                best = Some((worker, len));
            }
        }

        let (worker, len) = best?;
        self.pool.mark_selected(&worker).await;
        tracing::debug!(worker = %worker, queue_len = len, "Selected least-loaded worker");
        Some(worker)
    }

    async fn round_robin(&self) -> Option<String> {
        let attempts = self.pool.len().await;

        for _ in 0..attempts {
            let worker = match self.pool.next().await {
                Ok(worker) => worker,
                Err(e) => {
                    tracing::warn!(error = %e, "Round-robin fallback failed");
                    return None;
                }
            };
            if self.is_eligible(&worker).await {
                tracing::debug!(worker = %worker, "Fallback to round-robin worker");
                return Some(worker);
            }
        }

        tracing::warn!("No eligible worker for placement");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::MemoryCoordination;
    use crate::queue::MemoryQueue;

    struct Fixture {
        coordination: MemoryCoordination,
        queue: MemoryQueue,
        pool: Arc<WorkerPool>,
        placer: Placer,
    }

    async fn fixture(workers: &[(&str, HealthState)]) -> Fixture {
        let coordination = MemoryCoordination::new();
        let queue = MemoryQueue::new();
        let pool = Arc::new(WorkerPool::new());

        for (id, state) in workers {
            let status = WorkerStatus::new(*id).with_status(*state);
            coordination
                .put(&format!("/workers/{id}"), &status.encode().unwrap(), None)
                .await
                .unwrap();
            pool.add(id).await;
        }

        let placer = Placer::new(
            pool.clone(),
            Arc::new(coordination.clone()),
            Arc::new(queue.clone()),
            "/workers/",
            QueueNames::default(),
        );

        Fixture {
            coordination,
            queue,
            pool,
            placer,
        }
    }

    #[tokio::test]
    async fn test_recommendation_wins_when_member() {
        let f = fixture(&[("w1", HealthState::Ok), ("w2", HealthState::Ok)]).await;
        let placement = f
            .placer
            .choose(&PredictionResponse::recommending("w2"))
            .await
            .unwrap();
        assert_eq!(placement.worker, "w2");
        assert_eq!(placement.source, PlacementSource::Recommended);
    }

    #[tokio::test]
    async fn test_non_member_recommendation_ignored() {
        let f = fixture(&[("w1", HealthState::Ok)]).await;
        let placement = f
            .placer
            .choose(&PredictionResponse::recommending("ghost"))
            .await
            .unwrap();
        assert_eq!(placement.worker, "w1");
        assert_eq!(placement.source, PlacementSource::LeastLoaded);
    }

    #[tokio::test]
    async fn test_tie_goes_to_rotation_head_and_advances_cursor() {
        let f = fixture(&[("w1", HealthState::Ok), ("w2", HealthState::Ok)]).await;

        let first = f.placer.choose(&PredictionResponse::default()).await.unwrap();
        assert_eq!(first.worker, "w1");
        assert_eq!(f.pool.snapshot().await.cursor(), 1);

        let second = f.placer.choose(&PredictionResponse::default()).await.unwrap();
        assert_eq!(second.worker, "w2");
    }

    #[tokio::test]
    async fn test_shortest_queue_preferred() {
        let f = fixture(&[("w1", HealthState::Ok), ("w2", HealthState::Ok)]).await;
        f.queue.push_back("worker-queue:w1", "x").await.unwrap();

        let placement = f.placer.choose(&PredictionResponse::default()).await.unwrap();
        assert_eq!(placement.worker, "w2");
    }

    #[tokio::test]
    async fn test_failed_workers_skipped() {
        let f = fixture(&[("w1", HealthState::Failed), ("w2", HealthState::Ok)]).await;
        let placement = f.placer.choose(&PredictionResponse::default()).await.unwrap();
        assert_eq!(placement.worker, "w2");
    }

    fn blind_lengths(f: &Fixture, workers: &[&str]) {
        for worker in workers {
            f.queue.fail_len_of(&format!("worker-queue:{worker}"));
        }
    }

    #[tokio::test]
    async fn test_round_robin_when_lengths_unavailable() {
        let f = fixture(&[("w1", HealthState::Ok), ("w2", HealthState::Ok)]).await;
        blind_lengths(&f, &["w1", "w2"]);

        let placement = f.placer.choose(&PredictionResponse::default()).await.unwrap();
        assert_eq!(placement.worker, "w1");
        assert_eq!(placement.source, PlacementSource::RoundRobin);
        assert_eq!(f.pool.snapshot().await.cursor(), 1);
    }

    #[tokio::test]
    async fn test_round_robin_cycles_healthy_members_and_skips_failed() {
        let f = fixture(&[
            ("w1", HealthState::Ok),
            ("w2", HealthState::Failed),
            ("w3", HealthState::Ok),
            ("w4", HealthState::Ok),
        ])
        .await;
        blind_lengths(&f, &["w1", "w2", "w3", "w4"]);

        let mut picked = Vec::new();
        for _ in 0..6 {
            let placement = f.placer.choose(&PredictionResponse::default()).await.unwrap();
            assert_eq!(placement.source, PlacementSource::RoundRobin);
            picked.push(placement.worker);
        }

        assert_eq!(picked, ["w1", "w3", "w4", "w1", "w3", "w4"]);
    }

    #[tokio::test]
    async fn test_round_robin_skips_member_once_marked_failed() {
        let f = fixture(&[("w1", HealthState::Ok), ("w2", HealthState::Ok)]).await;
        blind_lengths(&f, &["w1", "w2"]);

        let first = f.placer.choose(&PredictionResponse::default()).await.unwrap();
        assert_eq!(first.worker, "w1");

        let failed = WorkerStatus::new("w2").with_status(HealthState::Failed);
        f.coordination
            .put("/workers/w2", &failed.encode().unwrap(), None)
            .await
            .unwrap();

        let second = f.placer.choose(&PredictionResponse::default()).await.unwrap();
        assert_eq!(second.worker, "w1");
    }

    #[tokio::test]
    async fn test_no_eligible_worker() {
        let f = fixture(&[("w1", HealthState::Failed)]).await;
        f.pool.add("w-unknown").await;
        assert!(f.placer.choose(&PredictionResponse::default()).await.is_none());
    }

    #[tokio::test]
    async fn test_empty_pool() {
        let f = fixture(&[]).await;
        assert!(f.placer.choose(&PredictionResponse::default()).await.is_none());
        assert!(f.coordination.get("/workers/w1").await.unwrap().is_none());
    }
}
