//! Test fixtures for integration tests
//!
//! Provides an in-memory cluster and helper predictors

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use taskgrid::coordination::{CoordinationClient, MemoryCoordination};
use taskgrid::models::{HealthState, PredictionRequest, PredictionResponse, Task, WorkerStatus};
use taskgrid::prediction::{NoopPredictor, PredictionError, PredictionResult, Predictor};
use taskgrid::queue::{MemoryQueue, QueueClient, QueueNames};
use taskgrid::scheduler::{DispatchConfig, Dispatcher, Placer, StatusDoc, WorkerPool};
use taskgrid::storage::{MemoryTaskStore, StatusRecorder};
use taskgrid::worker::{
    HandlerRegistry, SimulatedHandler, WorkerRegistry, WorkerRunner, WorkerSettings,
};

pub const MAIN: &str = "task-queue";
pub const PROCESSING: &str = "processing-queue";

/// Always recommends the same worker
pub struct FixedPredictor(pub String);

#[async_trait]
impl Predictor for FixedPredictor {
    async fn predict(&self, _request: &PredictionRequest) -> PredictionResult<PredictionResponse> {
        Ok(PredictionResponse::recommending(self.0.clone()))
    }
}

/// Always fails
pub struct FailingPredictor;

#[async_trait]
impl Predictor for FailingPredictor {
    async fn predict(&self, _request: &PredictionRequest) -> PredictionResult<PredictionResponse> {
        Err(PredictionError::Request("connection refused".to_string()))
    }
}

/// Shared in-memory stores standing in for a deployment
#[derive(Clone, Default)]
pub struct Cluster {
    pub coordination: MemoryCoordination,
    pub queue: MemoryQueue,
    pub store: Arc<MemoryTaskStore>,
}

impl Cluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorder(&self) -> StatusRecorder {
        StatusRecorder::new(self.store.clone(), Duration::from_secs(1))
    }

    /// Publish a worker status document without a lease
    pub async fn publish_worker(&self, id: &str, state: HealthState) {
        let status = WorkerStatus::new(id).with_status(state);
        self.coordination
            .put(&format!("/workers/{id}"), &status.encode().unwrap(), None)
            .await
            .unwrap();
    }

    /// Serialize a task and push it onto the main queue
    pub async fn enqueue(&self, task: &Task) -> String {
        let raw = task.encode().unwrap();
        self.queue.push_back(MAIN, &raw).await.unwrap();
        raw
    }

    pub async fn len(&self, queue: &str) -> usize {
        self.queue.len(queue).await.unwrap()
    }

    /// Pool containing the given workers, each published as healthy
    pub async fn pool_with(&self, workers: &[&str]) -> Arc<WorkerPool> {
        let pool = Arc::new(WorkerPool::new());
        for id in workers {
            self.publish_worker(id, HealthState::Ok).await;
            pool.add(id).await;
        }
        pool
    }

    pub fn dispatcher(&self, pool: Arc<WorkerPool>, predictor: Arc<dyn Predictor>) -> Dispatcher {
        let coordination: Arc<dyn CoordinationClient> = Arc::new(self.coordination.clone());
        let queue: Arc<dyn QueueClient> = Arc::new(self.queue.clone());

        let placer = Placer::new(
            pool.clone(),
            coordination.clone(),
            queue.clone(),
            "/workers/",
            QueueNames::default(),
        );
        let status = Arc::new(StatusDoc::new(
            coordination,
            "/schedulers/",
            "s1",
            Duration::from_secs(10),
        ));

        Dispatcher::new(
            queue,
            QueueNames::default(),
            pool,
            placer,
            predictor,
            self.recorder(),
            status,
            DispatchConfig {
                pop_block: Duration::from_millis(50),
                idle_backoff: Duration::from_millis(10),
                ..DispatchConfig::default()
            },
        )
    }

    pub fn noop_dispatcher(&self, pool: Arc<WorkerPool>) -> Dispatcher {
        self.dispatcher(pool, Arc::new(NoopPredictor))
    }

    pub fn runner(&self, id: &str) -> WorkerRunner {
        let settings = WorkerSettings {
            id: id.to_string(),
            names: QueueNames::default(),
            workers_prefix: "/workers/".to_string(),
            lease_ttl: Duration::from_secs(5),
            heartbeat: Duration::from_secs(5),
            claim_ttl: Duration::from_secs(60),
            failure_threshold: 3,
            pop_block: Duration::from_millis(50),
        };
        let registry = Arc::new(WorkerRegistry::new(
            Arc::new(self.coordination.clone()),
            "/workers/",
        ));

        WorkerRunner::new(
            settings,
            Arc::new(self.queue.clone()),
            registry,
            HandlerRegistry::with_default(Arc::new(SimulatedHandler::new(Duration::ZERO))),
            self.recorder(),
        )
    }
}

/// Poll `check` every 20ms until it holds or `timeout` elapses
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
