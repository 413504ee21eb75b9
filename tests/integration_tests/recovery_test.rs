//! Recovery of tasks stuck in the marker queue

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;

use taskgrid::models::{Task, TaskStatus};
use taskgrid::queue::{QueueClient, QueueNames};
use taskgrid::scheduler::{DispatchOutcome, RecoverySweeper};
use taskgrid::worker::DeliveryOutcome;

use super::fixtures::{Cluster, MAIN, PROCESSING};

fn sweeper(cluster: &Cluster) -> RecoverySweeper {
    RecoverySweeper::new(
        Arc::new(cluster.queue.clone()),
        QueueNames::default(),
        Duration::from_secs(30),
    )
}

#[tokio::test]
async fn test_crashed_worker_task_recovered_once() {
    let cluster = Cluster::new();
    let pool = cluster.pool_with(&["W1"]).await;
    let mut dispatcher = cluster.noop_dispatcher(pool);

    cluster.enqueue(&Task::new("t", "a").with_id("C1")).await;
    let outcome = dispatcher.dispatch_once().await.unwrap();
    assert!(matches!(outcome, DispatchOutcome::Scheduled { .. }));

    // W1 dies before consuming its queue
    cluster
        .queue
        .blocking_pop("worker-queue:W1", Duration::from_millis(10))
        .await
        .unwrap();

    let later = Utc::now() + ChronoDuration::seconds(60);
    let report = sweeper(&cluster).sweep_at(later).await.unwrap();
    assert_eq!(report.requeued, 1);
    assert_eq!(cluster.len(PROCESSING).await, 0);
    assert_eq!(cluster.len(MAIN).await, 1);

    let report = sweeper(&cluster).sweep_at(later).await.unwrap();
    assert!(report.is_empty());
    assert_eq!(cluster.len(MAIN).await, 1);
}

#[tokio::test]
async fn test_recovered_task_runs_on_surviving_worker() {
    let cluster = Cluster::new();
    let pool = cluster.pool_with(&["W2"]).await;
    let mut dispatcher = cluster.noop_dispatcher(pool);
    let runner = cluster.runner("W2");

    let stale = Task::new("t", "a")
        .with_id("C2")
        .with_created_at(Utc::now() - ChronoDuration::seconds(120));
    cluster
        .queue
        .push_back(PROCESSING, &stale.encode().unwrap())
        .await
        .unwrap();

    sweeper(&cluster).sweep().await.unwrap();
    dispatcher.dispatch_once().await.unwrap();

    let outcome = runner.poll_once().await.unwrap();
    assert_eq!(outcome, DeliveryOutcome::Completed { task_id: "C2".into() });
    assert_eq!(cluster.store.status_of("C2"), Some(TaskStatus::Completed));
    assert_eq!(cluster.len(PROCESSING).await, 0);
}

#[tokio::test]
async fn test_requeue_path_duplicate_is_collapsed() {
    let cluster = Cluster::new();
    let pool = cluster.pool_with(&[]).await;
    let mut dispatcher = cluster.noop_dispatcher(pool);

    let task = Task::new("t", "a")
        .with_id("C3")
        .with_created_at(Utc::now() - ChronoDuration::seconds(120));
    cluster.enqueue(&task).await;

    let outcome = dispatcher.dispatch_once().await.unwrap();
    assert!(matches!(outcome, DispatchOutcome::Requeued { .. }));

    let report = sweeper(&cluster).sweep().await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(cluster.len(MAIN).await, 1);
    assert_eq!(cluster.len(PROCESSING).await, 0);
}
