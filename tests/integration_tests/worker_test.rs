//! Worker delivery scenarios

use std::time::Duration;

use taskgrid::models::{Task, TaskStatus};
use taskgrid::queue::QueueClient;
use taskgrid::scheduler::DispatchOutcome;
use taskgrid::worker::DeliveryOutcome;

use super::fixtures::{Cluster, PROCESSING};

#[tokio::test]
async fn test_held_claim_suppresses_execution() {
    let cluster = Cluster::new();
    let runner = cluster.runner("W1");

    let raw = Task::new("t", "a").with_id("T1").encode().unwrap();
    cluster.queue.push_back(PROCESSING, &raw).await.unwrap();
    cluster
        .queue
        .set_if_absent("task-executed:T1", "W2", Duration::from_secs(60))
        .await
        .unwrap();

    let outcome = runner.process(&raw).await.unwrap();

    assert_eq!(outcome, DeliveryOutcome::Duplicate { task_id: "T1".into() });
    assert_eq!(cluster.len(PROCESSING).await, 0);
    assert!(cluster.store.logs_for("T1").is_empty());
    assert_eq!(cluster.store.status_of("T1"), None);
}

#[tokio::test]
async fn test_redelivery_after_success_is_noop() {
    let cluster = Cluster::new();
    let first = cluster.runner("W1");
    let second = cluster.runner("W2");

    let raw = Task::new("t", "a").with_id("T2").encode().unwrap();

    cluster.queue.push_back(PROCESSING, &raw).await.unwrap();
    let outcome = first.process(&raw).await.unwrap();
    assert_eq!(outcome, DeliveryOutcome::Completed { task_id: "T2".into() });

    // Redelivered to a different worker, e.g. by a sweeper race
    cluster.queue.push_back(PROCESSING, &raw).await.unwrap();
    let outcome = second.process(&raw).await.unwrap();
    assert_eq!(outcome, DeliveryOutcome::Duplicate { task_id: "T2".into() });

    assert_eq!(cluster.store.logs_for("T2").len(), 1);
    assert_eq!(cluster.store.logs_for("T2")[0].executed_by, "W1");
    assert_eq!(cluster.len(PROCESSING).await, 0);
}

#[tokio::test]
async fn test_dispatch_then_execute_clears_marker() {
    let cluster = Cluster::new();
    let pool = cluster.pool_with(&["W1"]).await;
    let mut dispatcher = cluster.noop_dispatcher(pool);
    let runner = cluster.runner("W1");

    cluster.enqueue(&Task::new("t", "hello").with_id("E2E")).await;

    let outcome = dispatcher.dispatch_once().await.unwrap();
    assert!(matches!(outcome, DispatchOutcome::Scheduled { .. }));
    assert_eq!(cluster.len(PROCESSING).await, 1);

    let outcome = runner.poll_once().await.unwrap();
    assert_eq!(outcome, DeliveryOutcome::Completed { task_id: "E2E".into() });

    assert_eq!(cluster.len(PROCESSING).await, 0);
    assert_eq!(cluster.len("worker-queue:W1").await, 0);
    assert_eq!(cluster.store.status_of("E2E"), Some(TaskStatus::Completed));
    assert_eq!(cluster.store.logs_for("E2E")[0].result, "processed: hello");
}
