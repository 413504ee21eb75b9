//! Dispatch engine scenarios

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;

use taskgrid::models::{HealthState, Task, TaskStatus};
use taskgrid::queue::{QueueClient, QueueNames};
use taskgrid::scheduler::{DelayedPromoter, DispatchOutcome};

use super::fixtures::{Cluster, FailingPredictor, FixedPredictor, MAIN, PROCESSING};

#[tokio::test]
async fn test_equal_queues_pick_rotation_head_then_advance() {
    let cluster = Cluster::new();
    let pool = cluster.pool_with(&["W1", "W2"]).await;
    let mut dispatcher = cluster.noop_dispatcher(pool.clone());

    cluster.enqueue(&Task::new("t", "a").with_id("A")).await;
    let outcome = dispatcher.dispatch_once().await.unwrap();

    assert_eq!(
        outcome,
        DispatchOutcome::Scheduled {
            task_id: "A".into(),
            worker: "W1".into()
        }
    );
    assert_eq!(pool.snapshot().await.cursor(), 1);
    assert_eq!(pool.snapshot().await.workers()[1], "W2");
}

#[tokio::test]
async fn test_scheduled_task_keeps_marker_and_is_forwarded_verbatim() {
    let cluster = Cluster::new();
    let pool = cluster.pool_with(&["W1"]).await;
    let mut dispatcher = cluster.noop_dispatcher(pool);

    let raw = cluster.enqueue(&Task::new("t", "a").with_id("A")).await;
    dispatcher.dispatch_once().await.unwrap();

    assert_eq!(cluster.queue.range_all(PROCESSING).await.unwrap(), vec![raw.clone()]);
    assert_eq!(
        cluster.queue.range_all("worker-queue:W1").await.unwrap(),
        vec![raw]
    );
    assert_eq!(cluster.len(MAIN).await, 0);
}

#[tokio::test]
async fn test_expired_task_dropped_and_marked() {
    let cluster = Cluster::new();
    let pool = cluster.pool_with(&["W1"]).await;
    let mut dispatcher = cluster.noop_dispatcher(pool);

    let task = Task::new("t", "a")
        .with_id("E1")
        .with_expire_at(Utc::now() - ChronoDuration::seconds(1));
    cluster.enqueue(&task).await;

    let outcome = dispatcher.dispatch_once().await.unwrap();

    assert_eq!(outcome, DispatchOutcome::Expired { task_id: "E1".into() });
    assert_eq!(cluster.store.status_of("E1"), Some(TaskStatus::Expired));
    assert_eq!(cluster.len("worker-queue:W1").await, 0);
    assert_eq!(cluster.len(PROCESSING).await, 0);
}

#[tokio::test]
async fn test_three_push_failures_evict_worker() {
    let cluster = Cluster::new();
    let pool = cluster.pool_with(&["W1"]).await;
    let mut dispatcher = cluster.noop_dispatcher(pool.clone());
    cluster.queue.fail_pushes_to("worker-queue:W1");

    cluster.enqueue(&Task::new("t", "a").with_id("P1")).await;

    for expected in 1..=2 {
        let outcome = dispatcher.dispatch_once().await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::PushFailed { evicted: false, .. }));
        assert_eq!(dispatcher.failure_count("W1"), expected);
        assert!(pool.exists("W1").await);
    }

    let outcome = dispatcher.dispatch_once().await.unwrap();
    assert!(matches!(outcome, DispatchOutcome::PushFailed { evicted: true, .. }));
    assert_eq!(dispatcher.failure_count("W1"), 0);
    assert_eq!(dispatcher.tracked_workers(), 0);
    assert!(!pool.exists("W1").await);

    // The task survives on the main queue and no marker is left behind
    assert_eq!(cluster.len(MAIN).await, 1);
    assert_eq!(cluster.len(PROCESSING).await, 0);
}

#[tokio::test]
async fn test_success_resets_failure_count() {
    let cluster = Cluster::new();
    let pool = cluster.pool_with(&["W1"]).await;
    let mut dispatcher = cluster.noop_dispatcher(pool);

    cluster.queue.fail_pushes_to("worker-queue:W1");
    cluster.enqueue(&Task::new("t", "a").with_id("R1")).await;
    dispatcher.dispatch_once().await.unwrap();
    assert_eq!(dispatcher.failure_count("W1"), 1);

    cluster.queue.heal("worker-queue:W1");
    let outcome = dispatcher.dispatch_once().await.unwrap();
    assert!(matches!(outcome, DispatchOutcome::Scheduled { .. }));
    assert_eq!(dispatcher.failure_count("W1"), 0);
    assert_eq!(dispatcher.tracked_workers(), 0);
}

#[tokio::test]
async fn test_failure_counts_do_not_accumulate_across_workers() {
    let cluster = Cluster::new();
    let ids = ["W1", "W2", "W3"];
    let pool = cluster.pool_with(&ids).await;
    let mut dispatcher = cluster.noop_dispatcher(pool);

    for (n, id) in ids.iter().enumerate() {
        cluster.queue.fail_pushes_to(&format!("worker-queue:{id}"));
        cluster.enqueue(&Task::new("t", "a").with_id(&format!("F{n}"))).await;
    }
    for _ in 0..3 {
        dispatcher.dispatch_once().await.unwrap();
    }
    assert!(dispatcher.tracked_workers() > 0);

    for id in ids {
        cluster.queue.heal(&format!("worker-queue:{id}"));
    }
    while cluster.len(MAIN).await > 0 {
        dispatcher.dispatch_once().await.unwrap();
    }
    assert_eq!(dispatcher.tracked_workers(), 0);
}

#[tokio::test]
async fn test_recommended_member_is_used() {
    let cluster = Cluster::new();
    let pool = cluster.pool_with(&["W1", "W2"]).await;
    let mut dispatcher = cluster.dispatcher(pool, Arc::new(FixedPredictor("W2".into())));

    cluster.enqueue(&Task::new("t", "a").with_id("A")).await;
    let outcome = dispatcher.dispatch_once().await.unwrap();

    assert_eq!(
        outcome,
        DispatchOutcome::Scheduled {
            task_id: "A".into(),
            worker: "W2".into()
        }
    );
}

#[tokio::test]
async fn test_failed_worker_skipped() {
    let cluster = Cluster::new();
    let pool = cluster.pool_with(&["W1", "W2"]).await;
    cluster.publish_worker("W1", HealthState::Failed).await;
    let mut dispatcher = cluster.noop_dispatcher(pool);

    cluster.enqueue(&Task::new("t", "a").with_id("A")).await;
    let outcome = dispatcher.dispatch_once().await.unwrap();

    assert!(matches!(outcome, DispatchOutcome::Scheduled { ref worker, .. } if worker == "W2"));
}

#[tokio::test]
async fn test_prediction_failure_leaves_marker() {
    let cluster = Cluster::new();
    let pool = cluster.pool_with(&["W1"]).await;
    let mut dispatcher = cluster.dispatcher(pool, Arc::new(FailingPredictor));

    cluster.enqueue(&Task::new("t", "a").with_id("X")).await;
    let outcome = dispatcher.dispatch_once().await.unwrap();

    assert_eq!(outcome, DispatchOutcome::PredictionFailed { task_id: "X".into() });
    assert_eq!(cluster.len(PROCESSING).await, 1);
    assert_eq!(cluster.len("worker-queue:W1").await, 0);
}

#[tokio::test]
async fn test_no_eligible_worker_requeues_and_keeps_marker() {
    let cluster = Cluster::new();
    let pool = cluster.pool_with(&[]).await;
    let mut dispatcher = cluster.noop_dispatcher(pool);

    let raw = cluster.enqueue(&Task::new("t", "a").with_id("N")).await;
    let outcome = dispatcher.dispatch_once().await.unwrap();

    assert_eq!(outcome, DispatchOutcome::Requeued { task_id: "N".into() });
    assert_eq!(cluster.queue.range_all(MAIN).await.unwrap(), vec![raw.clone()]);
    assert_eq!(cluster.queue.range_all(PROCESSING).await.unwrap(), vec![raw]);
}

#[tokio::test]
async fn test_poison_entry_dropped() {
    let cluster = Cluster::new();
    let pool = cluster.pool_with(&["W1"]).await;
    let mut dispatcher = cluster.noop_dispatcher(pool);

    cluster.queue.push_back(MAIN, "not a task").await.unwrap();
    let outcome = dispatcher.dispatch_once().await.unwrap();

    assert_eq!(outcome, DispatchOutcome::Poison);
    assert_eq!(cluster.len(PROCESSING).await, 0);
    assert_eq!(cluster.len(MAIN).await, 0);
}

#[tokio::test]
async fn test_idle_when_main_queue_empty() {
    let cluster = Cluster::new();
    let pool = cluster.pool_with(&["W1"]).await;
    let mut dispatcher = cluster.noop_dispatcher(pool);

    assert_eq!(dispatcher.dispatch_once().await.unwrap(), DispatchOutcome::Idle);
}

#[tokio::test]
async fn test_delayed_task_promoted_then_dispatched() {
    let cluster = Cluster::new();
    let pool = cluster.pool_with(&["W1"]).await;
    let mut dispatcher = cluster.noop_dispatcher(pool);

    let raw = Task::new("t", "later").with_id("D").encode().unwrap();
    cluster.queue.schedule("delayed-tasks", &raw, 100).await.unwrap();

    let promoter = DelayedPromoter::new(
        Arc::new(cluster.queue.clone()),
        QueueNames::default(),
        10,
        "s1",
    );
    assert_eq!(promoter.promote_due_at(99).await.unwrap(), 0);
    assert_eq!(promoter.promote_due_at(100).await.unwrap(), 1);

    let outcome = dispatcher.dispatch_once().await.unwrap();
    assert!(matches!(outcome, DispatchOutcome::Scheduled { ref task_id, .. } if task_id == "D"));
}
