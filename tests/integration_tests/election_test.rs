//! Leader election and scheduler process lifecycle

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use taskgrid::config::Config;
use taskgrid::coordination::CoordinationClient;
use taskgrid::models::{HealthState, Task};
use taskgrid::prediction::NoopPredictor;
use taskgrid::scheduler::{
    ElectionConfig, LeaderElector, LeadershipEvent, SchedulerDeps, SchedulerNode,
    SchedulerSettings,
};
use taskgrid::shutdown;

use super::fixtures::{eventually, Cluster};

fn election(id: &str) -> ElectionConfig {
    ElectionConfig {
        ttl: Duration::from_secs(1),
        retry: Duration::from_millis(100),
        poll: Duration::from_millis(20),
        ..ElectionConfig::new("/scheduler/leader", id)
    }
}

#[tokio::test]
async fn test_single_leader_and_handover() {
    let cluster = Cluster::new();
    let coordination: Arc<dyn CoordinationClient> = Arc::new(cluster.coordination.clone());

    let (tx1, mut rx1) = mpsc::channel(4);
    let (stop1, stop1_rx) = shutdown::channel();
    let first = LeaderElector::new(coordination.clone(), election("s1"), tx1);
    let first_flag = first.flag();
    let first_handle = tokio::spawn(first.run(stop1_rx));
    assert_eq!(rx1.recv().await, Some(LeadershipEvent::Elected));

    let (tx2, mut rx2) = mpsc::channel(4);
    let (stop2, stop2_rx) = shutdown::channel();
    let second = LeaderElector::new(coordination.clone(), election("s2"), tx2);
    let second_flag = second.flag();
    let second_handle = tokio::spawn(second.run(stop2_rx));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(first_flag.is_leader());
    assert!(!second_flag.is_leader());

    stop1.send(true).unwrap();
    assert_eq!(rx1.recv().await, Some(LeadershipEvent::Resigned));
    first_handle.await.unwrap();

    let elected = tokio::time::timeout(Duration::from_secs(2), rx2.recv())
        .await
        .unwrap();
    assert_eq!(elected, Some(LeadershipEvent::Elected));
    assert!(second_flag.is_leader());
    assert_eq!(
        cluster.coordination.get("/scheduler/leader").await.unwrap().as_deref(),
        Some("s2")
    );

    stop2.send(true).unwrap();
    second_handle.await.unwrap();
}

#[tokio::test]
async fn test_scheduler_node_dispatches_while_leader() {
    let cluster = Cluster::new();
    cluster.publish_worker("W1", HealthState::Ok).await;
    cluster.enqueue(&Task::new("t", "a").with_id("N1")).await;

    let mut settings = SchedulerSettings::from_config("s1", &Config::default());
    settings.election = election("s1");
    settings.dispatch.pop_block = Duration::from_millis(50);
    settings.dispatch.idle_backoff = Duration::from_millis(10);
    settings.status_ttl = Duration::from_secs(1);
    settings.heartbeat_interval = Duration::from_millis(200);
    settings.delayed_poll = Duration::from_millis(50);

    let deps = SchedulerDeps {
        coordination: Arc::new(cluster.coordination.clone()),
        queue: Arc::new(cluster.queue.clone()),
        predictor: Arc::new(NoopPredictor),
        recorder: cluster.recorder(),
    };

    let node = SchedulerNode::new(settings, deps);
    let status = node.status();
    let (stop, stop_rx) = shutdown::channel();
    let handle = tokio::spawn(node.run(stop_rx));

    let observed = &cluster;
    let delivered = eventually(Duration::from_secs(3), || async move {
        observed.len("worker-queue:W1").await == 1
    })
    .await;
    assert!(delivered);
    assert!(status.current().await.is_leader);

    let published = cluster
        .coordination
        .get("/schedulers/s1")
        .await
        .unwrap()
        .unwrap();
    assert!(published.contains("\"is_leader\":true"));

    stop.send(true).unwrap();
    handle.await.unwrap().unwrap();

    assert!(cluster.coordination.get("/schedulers/s1").await.unwrap().is_none());
    assert!(cluster.coordination.get("/scheduler/leader").await.unwrap().is_none());
}
