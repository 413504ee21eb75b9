//! Scheduler process
//!
//! Wires the elector to the leader-only components. Every `Elected` event
//! starts a [`LeaderTerm`] (fresh pool, watcher, reconciler, dispatcher,
//! sweeper, delayed promoter); every `Resigned` event stops it and waits for
//! its tasks. Independently of leadership the process keeps a lease-bound
//! [`StatusDoc`] under the schedulers prefix.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use super::delayed::DelayedPromoter;
use super::dispatch::{DispatchConfig, Dispatcher};
use super::election::{ElectionConfig, LeaderElector, LeaderFlag, LeadershipEvent};
use super::placement::Placer;
use super::pool::WorkerPool;
use super::recovery::RecoverySweeper;
use super::watcher::WorkerWatcher;
use crate::config::Config;
use crate::coordination::{CoordinationClient, CoordinationError, CoordinationResult, Session};
use crate::models::SchedulerStatus;
use crate::prediction::Predictor;
use crate::queue::{QueueClient, QueueNames};
use crate::shutdown;
use crate::storage::StatusRecorder;

/// Capacity of the membership channel of one term
const MEMBERSHIP_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// Status document
// ============================================================================

/// Lease-bound status document of one scheduler process
///
/// The lease is kept alive by a [`Session`]. When the session is found dead
/// on the next write, a new one is opened and the document rewritten.
pub struct StatusDoc {
    client: Arc<dyn CoordinationClient>,
    key: String,
    ttl: Duration,
    status: Mutex<SchedulerStatus>,
    session: Mutex<Option<Session>>,
}

impl StatusDoc {
    pub fn new(
        client: Arc<dyn CoordinationClient>,
        prefix: &str,
        id: &str,
        ttl: Duration,
    ) -> Self {
        Self {
            client,
            key: format!("{prefix}{id}"),
            ttl,
            status: Mutex::new(SchedulerStatus::new(id)),
            session: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current contents of the document
    pub async fn current(&self) -> SchedulerStatus {
        self.status.lock().await.clone()
    }

    /// Write the document, re-granting the lease when it has expired
    pub async fn publish(&self) -> CoordinationResult<()> {
        let value = self
            .status
            .lock()
            .await
            .encode()
            .map_err(|e| CoordinationError::Backend(e.to_string()))?;

        let mut session = self.session.lock().await;

        if let Some(current) = session.as_ref() {
            if !current.is_done() {
                match self.client.put(&self.key, &value, Some(current.lease())).await {
                    Err(CoordinationError::LeaseExpired(_)) => {}
                    other => return other,
                }
            }
        }

        if let Some(old) = session.take() {
            old.close().await;
        }

        let fresh = Session::open(self.client.clone(), self.ttl).await?;
        self.client
            .put(&self.key, &value, Some(fresh.lease()))
            .await?;
        tracing::debug!(key = %self.key, lease = fresh.lease(), "Scheduler status lease granted");
        *session = Some(fresh);
        Ok(())
    }

    /// Refresh the heartbeat; failures are logged
    pub async fn heartbeat(&self) {
        self.status.lock().await.heartbeat = Utc::now();
        if let Err(e) = self.publish().await {
            tracing::warn!(key = %self.key, error = %e, "Failed to update scheduler heartbeat");
        }
    }

    /// Rewrite the leadership flag; failures are logged
    pub async fn set_leader(&self, is_leader: bool) {
        {
            let mut status = self.status.lock().await;
            status.is_leader = is_leader;
            status.heartbeat = Utc::now();
        }
        if let Err(e) = self.publish().await {
            tracing::warn!(key = %self.key, error = %e, "Failed to update scheduler status");
        }
    }

    /// Revoke the lease, removing the document
    pub async fn close(&self) {
        if let Some(session) = self.session.lock().await.take() {
            session.close().await;
        }
    }
}

// ============================================================================
// Settings and collaborators
// ============================================================================

/// Scheduler process settings
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub id: String,
    pub names: QueueNames,
    pub workers_prefix: String,
    pub schedulers_prefix: String,
    pub election: ElectionConfig,
    pub dispatch: DispatchConfig,
    pub status_ttl: Duration,
    pub heartbeat_interval: Duration,
    pub pool_refresh: Duration,
    pub sweep_interval: Duration,
    pub stale_threshold: Duration,
    pub delayed_poll: Duration,
    pub delayed_batch: usize,
}

impl SchedulerSettings {
    /// Derive settings from the loaded configuration
    pub fn from_config(id: impl Into<String>, config: &Config) -> Self {
        let id = id.into();
        let sched = &config.scheduler;

        Self {
            names: config.queues.clone(),
            workers_prefix: config.coordination.workers_prefix.clone(),
            schedulers_prefix: config.coordination.schedulers_prefix.clone(),
            election: ElectionConfig {
                key: sched.election_key.clone(),
                candidate_id: id.clone(),
                ttl: sched.lease_ttl(),
                retry: sched.campaign_retry(),
                poll: sched.campaign_poll(),
            },
            dispatch: DispatchConfig {
                pop_block: sched.pop_block(),
                idle_backoff: sched.idle_backoff(),
                max_worker_failures: sched.max_worker_failures,
                prediction_timeout: config.prediction.timeout(),
            },
            status_ttl: sched.lease_ttl(),
            heartbeat_interval: sched.lease_ttl() / 2,
            pool_refresh: sched.pool_refresh(),
            sweep_interval: sched.sweep_interval(),
            stale_threshold: sched.stale_threshold(),
            delayed_poll: sched.delayed_poll(),
            delayed_batch: sched.delayed_batch,
            id,
        }
    }
}

/// External collaborators of a scheduler
#[derive(Clone)]
pub struct SchedulerDeps {
    pub coordination: Arc<dyn CoordinationClient>,
    pub queue: Arc<dyn QueueClient>,
    pub predictor: Arc<dyn Predictor>,
    pub recorder: StatusRecorder,
}

// ============================================================================
// Leadership term
// ============================================================================

/// Leader-only tasks of one term
pub struct LeaderTerm {
    pool: Arc<WorkerPool>,
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl LeaderTerm {
    /// Build the pool and start every leader-only loop
    pub async fn start(
        settings: &SchedulerSettings,
        deps: &SchedulerDeps,
        status: Arc<StatusDoc>,
        leader: LeaderFlag,
    ) -> Self {
        let (stop, stop_rx) = shutdown::channel();
        let pool = Arc::new(WorkerPool::new());

        match pool
            .refresh(deps.coordination.as_ref(), &settings.workers_prefix)
            .await
        {
            Ok(size) => tracing::info!(workers = size, "Worker pool initialized"),
            Err(e) => tracing::warn!(error = %e, "Initial worker pool read failed"),
        }

        let mut tasks = Vec::new();

        let (member_tx, member_rx) = mpsc::channel(MEMBERSHIP_CHANNEL_CAPACITY);
        let watcher = WorkerWatcher::new(deps.coordination.clone(), settings.workers_prefix.clone());
        tasks.push(tokio::spawn(watcher.run(member_tx, stop_rx.clone())));
        tasks.push(tokio::spawn(pool.clone().consume(member_rx)));

        tasks.push(tokio::spawn(pool.clone().run_auto_refresh(
            deps.coordination.clone(),
            settings.workers_prefix.clone(),
            settings.pool_refresh,
            stop_rx.clone(),
        )));

        let placer = Placer::new(
            pool.clone(),
            deps.coordination.clone(),
            deps.queue.clone(),
            settings.workers_prefix.clone(),
            settings.names.clone(),
        );
        let dispatcher = Dispatcher::new(
            deps.queue.clone(),
            settings.names.clone(),
            pool.clone(),
            placer,
            deps.predictor.clone(),
            deps.recorder.clone(),
            status,
            settings.dispatch.clone(),
        );
        tasks.push(tokio::spawn(dispatcher.run(leader, stop_rx.clone())));

        let sweeper = RecoverySweeper::new(
            deps.queue.clone(),
            settings.names.clone(),
            settings.stale_threshold,
        );
        tasks.push(tokio::spawn(
            sweeper.run(settings.sweep_interval, stop_rx.clone()),
        ));

        let promoter = DelayedPromoter::new(
            deps.queue.clone(),
            settings.names.clone(),
            settings.delayed_batch,
            settings.id.clone(),
        );
        tasks.push(tokio::spawn(promoter.run(settings.delayed_poll, stop_rx)));

        Self { pool, stop, tasks }
    }

    /// The term's worker pool
    pub fn pool(&self) -> Arc<WorkerPool> {
        self.pool.clone()
    }

    /// Signal every loop and wait for them to finish
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Leader task ended abnormally");
            }
        }
    }
}

// ============================================================================
// Scheduler node
// ============================================================================

/// One scheduler process
pub struct SchedulerNode {
    settings: SchedulerSettings,
    deps: SchedulerDeps,
    status: Arc<StatusDoc>,
}

impl SchedulerNode {
    pub fn new(settings: SchedulerSettings, deps: SchedulerDeps) -> Self {
        let status = Arc::new(StatusDoc::new(
            deps.coordination.clone(),
            &settings.schedulers_prefix,
            &settings.id,
            settings.status_ttl,
        ));
        Self {
            settings,
            deps,
            status,
        }
    }

    pub fn status(&self) -> Arc<StatusDoc> {
        self.status.clone()
    }

    /// Run until shutdown
    ///
    /// Fails only when the initial status document cannot be written.
    pub async fn run(self, shutdown_rx: watch::Receiver<bool>) -> CoordinationResult<()> {
        self.status.publish().await?;
        tracing::info!(scheduler = %self.settings.id, key = %self.status.key(), "Scheduler registered");

        let (event_tx, mut event_rx) = mpsc::channel(4);
        let elector = LeaderElector::new(
            self.deps.coordination.clone(),
            self.settings.election.clone(),
            event_tx,
        );
        let leader = elector.flag();
        let campaign = tokio::spawn(elector.run(shutdown_rx));

        let mut heartbeat = tokio::time::interval(self.settings.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut term: Option<LeaderTerm> = None;

        // The elector resigns and drops its sender on shutdown, ending this loop
        loop {
            tokio::select! {
                event = event_rx.recv() => match event {
                    Some(LeadershipEvent::Elected) => {
                        tracing::info!(scheduler = %self.settings.id, "Elected leader, starting scheduler");
                        self.status.set_leader(true).await;
                        term = Some(
                            LeaderTerm::start(&self.settings, &self.deps, self.status.clone(), leader.clone())
                                .await,
                        );
                    }
                    Some(LeadershipEvent::Resigned) => {
                        if let Some(current) = term.take() {
                            current.stop().await;
                        }
                        self.status.set_leader(false).await;
                        tracing::info!(scheduler = %self.settings.id, "Resigned from leadership, stopping scheduler");
                    }
                    None => break,
                },
                _ = heartbeat.tick() => self.status.heartbeat().await,
            }
        }

        if let Some(current) = term.take() {
            current.stop().await;
        }
        if let Err(e) = campaign.await {
            tracing::warn!(error = %e, "Campaign task ended abnormally");
        }
        self.status.close().await;

        tracing::info!(scheduler = %self.settings.id, "Scheduler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::MemoryCoordination;

    #[tokio::test]
    async fn test_status_doc_publish_and_close() {
        let store = MemoryCoordination::new();
        let doc = StatusDoc::new(Arc::new(store.clone()), "/schedulers/", "s1", Duration::from_secs(5));

        doc.set_leader(true).await;
        let raw = store.get("/schedulers/s1").await.unwrap().unwrap();
        assert!(raw.contains("\"is_leader\":true"));

        doc.close().await;
        assert!(store.get("/schedulers/s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_doc_regrants_expired_lease() {
        let store = MemoryCoordination::new();
        let doc = StatusDoc::new(Arc::new(store.clone()), "/schedulers/", "s1", Duration::from_secs(5));

        doc.publish().await.unwrap();
        store.expire_lease(1).unwrap();
        assert!(store.get("/schedulers/s1").await.unwrap().is_none());

        doc.heartbeat().await;
        assert!(store.get("/schedulers/s1").await.unwrap().is_some());
        assert_eq!(store.lease_count(), 1);
    }

    #[test]
    fn test_settings_from_default_config() {
        let settings = SchedulerSettings::from_config("s1", &Config::default());
        assert_eq!(settings.election.key, "/scheduler/leader");
        assert_eq!(settings.election.candidate_id, "s1");
        assert_eq!(settings.dispatch.max_worker_failures, 3);
        assert_eq!(settings.sweep_interval, Duration::from_secs(30));
    }
}
