//! Leader-side worker pool
//!
//! The pool is the leader's in-memory view of live workers: an ordered list
//! of identifiers without duplicates plus a round-robin cursor. Watch events
//! patch it incrementally; a periodic full read of the discovery prefix
//! replaces it wholesale so that dropped events cannot cause lasting drift.
//!
//! All access goes through one `RwLock`. Callers only see copies, never the
//! list itself.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, RwLock};

use super::watcher::MembershipEvent;
use crate::coordination::{CoordinationClient, CoordinationError, CoordinationResult};
use crate::metrics;
use crate::models::WorkerStatus;
use crate::shutdown;

/// Timeout of one full discovery read
const REFRESH_TIMEOUT: Duration = Duration::from_secs(5);

/// Pool errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("No available workers")]
    Empty,
}

/// Ordered worker list with a round-robin cursor
///
/// Invariants: no duplicate identifiers, and `cursor < workers.len()`
/// whenever the list is non-empty (0 otherwise).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolState {
    workers: Vec<String>,
    cursor: usize,
}

impl PoolState {
    /// Build from identifiers, dropping duplicates and keeping first occurrence
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = Self::default();
        state.replace(ids);
        state
    }

    pub fn workers(&self) -> &[String] {
        &self.workers
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn exists(&self, id: &str) -> bool {
        self.workers.iter().any(|w| w == id)
    }

    /// Add a worker; no-op when already present
    pub fn add(&mut self, id: &str) -> bool {
        if self.exists(id) {
            return false;
        }
        self.workers.push(id.to_string());
        true
    }

    /// Remove a worker; no-op when absent
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.workers.len();
        self.workers.retain(|w| w != id);
        if self.cursor >= self.workers.len() {
            self.cursor = 0;
        }
        self.workers.len() != before
    }

    /// Replace the whole list and reset the cursor
    pub fn replace<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        self.workers = ids
            .into_iter()
            .map(Into::into)
            .filter(|id| seen.insert(id.clone()))
            .collect();
        self.cursor = 0;
    }

    /// Return the worker under the cursor and advance cyclically
    pub fn next(&mut self) -> Result<String, PoolError> {
        if self.workers.is_empty() {
            return Err(PoolError::Empty);
        }
        let worker = self.workers[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.workers.len();
        Ok(worker)
    }

    /// Members in round-robin order starting at the cursor
    pub fn rotation(&self) -> Vec<String> {
        let n = self.workers.len();
        (0..n)
            .map(|offset| self.workers[(self.cursor + offset) % n].clone())
            .collect()
    }

    /// Move the cursor just past `id`; no-op when absent
    pub fn mark_selected(&mut self, id: &str) {
        if let Some(index) = self.workers.iter().position(|w| w == id) {
            self.cursor = (index + 1) % self.workers.len();
        }
    }
}

/// Shared, lock-guarded worker pool
#[derive(Debug, Default)]
pub struct WorkerPool {
    state: RwLock<PoolState>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, id: &str) -> bool {
        let added = self.state.write().await.add(id);
        if added {
            tracing::info!(worker = %id, "Worker added to pool");
            self.publish_size().await;
        }
        added
    }

    pub async fn remove(&self, id: &str) -> bool {
        let removed = self.state.write().await.remove(id);
        if removed {
            tracing::info!(worker = %id, "Worker removed from pool");
            self.publish_size().await;
        }
        removed
    }

    pub async fn next(&self) -> Result<String, PoolError> {
        self.state.write().await.next()
    }

    pub async fn exists(&self, id: &str) -> bool {
        self.state.read().await.exists(id)
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.is_empty()
    }

    /// Copy of the current state
    pub async fn snapshot(&self) -> PoolState {
        self.state.read().await.clone()
    }

    /// Members in round-robin order starting at the cursor
    pub async fn rotation(&self) -> Vec<String> {
        self.state.read().await.rotation()
    }

    pub async fn mark_selected(&self, id: &str) {
        self.state.write().await.mark_selected(id);
    }

    /// Replace the membership wholesale
    pub async fn replace(&self, ids: Vec<String>) {
        self.state.write().await.replace(ids);
        self.publish_size().await;
    }

    /// Apply one membership event
    pub async fn apply(&self, event: MembershipEvent) {
        match event {
            MembershipEvent::Added(status) => {
                self.add(&status.id).await;
            }
            MembershipEvent::Removed(id) => {
                self.remove(&id).await;
            }
        }
    }

    /// Apply events in arrival order until every sender is gone
    pub async fn consume(self: Arc<Self>, mut events: mpsc::Receiver<MembershipEvent>) {
        while let Some(event) = events.recv().await {
            self.apply(event).await;
        }
        tracing::debug!("Membership channel closed");
    }

    /// Replace the membership with a full read of the discovery prefix
    ///
    /// Entries whose value does not decode are skipped.
    pub async fn refresh(
        &self,
        client: &dyn CoordinationClient,
        prefix: &str,
    ) -> CoordinationResult<usize> {
        let entries = tokio::time::timeout(REFRESH_TIMEOUT, client.get_prefix(prefix))
            .await
            .map_err(|_| CoordinationError::Timeout(format!("get_prefix {prefix}")))??;

        let ids: Vec<String> = entries
            .iter()
            .filter_map(|kv| match WorkerStatus::decode(&kv.value) {
                Ok(status) => Some(status.id),
                Err(e) => {
                    tracing::warn!(key = %kv.key, error = %e, "Skipping undecodable worker entry");
                    None
                }
            })
            .collect();

        let mut state = self.state.write().await;
        state.replace(ids);
        let size = state.len();
        drop(state);

        metrics::update_pool_size(size);
        Ok(size)
    }

    /// Refresh on a fixed tick until shutdown
    pub async fn run_auto_refresh(
        self: Arc<Self>,
        client: Arc<dyn CoordinationClient>,
        prefix: String,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.refresh(client.as_ref(), &prefix).await {
                        Ok(size) => tracing::debug!(size, "Worker pool reconciled"),
                        Err(e) => tracing::warn!(error = %e, "Worker pool refresh failed"),
                    }
                }
                _ = shutdown::signalled(&mut shutdown) => break,
            }
        }
    }

    async fn publish_size(&self) {
        metrics::update_pool_size(self.len().await);
    }
}
