//! In-process coordination store
//!
//! Leases expire lazily: every operation first purges leases whose deadline
//! has passed, deleting their keys and notifying watchers, so expiry is
//! observed no later than the next call.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{
    CoordinationClient, CoordinationError, CoordinationResult, KeyValue, LeaseId, WatchEvent,
    WatchReceiver, WATCH_CHANNEL_CAPACITY,
};

struct LeaseRecord {
    ttl: Duration,
    deadline: Instant,
}

struct Entry {
    value: String,
    lease: Option<LeaseId>,
}

struct Subscriber {
    prefix: String,
    tx: mpsc::Sender<WatchEvent>,
}

#[derive(Default)]
struct MemoryState {
    next_lease: LeaseId,
    leases: HashMap<LeaseId, LeaseRecord>,
    entries: BTreeMap<String, Entry>,
    subscribers: Vec<Subscriber>,
}

impl MemoryState {
    fn purge_expired(&mut self, now: Instant) {
        let expired: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, record)| record.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for lease in expired {
            tracing::debug!(lease, "Lease expired");
            self.drop_lease(lease);
        }
    }

    fn drop_lease(&mut self, lease: LeaseId) {
        self.leases.remove(&lease);

        let bound: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.lease == Some(lease))
            .map(|(key, _)| key.clone())
            .collect();

        for key in bound {
            self.entries.remove(&key);
            self.notify(WatchEvent::Delete { key });
        }
    }

    fn lease_alive(&self, lease: Option<LeaseId>) -> CoordinationResult<()> {
        match lease {
            Some(id) if !self.leases.contains_key(&id) => Err(CoordinationError::LeaseExpired(id)),
            _ => Ok(()),
        }
    }

    fn write(&mut self, key: &str, value: &str, lease: Option<LeaseId>) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                lease,
            },
        );
        self.notify(WatchEvent::Put(KeyValue::new(key, value)));
    }

    fn notify(&mut self, event: WatchEvent) {
        self.subscribers.retain(|sub| !sub.tx.is_closed());

        for sub in &self.subscribers {
            if !event.key().starts_with(&sub.prefix) {
                continue;
            }
            if let Err(e) = sub.tx.try_send(event.clone()) {
                tracing::warn!(key = %event.key(), error = %e, "Dropping watch event");
            }
        }
    }
}

/// Coordination store held entirely in memory
///
/// Cloning shares the underlying state, so several components (or several
/// simulated processes) can observe the same store.
#[derive(Clone, Default)]
pub struct MemoryCoordination {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryCoordination {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> CoordinationResult<MutexGuard<'_, MemoryState>> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| CoordinationError::Backend("memory store lock poisoned".to_string()))?;
        state.purge_expired(Instant::now());
        Ok(state)
    }

    /// Force a lease to expire now, as if its keepalive had stopped
    pub fn expire_lease(&self, lease: LeaseId) -> CoordinationResult<()> {
        let mut state = self.lock()?;
        state.drop_lease(lease);
        Ok(())
    }

    /// Number of live leases
    pub fn lease_count(&self) -> usize {
        self.lock().map(|state| state.leases.len()).unwrap_or(0)
    }
}

#[async_trait]
impl CoordinationClient for MemoryCoordination {
    async fn grant_lease(&self, ttl: Duration) -> CoordinationResult<LeaseId> {
        let mut state = self.lock()?;
        state.next_lease += 1;
        let id = state.next_lease;
        state.leases.insert(
            id,
            LeaseRecord {
                ttl,
                deadline: Instant::now() + ttl,
            },
        );
        Ok(id)
    }

    async fn keep_alive(&self, lease: LeaseId) -> CoordinationResult<bool> {
        let mut state = self.lock()?;
        match state.leases.get_mut(&lease) {
            Some(record) => {
                record.deadline = Instant::now() + record.ttl;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn revoke_lease(&self, lease: LeaseId) -> CoordinationResult<()> {
        let mut state = self.lock()?;
        state.drop_lease(lease);
        Ok(())
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> CoordinationResult<()> {
        let mut state = self.lock()?;
        state.lease_alive(lease)?;
        state.write(key, value, lease);
        Ok(())
    }

    async fn create(
        &self,
        key: &str,
        value: &str,
        lease: Option<LeaseId>,
    ) -> CoordinationResult<bool> {
        let mut state = self.lock()?;
        state.lease_alive(lease)?;
        if state.entries.contains_key(key) {
            return Ok(false);
        }
        state.write(key, value, lease);
        Ok(true)
    }

    async fn get(&self, key: &str) -> CoordinationResult<Option<String>> {
        let state = self.lock()?;
        Ok(state.entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn get_prefix(&self, prefix: &str) -> CoordinationResult<Vec<KeyValue>> {
        let state = self.lock()?;
        Ok(state
            .entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| KeyValue::new(key.clone(), entry.value.clone()))
            .collect())
    }

    async fn delete(&self, key: &str) -> CoordinationResult<bool> {
        let mut state = self.lock()?;
        let existed = state.entries.remove(key).is_some();
        if existed {
            state.notify(WatchEvent::Delete {
                key: key.to_string(),
            });
        }
        Ok(existed)
    }

    async fn watch_prefix(&self, prefix: &str) -> CoordinationResult<WatchReceiver> {
        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let mut state = self.lock()?;
        state.subscribers.push(Subscriber {
            prefix: prefix.to_string(),
            tx,
        });
        Ok(rx)
    }
}
