//! In-process queue store

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{QueueClient, QueueError, QueueResult};

#[derive(Default)]
struct QueueState {
    lists: HashMap<String, VecDeque<String>>,
    keys: HashMap<String, (String, Instant)>,
    sorted: HashMap<String, Vec<(i64, String)>>,
    failing: HashSet<String>,
    unmeasurable: HashSet<String>,
}

impl QueueState {
    fn list(&mut self, queue: &str) -> &mut VecDeque<String> {
        self.lists.entry(queue.to_string()).or_default()
    }

    fn check_push(&self, queue: &str) -> QueueResult<()> {
        if self.failing.contains(queue) {
            return Err(QueueError::PushRejected {
                queue: queue.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

/// Queue store held in memory
///
/// Clones share state. Blocking calls wake on every push.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    state: Arc<Mutex<QueueState>>,
    pushed: Arc<Notify>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> QueueResult<MutexGuard<'_, QueueState>> {
        self.state
            .lock()
            .map_err(|_| QueueError::Backend("memory queue lock poisoned".to_string()))
    }

    /// Make every push to `queue` fail until [`MemoryQueue::heal`] is called
    pub fn fail_pushes_to(&self, queue: &str) {
        if let Ok(mut state) = self.lock() {
            state.failing.insert(queue.to_string());
        }
    }

    /// Stop injecting failures for `queue`
    pub fn heal(&self, queue: &str) {
        if let Ok(mut state) = self.lock() {
            state.failing.remove(queue);
            state.unmeasurable.remove(queue);
        }
    }

    /// Make length queries on `queue` fail until [`MemoryQueue::heal`] is called
    pub fn fail_len_of(&self, queue: &str) {
        if let Ok(mut state) = self.lock() {
            state.unmeasurable.insert(queue.to_string());
        }
    }

    /// Whether a key is currently set
    pub fn key_exists(&self, key: &str) -> bool {
        self.lock()
            .map(|state| {
                state
                    .keys
                    .get(key)
                    .is_some_and(|(_, expires)| *expires > Instant::now())
            })
            .unwrap_or(false)
    }

    /// Run `op` until it yields a value, the timeout passes, or a push wakes it
    async fn wait_for<F>(&self, timeout: Duration, mut op: F) -> QueueResult<Option<String>>
    where
        F: FnMut(&mut QueueState) -> Option<String>,
    {
        let deadline = Instant::now() + timeout;

        loop {
            let pushed = self.pushed.notified();

            if let Some(value) = op(&mut *self.lock()?) {
                return Ok(Some(value));
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }

            tokio::select! {
                _ = pushed => {}
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
    }
}

#[async_trait]
impl QueueClient for MemoryQueue {
    async fn blocking_move(
        &self,
        src: &str,
        dst: &str,
        timeout: Duration,
    ) -> QueueResult<Option<String>> {
        self.wait_for(timeout, |state| {
            let value = state.list(src).pop_front()?;
            state.list(dst).push_back(value.clone());
            Some(value)
        })
        .await
    }

    async fn blocking_pop(&self, queue: &str, timeout: Duration) -> QueueResult<Option<String>> {
        self.wait_for(timeout, |state| state.list(queue).pop_front())
            .await
    }

    async fn push_back(&self, queue: &str, value: &str) -> QueueResult<()> {
        {
            let mut state = self.lock()?;
            state.check_push(queue)?;
            state.list(queue).push_back(value.to_string());
        }
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn push_front(&self, queue: &str, value: &str) -> QueueResult<()> {
        {
            let mut state = self.lock()?;
            state.check_push(queue)?;
            state.list(queue).push_front(value.to_string());
        }
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn remove(&self, queue: &str, value: &str) -> QueueResult<bool> {
        let mut state = self.lock()?;
        let list = state.list(queue);
        match list.iter().position(|v| v == value) {
            Some(index) => {
                list.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn range_all(&self, queue: &str) -> QueueResult<Vec<String>> {
        let state = self.lock()?;
        Ok(state
            .lists
            .get(queue)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn len(&self, queue: &str) -> QueueResult<usize> {
        let state = self.lock()?;
        if state.unmeasurable.contains(queue) {
            return Err(QueueError::Unavailable("injected failure".to_string()));
        }
        Ok(state.lists.get(queue).map_or(0, VecDeque::len))
    }

    async fn contains(&self, queue: &str, value: &str) -> QueueResult<bool> {
        let state = self.lock()?;
        Ok(state
            .lists
            .get(queue)
            .is_some_and(|list| list.iter().any(|v| v == value)))
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> QueueResult<bool> {
        let mut state = self.lock()?;
        let now = Instant::now();
        if let Some((_, expires)) = state.keys.get(key) {
            if *expires > now {
                return Ok(false);
            }
        }
        state
            .keys
            .insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(true)
    }

    async fn delete_key(&self, key: &str) -> QueueResult<bool> {
        let mut state = self.lock()?;
        Ok(state
            .keys
            .remove(key)
            .is_some_and(|(_, expires)| expires > Instant::now()))
    }

    async fn schedule(&self, set: &str, value: &str, score: i64) -> QueueResult<()> {
        let mut state = self.lock()?;
        let members = state.sorted.entry(set.to_string()).or_default();
        members.retain(|(_, v)| v != value);
        let index = members.partition_point(|(s, _)| *s <= score);
        members.insert(index, (score, value.to_string()));
        Ok(())
    }

    async fn pop_due(&self, set: &str, max_score: i64, limit: usize) -> QueueResult<Vec<String>> {
        let mut state = self.lock()?;
        let Some(members) = state.sorted.get_mut(set) else {
            return Ok(Vec::new());
        };
        let due = members
            .iter()
            .take_while(|(score, _)| *score <= max_score)
            .count()
            .min(limit);
        Ok(members.drain(..due).map(|(_, v)| v).collect())
    }
}
