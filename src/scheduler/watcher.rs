//! Discovery watcher
//!
//! Turns put/delete events under the workers prefix into
//! [`MembershipEvent`]s and hands them to the pool over a channel, in the
//! order the store delivered them.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::coordination::{CoordinationClient, WatchEvent};
use crate::models::WorkerStatus;
use crate::shutdown;

/// Pause before resubscribing when a watch stream ends
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Change in pool membership
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    /// A worker published (or republished) its status
    Added(WorkerStatus),
    /// A worker's entry was deleted or its lease expired
    Removed(String),
}

/// Translate a store event; `None` for values that do not decode
pub fn to_membership(event: WatchEvent, prefix: &str) -> Option<MembershipEvent> {
    match event {
        WatchEvent::Put(kv) => match WorkerStatus::decode(&kv.value) {
            Ok(status) => Some(MembershipEvent::Added(status)),
            Err(e) => {
                tracing::warn!(key = %kv.key, error = %e, "Failed to parse worker status");
                None
            }
        },
        WatchEvent::Delete { key } => {
            let id = key.strip_prefix(prefix).unwrap_or(&key);
            Some(MembershipEvent::Removed(id.to_string()))
        }
    }
}

/// Streams membership changes under a discovery prefix
pub struct WorkerWatcher {
    client: Arc<dyn CoordinationClient>,
    prefix: String,
}

impl WorkerWatcher {
    pub fn new(client: Arc<dyn CoordinationClient>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    /// Forward events until shutdown or until the receiving side is dropped
    ///
    /// A failed or ended subscription is re-established; events missed in
    /// between are picked up by the pool's periodic refresh.
    pub async fn run(
        self,
        events: mpsc::Sender<MembershipEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!(prefix = %self.prefix, "Watching workers");

        while !shutdown::is_signalled(&shutdown) {
            match self.client.watch_prefix(&self.prefix).await {
                Ok(mut stream) => loop {
                    tokio::select! {
                        event = stream.recv() => {
                            let Some(event) = event else {
                                tracing::warn!(prefix = %self.prefix, "Watch stream ended");
                                break;
                            };
                            let Some(membership) = to_membership(event, &self.prefix) else {
                                continue;
                            };
                            tracing::debug!(event = ?membership, "Membership change");
                            if events.send(membership).await.is_err() {
                                return;
                            }
                        }
                        _ = shutdown::signalled(&mut shutdown) => {
                            tracing::info!(prefix = %self.prefix, "Worker watcher stopped");
                            return;
                        }
                    }
                },
                Err(e) => {
                    tracing::warn!(prefix = %self.prefix, error = %e, "Watch subscription failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
                _ = shutdown::signalled(&mut shutdown) => {}
            }
        }
    }
}
