//! Leader election
//!
//! Each scheduler runs one campaign loop:
//!
//! ```text
//! Candidate --(created election key under own lease)--> Leader
//! Leader --(session lost | shutdown)--> Candidate (or exit on shutdown)
//! ```
//!
//! The election key is written with create-if-absent and bound to the
//! candidate's session lease, so at most one process holds it and it
//! disappears when the holder's lease ends. Transitions are reported as
//! [`LeadershipEvent`]s on a channel, exactly one `Elected` and one
//! `Resigned` per term.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::coordination::{CoordinationClient, CoordinationError, Session};
use crate::metrics;
use crate::shutdown;

/// Result type for election operations
pub type ElectionResult<T> = Result<T, ElectionError>;

/// Election errors
#[derive(Debug, Error)]
pub enum ElectionError {
    #[error(transparent)]
    Coordination(#[from] CoordinationError),

    /// The candidate's session ended before the campaign finished
    #[error("Session lost during campaign")]
    SessionLost,
}

/// Leadership transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadershipEvent {
    Elected,
    Resigned,
}

/// This process's belief about holding leadership
///
/// Cheap to clone and safe to read from any task.
#[derive(Debug, Clone, Default)]
pub struct LeaderFlag(Arc<AtomicBool>);

impl LeaderFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_leader(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn set(&self, value: bool) {
        self.0.store(value, Ordering::SeqCst);
    }
}

/// Election settings
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// Exclusive key contended by all candidates
    pub key: String,

    /// Value written to the key by this candidate
    pub candidate_id: String,

    /// Session lease TTL
    pub ttl: Duration,

    /// Backoff after a failed attempt
    pub retry: Duration,

    /// How often a waiting candidate re-checks the key
    pub poll: Duration,
}

impl ElectionConfig {
    pub fn new(key: impl Into<String>, candidate_id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            candidate_id: candidate_id.into(),
            ttl: Duration::from_secs(10),
            retry: Duration::from_secs(3),
            poll: Duration::from_millis(500),
        }
    }
}

/// Campaign loop for one candidate
pub struct LeaderElector {
    client: Arc<dyn CoordinationClient>,
    config: ElectionConfig,
    flag: LeaderFlag,
    events: mpsc::Sender<LeadershipEvent>,
}

impl LeaderElector {
    pub fn new(
        client: Arc<dyn CoordinationClient>,
        config: ElectionConfig,
        events: mpsc::Sender<LeadershipEvent>,
    ) -> Self {
        Self {
            client,
            config,
            flag: LeaderFlag::new(),
            events,
        }
    }

    /// Handle to the leadership flag
    pub fn flag(&self) -> LeaderFlag {
        self.flag.clone()
    }

    pub fn is_leader(&self) -> bool {
        self.flag.is_leader()
    }

    /// Campaign, lead, resign, repeat; returns after shutdown
    ///
    /// Every failed attempt waits the retry backoff and tries again.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let id = self.config.candidate_id.clone();

        while !shutdown::is_signalled(&shutdown) {
            tracing::info!(candidate = %id, "Starting leader campaign");

            let session = match Session::open(self.client.clone(), self.config.ttl).await {
                Ok(session) => session,
                Err(e) => {
                    tracing::warn!(candidate = %id, error = %e, "Failed to open election session");
                    self.backoff(&mut shutdown).await;
                    continue;
                }
            };

            match self.campaign(&session, &mut shutdown).await {
                Ok(true) => {}
                Ok(false) => {
                    session.close().await;
                    break;
                }
                Err(e) => {
                    tracing::warn!(candidate = %id, error = %e, "Campaign error");
                    session.close().await;
                    self.backoff(&mut shutdown).await;
                    continue;
                }
            }

            self.flag.set(true);
            metrics::update_leadership(&id, true);
            tracing::info!(candidate = %id, lease = session.lease(), "Elected leader");
            let _ = self.events.send(LeadershipEvent::Elected).await;

            tokio::select! {
                _ = session.done() => {
                    tracing::error!(candidate = %id, "Leadership lost due to session end");
                }
                _ = shutdown::signalled(&mut shutdown) => {
                    tracing::info!(candidate = %id, "Leadership relinquished on shutdown");
                }
            }

            self.flag.set(false);
            metrics::update_leadership(&id, false);
            let _ = self.events.send(LeadershipEvent::Resigned).await;

            // Revoking the lease deletes the election key
            session.close().await;
        }

        tracing::info!(candidate = %id, "Campaign loop stopped");
    }

    /// Try to take the election key until won (`true`) or shut down (`false`)
    async fn campaign(
        &self,
        session: &Session,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ElectionResult<bool> {
        loop {
            if session.is_done() {
                return Err(ElectionError::SessionLost);
            }

            let won = self
                .client
                .create(
                    &self.config.key,
                    &self.config.candidate_id,
                    Some(session.lease()),
                )
                .await?;
            if won {
                return Ok(true);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll) => {}
                _ = session.done() => return Err(ElectionError::SessionLost),
                _ = shutdown::signalled(shutdown) => return Ok(false),
            }
        }
    }

    async fn backoff(&self, shutdown: &mut watch::Receiver<bool>) {
        tokio::select! {
            _ = tokio::time::sleep(self.config.retry) => {}
            _ = shutdown::signalled(shutdown) => {}
        }
    }
}
