//! Worker discovery registration
//!
//! A worker publishes its [`WorkerStatus`] under `<prefix><id>`, bound to a
//! lease renewed by a [`Session`]. Losing the lease makes the worker invisible
//! to the scheduler; the heartbeat loop notices and registers again.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::coordination::{CoordinationClient, CoordinationError, Session};
use crate::models::WorkerStatus;

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Coordination(#[from] CoordinationError),

    #[error("Failed to encode worker status: {0}")]
    Encode(#[from] serde_json::Error),

    /// `update` before `register`
    #[error("Worker is not registered")]
    NotRegistered,

    /// The registration lease ended; register again
    #[error("Registration lease lost")]
    LeaseLost,
}

struct Registration {
    key: String,
    session: Session,
}

/// Registration of one worker in the discovery namespace
pub struct WorkerRegistry {
    client: Arc<dyn CoordinationClient>,
    prefix: String,
    current: Mutex<Option<Registration>>,
}

impl WorkerRegistry {
    pub fn new(client: Arc<dyn CoordinationClient>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
            current: Mutex::new(None),
        }
    }

    /// Grant a lease and write the status entry under it
    ///
    /// Replaces any previous registration.
    pub async fn register(&self, status: &WorkerStatus, ttl: Duration) -> RegistryResult<()> {
        let value = status.encode()?;
        let key = format!("{}{}", self.prefix, status.id);

        let mut current = self.current.lock().await;
        if let Some(old) = current.take() {
            old.session.close().await;
        }

        let session = Session::open(self.client.clone(), ttl).await?;
        if let Err(e) = self.client.put(&key, &value, Some(session.lease())).await {
            session.close().await;
            return Err(e.into());
        }

        tracing::info!(worker = %status.id, key = %key, lease = session.lease(), "Worker registered");
        *current = Some(Registration { key, session });
        Ok(())
    }

    /// Overwrite the status entry under the existing lease
    pub async fn update(&self, status: &WorkerStatus) -> RegistryResult<()> {
        let value = status.encode()?;
        let current = self.current.lock().await;
        let registration = current.as_ref().ok_or(RegistryError::NotRegistered)?;

        if registration.session.is_done() {
            return Err(RegistryError::LeaseLost);
        }

        match self
            .client
            .put(&registration.key, &value, Some(registration.session.lease()))
            .await
        {
            Ok(()) => Ok(()),
            Err(CoordinationError::LeaseExpired(_)) => Err(RegistryError::LeaseLost),
            Err(e) => Err(e.into()),
        }
    }

    /// Stop renewing and delete the entry; best effort
    pub async fn unregister(&self) {
        let Some(registration) = self.current.lock().await.take() else {
            return;
        };

        if let Err(e) = self.client.delete(&registration.key).await {
            tracing::warn!(key = %registration.key, error = %e, "Failed to delete worker entry");
        }
        registration.session.close().await;
        tracing::info!(key = %registration.key, "Worker unregistered");
    }

    pub async fn is_registered(&self) -> bool {
        self.current
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.session.is_done())
    }
}
