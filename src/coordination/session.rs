//! Lease-backed session with a background keepalive

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{CoordinationClient, CoordinationResult, LeaseId};

/// Shortest interval between keepalives
const MIN_KEEPALIVE_INTERVAL: Duration = Duration::from_millis(100);

/// A lease kept alive until it is closed or lost
///
/// The session is considered lost when the store reports the lease gone or
/// when renewals keep failing for longer than the lease TTL.
pub struct Session {
    client: Arc<dyn CoordinationClient>,
    lease: LeaseId,
    done_rx: watch::Receiver<bool>,
    keeper: JoinHandle<()>,
}

impl Session {
    /// Grant a lease and start renewing it every `ttl / 3`
    pub async fn open(client: Arc<dyn CoordinationClient>, ttl: Duration) -> CoordinationResult<Self> {
        let lease = client.grant_lease(ttl).await?;
        let (done_tx, done_rx) = watch::channel(false);

        let keeper = tokio::spawn(keep_alive_loop(client.clone(), lease, ttl, done_tx));

        tracing::debug!(lease, ttl_ms = ttl.as_millis() as u64, "Session opened");

        Ok(Self {
            client,
            lease,
            done_rx,
            keeper,
        })
    }

    pub fn lease(&self) -> LeaseId {
        self.lease
    }

    /// Whether the lease has been lost
    pub fn is_done(&self) -> bool {
        *self.done_rx.borrow()
    }

    /// Wait until the lease is lost
    pub async fn done(&self) {
        let mut rx = self.done_rx.clone();
        // An Err means the keeper exited, which only happens after it marks done
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Stop renewing and revoke the lease
    pub async fn close(self) {
        self.keeper.abort();
        if let Err(e) = self.client.revoke_lease(self.lease).await {
            tracing::warn!(lease = self.lease, error = %e, "Failed to revoke lease");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.keeper.abort();
    }
}

async fn keep_alive_loop(
    client: Arc<dyn CoordinationClient>,
    lease: LeaseId,
    ttl: Duration,
    done_tx: watch::Sender<bool>,
) {
    let period = (ttl / 3).max(MIN_KEEPALIVE_INTERVAL);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    let mut last_ok = tokio::time::Instant::now();

    loop {
        ticker.tick().await;

        match client.keep_alive(lease).await {
            Ok(true) => last_ok = tokio::time::Instant::now(),
            Ok(false) => {
                tracing::warn!(lease, "Lease lost");
                break;
            }
            Err(e) => {
                tracing::warn!(lease, error = %e, "Keepalive failed");
                if last_ok.elapsed() >= ttl {
                    break;
                }
            }
        }
    }

    let _ = done_tx.send(true);
}
