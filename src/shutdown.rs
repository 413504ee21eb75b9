//! Process shutdown signal
//!
//! Long-running loops take a `watch::Receiver<bool>`; sending `true` (or
//! dropping the sender) asks them to stop.

use tokio::sync::watch;

/// Create a shutdown channel, initially not signalled
pub fn channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Resolve once shutdown was requested or the sender is gone
pub async fn signalled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Whether shutdown was already requested
pub fn is_signalled(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow() || rx.has_changed().is_err()
}
