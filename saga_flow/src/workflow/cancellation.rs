//! Cooperative cancellation for workflow runs.
//!
//! A [`CancellationTokenSource`] owns the cancellation state; cheaply
//! cloneable [`CancellationToken`]s observe it. The scheduler checks
//! the token before launching each ready step: once cancelled, no new
//! steps are issued, already-running steps drain normally, and the run
//! fails with a cancellation error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Thread-safe cancellation token.
///
/// Cloning a token creates a new handle to the same cancellation
/// state; when the source cancels, every clone reports cancelled.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Returns true if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Waits until cancellation is requested.
    ///
    /// Returns immediately if the token is already cancelled.
    pub async fn wait_cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

/// Owner of the cancellation state.
///
/// # Example
///
/// ```ignore
/// let source = CancellationTokenSource::new();
/// let token = source.token();
///
/// tokio::spawn(async move {
///     token.wait_cancelled().await;
///     // wind down
/// });
///
/// source.cancel();
/// ```
#[derive(Clone, Debug)]
pub struct CancellationTokenSource {
    token: CancellationToken,
}

impl CancellationTokenSource {
    /// Creates a new, non-cancelled source.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Returns a token observing this source.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns true if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Default for CancellationTokenSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_token_starts_uncancelled() {
        let source = CancellationTokenSource::new();
        assert!(!source.is_cancelled());
        assert!(!source.token().is_cancelled());
    }

    #[test]
    fn test_cancel_visible_to_all_clones() {
        let source = CancellationTokenSource::new();
        let t1 = source.token();
        let t2 = t1.clone();

        source.cancel();

        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
    }

    #[test]
    fn test_cancel_idempotent() {
        let source = CancellationTokenSource::new();
        source.cancel();
        source.cancel();
        assert!(source.is_cancelled());
    }

    #[tokio::test]
    async fn test_wait_cancelled_wakes() {
        let source = CancellationTokenSource::new();
        let token = source.token();

        let waiter = tokio::spawn(async move {
            token.wait_cancelled().await;
        });

        tokio::time::sleep(Duration::from_millis(5)).await;
        source.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_on_already_cancelled_returns() {
        let source = CancellationTokenSource::new();
        source.cancel();
        // Must not hang.
        source.token().wait_cancelled().await;
    }
}
