//! Server-wide shutdown.
//!
//! Every connection token is a child of the coordinator's token, so one
//! [`ShutdownCoordinator::shutdown`] stops the accept loop and closes every
//! open connection. Background tasks registered with
//! [`ShutdownCoordinator::track`] are awaited by [`ShutdownCoordinator::drain`].

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Wait applied by [`ShutdownCoordinator::drain`] when none is given.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Root cancellation plus the background tasks that must finish on exit.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ShutdownCoordinator {
    /// Create a coordinator with nothing tracked.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Clone of the root token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel the root token. Later calls do nothing.
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            info!(tracked = self.tasks.lock().len(), "shutdown initiated");
            self.token.cancel();
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Await `handle` during [`drain`](Self::drain).
    pub fn track(&self, handle: JoinHandle<()>) {
        self.tasks.lock().push(handle);
    }

    /// Shut down, then wait up to `timeout` for every tracked task.
    ///
    /// Returns `false` if some task was still running when the wait ended.
    pub async fn drain(&self, timeout: Option<Duration>) -> bool {
        self.shutdown();
        let timeout = timeout.unwrap_or(DEFAULT_DRAIN_TIMEOUT);
        let tasks = std::mem::take(&mut *self.tasks.lock());
        let count = tasks.len();

        match tokio::time::timeout(timeout, futures::future::join_all(tasks)).await {
            Ok(results) => {
                for err in results.into_iter().filter_map(Result::err) {
                    warn!(error = %err, "background task failed during shutdown");
                }
                info!(count, "background tasks finished");
                true
            }
            Err(_) => {
                warn!(count, ?timeout, "timed out waiting for background tasks");
                false
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_cancels_connection_tokens() {
        let coord = ShutdownCoordinator::new();
        let alice = coord.token().child_token();
        let bob = coord.token().child_token();

        alice.cancel();
        assert!(!coord.is_shutting_down());
        assert!(!bob.is_cancelled());

        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
        assert!(bob.is_cancelled());
    }

    #[tokio::test]
    async fn drain_waits_for_tracked_tasks() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        coord.track(tokio::spawn(async move {
            token.cancelled().await;
            let _ = done_tx.send(());
        }));

        assert!(coord.drain(None).await);
        assert!(done_rx.await.is_ok());
    }

    #[tokio::test]
    async fn drain_with_nothing_tracked() {
        let coord = ShutdownCoordinator::new();
        assert!(coord.drain(Some(Duration::from_millis(10))).await);
        assert!(coord.is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn drain_gives_up_on_stuck_task() {
        let coord = ShutdownCoordinator::new();
        coord.track(tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        }));

        assert!(!coord.drain(Some(Duration::from_millis(100))).await);
    }
}
