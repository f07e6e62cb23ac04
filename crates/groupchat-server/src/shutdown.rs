//! Server shutdown: cancel every chat session, drain the channel registry
//! and wait for the listener and the sessions to finish.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tracing::{info, warn};

use crate::websocket::hub::ChannelRegistry;

/// Owns the server's root cancellation token, its channel registry and the
/// set of running sessions.
///
/// Session connections hold child tokens of [`token`](Self::token), so one
/// [`shutdown`](Self::shutdown) reaches all of them.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    hub: Arc<ChannelRegistry>,
    sessions: TaskTracker,
}

impl ShutdownCoordinator {
    /// Coordinator for the sessions registered in `hub`.
    pub fn new(hub: Arc<ChannelRegistry>) -> Self {
        Self {
            token: CancellationToken::new(),
            hub,
            sessions: TaskTracker::new(),
        }
    }

    /// Root token; connections derive child tokens from it.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Registry drained on shutdown.
    pub fn hub(&self) -> &Arc<ChannelRegistry> {
        &self.hub
    }

    /// Mark one session as running until the returned guard is dropped.
    pub fn track_session(&self) -> TaskTrackerToken {
        self.sessions.token()
    }

    /// Sessions whose guard is still alive.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Cancel every session and empty the registry. Returns how many
    /// registered connections were closed by this call.
    pub fn shutdown(&self) -> usize {
        let first = !self.token.is_cancelled();
        self.token.cancel();
        let _ = self.sessions.close();
        let closed = self.hub.close_all();
        if first {
            info!(closed, sessions = self.sessions.len(), "shutdown initiated");
        }
        closed
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Shut down, then wait up to `timeout` for `listener` and every tracked
    /// session. Returns `false` if the wait timed out.
    pub async fn graceful_shutdown(&self, listener: JoinHandle<()>, timeout: Duration) -> bool {
        let _ = self.shutdown();

        let drain = async {
            if let Err(e) = listener.await {
                warn!(error = %e, "listener task failed");
            }
            self.sessions.wait().await;
        };

        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!(
                remaining = self.sessions.len(),
                "shutdown timed out after {timeout:?}, some sessions may still be running"
            );
            return false;
        }
        info!("all sessions finished");
        true
    }
}
