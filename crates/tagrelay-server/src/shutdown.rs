//! Graceful and fatal shutdown coordination via `CancellationToken`.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Default timeout for graceful shutdown before giving up on tasks.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Coordinates shutdown across listeners and connection tasks.
///
/// A fatal shutdown records a reason; the binary exits non-zero when one is
/// present.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    fatal: Mutex<Option<String>>,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            fatal: Mutex::new(None),
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Initiate shutdown because the process cannot keep serving.
    ///
    /// The first reason wins.
    pub fn fatal(&self, reason: impl Into<String>) {
        let reason = reason.into();
        error!(%reason, "fatal condition, shutting down");
        {
            let mut fatal = self.fatal.lock();
            if fatal.is_none() {
                *fatal = Some(reason);
            }
        }
        self.token.cancel();
    }

    /// The reason passed to [`fatal`](Self::fatal), if any.
    pub fn fatal_reason(&self) -> Option<String> {
        self.fatal.lock().clone()
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Perform a graceful shutdown of all tracked tasks.
    ///
    /// 1. Cancel the shutdown token (signals all tasks)
    /// 2. Wait up to `timeout` for all handles to complete
    pub async fn graceful_shutdown(&self, handles: Vec<JoinHandle<()>>, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        info!(
            task_count = handles.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for tasks to complete"
        );

        let drain = futures::future::join_all(handles);

        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!("shutdown timed out after {timeout:?}, some tasks may still be running");
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
