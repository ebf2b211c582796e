//! Shutdown of the realtime server.
//!
//! Cancelling the token stops the listener, and every lifecycle handler
//! answers it by sending 1001 (going away) and unregistering. Shutdown is
//! complete once the serve task has exited and the registry is empty.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::registry::ConnectionRegistry;

/// Upper bound on the whole drain when the caller gives none.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// How often the registry is polled while connections close.
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Owns the server-wide cancellation token.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a coordinator with a fresh token.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token watched by the listener and every connection.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Start shutting down. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the token, then wait for the serve `handles` to finish and for
    /// every registered connection to close with 1001.
    ///
    /// Returns the number of connections still registered when `timeout`
    /// (default 10s) ran out.
    pub async fn graceful_shutdown(
        &self,
        handles: Vec<JoinHandle<()>>,
        registry: &ConnectionRegistry,
        timeout: Option<Duration>,
    ) -> usize {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        info!(
            task_count = handles.len(),
            connections = registry.len(),
            timeout_secs = timeout.as_secs(),
            "closing connections with 1001"
        );

        let drain = async {
            let _ = futures::future::join_all(handles).await;
            while !registry.is_empty() {
                tokio::time::sleep(DRAIN_POLL).await;
            }
        };
        if tokio::time::timeout(timeout, drain).await.is_err() {
            let remaining = registry.len();
            warn!(remaining, "shutdown timed out after {timeout:?}");
            return remaining;
        }
        0
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
