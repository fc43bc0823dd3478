use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Shared stop signal for the client and everything it spawned.
///
/// `stop_application` is the fatal path: the first reason is kept and the host
/// is expected to exit non-zero once `stopped` resolves.
#[derive(Debug, Clone, Default)]
pub struct AppLifetime {
    token: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl AppLifetime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops the application because of an unrecoverable failure.
    pub fn stop_application(&self, reason: impl Into<String>) {
        let reason = reason.into();
        error!(reason = %reason, "Stopping application");
        let _ = self.reason.set(reason);
        self.token.cancel();
    }

    /// Orderly shutdown; no failure reason is recorded.
    pub fn shutdown(&self) {
        info!("Application shutdown requested");
        self.token.cancel();
    }

    pub fn is_stopping(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Why the application was stopped, if it was a failure.
    pub fn stop_reason(&self) -> Option<String> {
        self.reason.get().cloned()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub async fn stopped(&self) {
        self.token.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_stop_reason_wins() {
        let lifetime = AppLifetime::new();
        lifetime.stop_application("heartbeat failed");
        lifetime.stop_application("later failure");

        assert!(lifetime.is_stopping());
        assert_eq!(lifetime.stop_reason().as_deref(), Some("heartbeat failed"));
    }

    #[test]
    fn shutdown_records_no_reason() {
        let lifetime = AppLifetime::new();
        lifetime.clone().shutdown();
        assert!(lifetime.is_stopping());
        assert!(lifetime.stop_reason().is_none());
    }
}
