//! Progress reporting and cooperative cancellation.
//!
//! The cancellation token is the only shared-mutable handle between the
//! dispatcher and a running handler: an atomic flag plus a wake channel.
//! Progress tokens are opaque client-chosen values; routing is always gated
//! by the request-id mapping kept in the session, never by the token alone.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

use crate::protocol::JsonRpcNotification;
use crate::transport::Transport;

/// Cooperative cancellation handle.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

#[derive(Debug, Default)]
struct TokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    /// Fresh, un-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the flag and wake any waiter. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Poll the flag. Handlers check this at their own safe points.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Suspend until cancelled. Useful in `tokio::select!` arms.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.inner.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// Emits `notifications/progress` for one in-flight request.
#[derive(Clone)]
pub struct ProgressReporter {
    transport: Arc<dyn Transport>,
    session_id: String,
    token: serde_json::Value,
}

impl ProgressReporter {
    /// Bind a reporter to a session and its client-chosen token.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        session_id: impl Into<String>,
        token: serde_json::Value,
    ) -> Self {
        Self { transport, session_id: session_id.into(), token }
    }

    /// Send one progress update. Updates arrive in call order; delivery
    /// failures are logged and swallowed since progress is advisory.
    pub async fn report(&self, progress: f64, total: Option<f64>) {
        let mut params = serde_json::json!({
            "progressToken": self.token,
            "progress": progress,
        });
        if let Some(total) = total {
            params["total"] = serde_json::json!(total);
        }
        let note = JsonRpcNotification::new("notifications/progress", params);
        if let Err(err) = self
            .transport
            .send(&self.session_id, note.to_value().to_string())
            .await
        {
            tracing::debug!(session_id = %self.session_id, error = %err, "Dropped progress update");
        }
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("session_id", &self.session_id)
            .field("token", &self.token)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_starts_clear() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancel_is_sticky_and_idempotent() {
        let token = CancellationToken::new();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
        assert!(token.clone().is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            true
        });
        tokio::task::yield_now().await;
        token.cancel();
        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_returns_immediately_if_already_set() {
        let token = CancellationToken::new();
        token.cancel();
        // Must not hang.
        token.cancelled().await;
    }

    #[test]
    fn test_waiter_parks_until_cancel() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let mut task = tokio_test::task::spawn(async move { waiter.cancelled().await });

        tokio_test::assert_pending!(task.poll());
        token.cancel();
        assert!(task.is_woken());
        tokio_test::assert_ready!(task.poll());
    }
}
