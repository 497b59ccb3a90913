//! Cancellation token for cooperative cancellation.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

use crate::errors::AccredflowError;

/// A token for cooperative cancellation.
///
/// The orchestrator checks the token at every state transition; work already
/// in flight finishes first. Cancellation is idempotent and only the first
/// reason is kept.
#[derive(Default)]
pub struct CancellationToken {
    cancelled: AtomicBool,
    reason: RwLock<Option<String>>,
}

impl CancellationToken {
    /// Creates a new cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation with a reason.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let reason = reason.into();
            info!(reason = %reason, "Cancellation requested");
            *self.reason.write() = Some(reason);
        }
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// Fails with [`AccredflowError::Cancelled`] once cancellation is requested.
    pub fn checkpoint(&self) -> Result<(), AccredflowError> {
        if self.is_cancelled() {
            let reason = self
                .reason()
                .unwrap_or_else(|| "cancellation requested".to_string());
            return Err(AccredflowError::Cancelled(reason));
        }
        Ok(())
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_token_default_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.reason().is_none());
        assert!(token.checkpoint().is_ok());
    }

    #[test]
    fn test_token_cancel_idempotent() {
        let token = CancellationToken::new();
        token.cancel("First reason");
        token.cancel("Second reason");

        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some("First reason".to_string()));
    }

    #[test]
    fn test_checkpoint_reports_reason() {
        let token = CancellationToken::new();
        token.cancel("operator stop");

        match token.checkpoint() {
            Err(AccredflowError::Cancelled(reason)) => assert_eq!(reason, "operator stop"),
            other => panic!("expected cancellation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_from_another_task() {
        let token = Arc::new(CancellationToken::new());
        let remote = token.clone();

        tokio::spawn(async move { remote.cancel("shutdown") })
            .await
            .unwrap();

        assert!(token.checkpoint().is_err());
    }
}
