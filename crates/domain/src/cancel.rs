//! Per-drive abort signal.
//!
//! Each active run holds a `CancelToken`. A stop request cancels the token
//! with a [`StopKind`]; the drive observes it at every suspension point —
//! before each iteration, before each tool call, around streaming chunks,
//! and while sleeping for retry backoff (via the async
//! [`CancelToken::cancelled`]).

use std::sync::Arc;

use tokio::sync::watch;

use crate::error::Error;
use crate::runstate::StopKind;

/// A cancellation token checkable both synchronously (hot loops) and
/// asynchronously (abort-aware sleeps and `select!` arms). Carries the
/// reason of the stop request that fired it.
#[derive(Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<Option<StopKind>>>,
    rx: watch::Receiver<Option<StopKind>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Signal cancellation with a reason.
    ///
    /// The first reason wins, except that `emergency_stop` upgrades any
    /// previously stored non-emergency reason.
    pub fn cancel(&self, reason: StopKind) {
        self.tx.send_modify(|current| match current {
            None => *current = Some(reason),
            Some(StopKind::EmergencyStop) => {}
            Some(_) if reason == StopKind::EmergencyStop => *current = Some(reason),
            Some(_) => {}
        });
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// The reason the token was cancelled with, if any.
    pub fn stop_reason(&self) -> Option<StopKind> {
        self.rx.borrow().clone()
    }

    /// The `Interrupted` error a suspension point throws when this token
    /// has fired. Falls back to `user_stop` when no reason was recorded.
    pub fn interruption(&self) -> Error {
        Error::Interrupted(self.stop_reason().unwrap_or(StopKind::UserStop))
    }

    /// Resolve once cancellation has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // wait_for returns immediately when the current value already matches.
        let _ = rx.wait_for(|reason| reason.is_some()).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_lifecycle() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert_eq!(token.stop_reason(), None);

        token.cancel(StopKind::UserStop);
        assert!(token.is_cancelled());
        assert_eq!(token.stop_reason(), Some(StopKind::UserStop));
    }

    #[test]
    fn first_reason_wins_except_emergency() {
        let token = CancelToken::new();
        token.cancel(StopKind::UserStop);
        token.cancel(StopKind::SystemStop {
            detail: "late".into(),
        });
        assert_eq!(token.stop_reason(), Some(StopKind::UserStop));

        token.cancel(StopKind::EmergencyStop);
        assert_eq!(token.stop_reason(), Some(StopKind::EmergencyStop));

        // Emergency is never downgraded.
        token.cancel(StopKind::UserStop);
        assert_eq!(token.stop_reason(), Some(StopKind::EmergencyStop));
    }

    #[test]
    fn clone_shares_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel(StopKind::EmergencyStop);
        assert!(clone.is_cancelled());
        assert_eq!(clone.stop_reason(), Some(StopKind::EmergencyStop));
    }

    #[test]
    fn interruption_defaults_to_user_stop() {
        let token = CancelToken::new();
        match token.interruption() {
            Error::Interrupted(reason) => assert_eq!(reason, StopKind::UserStop),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn cancelled_resolves_after_cancel() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            42
        });
        tokio::task::yield_now().await;
        token.cancel(StopKind::UserStop);
        assert_eq!(handle.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn cancelled_resolves_immediately_when_already_set() {
        let token = CancelToken::new();
        token.cancel(StopKind::EmergencyStop);
        // Must not hang.
        token.cancelled().await;
    }
}
