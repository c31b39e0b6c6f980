//! Call cancellation.
//!
//! Every call carries a [`CallCancellation`]: an explicit cancel flag that can
//! be shared with other tasks through [`CancelToken`], plus an optional
//! deadline set by `cancel_after`. The pipeline checks it before dispatch and
//! races both during dispatch; once response assembly has begun it is
//! no longer consulted.

use crate::error::ExecError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct TokenState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Shareable handle that cancels the call it was taken from.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<TokenState>,
}

impl CancelToken {
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.state.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Completes once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.state.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Completes at `deadline`, or never without one.
pub(crate) async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Cancellation state of one call.
#[derive(Debug, Default)]
pub struct CallCancellation {
    token: CancelToken,
    deadline: Option<Instant>,
}

impl CallCancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort the call `timeout` from now, overriding any previous deadline.
    ///
    /// A zero timeout disables the deadline.
    pub fn cancel_after(&mut self, timeout: Duration) {
        self.deadline = if timeout.is_zero() {
            None
        } else {
            Some(Instant::now() + timeout)
        };
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancelled explicitly or past the deadline.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
            || self
                .deadline
                .map(|deadline| Instant::now() >= deadline)
                .unwrap_or(false)
    }

    /// Fail with the cancellation error if cancelled.
    pub fn check(&self) -> Result<(), ExecError> {
        if self.is_cancelled() {
            Err(cancelled_error())
        } else {
            Ok(())
        }
    }
}

/// Error a cancelled call fails with.
pub fn cancelled_error() -> ExecError {
    ExecError::InternalError("Request cancelled".to_string())
}
