//! Per-request cancellation: a CancellationToken plus an absolute deadline.
//! Every suspension point of a translate request runs through
//! `RequestScope::run`, so a deadline expiry or a dropped request aborts
//! the stage that is in flight.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a stage did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aborted {
    Cancelled,
    DeadlineExceeded,
}

impl fmt::Display for Aborted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aborted::Cancelled => write!(f, "request cancelled"),
            Aborted::DeadlineExceeded => write!(f, "request deadline exceeded"),
        }
    }
}

/// Cancellation scope of one inbound request. Cancels its token when
/// dropped, which happens when the server drops the handler future after
/// a client disconnect.
pub struct RequestScope {
    token: CancellationToken,
    deadline: Instant,
}

impl RequestScope {
    pub fn new(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Instant::now() + timeout,
        }
    }

    /// Token handed to stages that watch for cancellation themselves.
    /// It is cancelled on scope drop and once the deadline has passed
    /// while a stage is running under `run`.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Drive `stage` until it finishes, the token is cancelled or the
    /// deadline passes, whichever comes first.
    pub async fn run<F, T>(&self, stage: F) -> Result<T, Aborted>
    where
        F: Future<Output = T>,
    {
        if self.is_cancelled() {
            return Err(Aborted::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Aborted::Cancelled),
            _ = tokio::time::sleep_until(self.deadline) => {
                self.token.cancel();
                Err(Aborted::DeadlineExceeded)
            }
            out = stage => Ok(out),
        }
    }
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
