//! Deadline and cancellation scope threaded through every wait loop.
//!
//! A [`WaitContext`] is cheap to clone. Deriving a child with
//! [`WaitContext::with_timeout`] can only shorten the deadline, never extend
//! it, so nested strategies always honor the tightest enclosing budget.

use std::future::Future;
use std::time::Duration;

use futures::future::{pending, select_all};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::core::errors::WaitError;

#[derive(Debug, Clone, Default)]
pub struct WaitContext {
    deadline: Option<Instant>,
    cancel: Vec<watch::Receiver<bool>>,
}

/// Cancels every context derived from the one it was created with.
///
/// Dropping the handle does not cancel.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl WaitContext {
    /// A context with neither deadline nor cancellation.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a context whose deadline is `now + timeout`, or the parent's
    /// deadline if that is earlier.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(current) if current <= candidate => current,
            _ => candidate,
        };
        Self {
            deadline: Some(deadline),
            cancel: self.cancel.clone(),
        }
    }

    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let mut cancel = self.cancel.clone();
        cancel.push(rx);
        (
            Self {
                deadline: self.deadline,
                cancel,
            },
            CancelHandle { tx },
        )
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// The context error if the context is already done.
    pub fn err(&self) -> Option<WaitError> {
        if self.cancel.iter().any(|rx| *rx.borrow()) {
            return Some(WaitError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(WaitError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves with the context error once the deadline passes or a cancel fires.
    pub async fn done(&self) -> WaitError {
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => pending::<()>().await,
            }
        };
        let cancelled = async {
            if self.cancel.is_empty() {
                return pending::<()>().await;
            }
            let signals = self.cancel.iter().cloned().map(|mut rx| {
                Box::pin(async move {
                    // a dropped handle means "never cancelled"
                    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
                        pending::<()>().await;
                    }
                })
            });
            select_all(signals).await;
        };

        tokio::select! {
            _ = cancelled => WaitError::Cancelled,
            _ = deadline => WaitError::DeadlineExceeded,
        }
    }

    /// Sleep for `period` unless the context finishes first.
    pub async fn sleep(&self, period: Duration) -> Result<(), WaitError> {
        if let Some(err) = self.err() {
            return Err(err);
        }
        // an expiry landing on the same tick as the wake-up wins
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            _ = tokio::time::sleep(period) => Ok(()),
        }
    }

    /// Race `fut` against the context.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, WaitError> {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            output = fut => Ok(output),
            err = self.done() => Err(err),
        }
    }
}
