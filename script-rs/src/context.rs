//! Cancellation and deadline signal threaded through a script run.
//!
//! A [`Context`] is cheap to clone.  Deriving a child with
//! [`Context::with_cancel`] or [`Context::with_deadline`] keeps every signal
//! of the parent, so cancelling a parent cancels all of its children while a
//! child can be cancelled on its own.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{select_all, BoxFuture, FutureExt};
use tokio::sync::watch;

/// Why a [`Context`] is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// A cancellation/deadline signal.
#[derive(Debug, Clone)]
pub struct Context {
    signals: Vec<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

/// Cancels the [`Context`] it was created with (and that context's children).
///
/// Dropping the handle does not cancel.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self { signals: Vec::new(), deadline: None }
    }

    /// Derive a child that can additionally be cancelled through the returned
    /// handle.
    pub fn with_cancel(&self) -> (Context, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let mut child = self.clone();
        child.signals.push(rx);
        (child, CancelHandle { tx: Arc::new(tx) })
    }

    /// Derive a child that expires at `deadline` (or the parent's, if earlier).
    pub fn with_deadline(&self, deadline: Instant) -> Context {
        let mut child = self.clone();
        child.deadline = Some(match self.deadline {
            Some(d) => d.min(deadline),
            None => deadline,
        });
        child
    }

    pub fn with_timeout(&self, timeout: Duration) -> Context {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// `Some` once the context is done.  Cancellation wins over the deadline.
    pub fn err(&self) -> Option<ContextError> {
        if self.signals.iter().any(|rx| *rx.borrow()) {
            return Some(ContextError::Canceled);
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves when the context is cancelled or its deadline passes.
    pub async fn done(&self) -> ContextError {
        if let Some(err) = self.err() {
            return err;
        }

        let mut waits: Vec<BoxFuture<'static, ContextError>> = self
            .signals
            .iter()
            .cloned()
            .map(|mut rx| {
                async move {
                    let fired = rx.wait_for(|cancelled| *cancelled).await.is_ok();
                    if !fired {
                        // Every handle was dropped: this signal can never fire.
                        std::future::pending::<()>().await;
                    }
                    ContextError::Canceled
                }
                .boxed()
            })
            .collect();
        if let Some(deadline) = self.deadline {
            waits.push(
                async move {
                    tokio::time::sleep_until(deadline.into()).await;
                    ContextError::DeadlineExceeded
                }
                .boxed(),
            );
        }
        if waits.is_empty() {
            return std::future::pending().await;
        }
        select_all(waits).await.0
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
