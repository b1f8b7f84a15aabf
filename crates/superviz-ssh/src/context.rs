//! Cancellation and deadline propagation for network-facing calls

use crate::error::{ErrorKind, SshError};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a call context stopped waiting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// The context (or one of its parents) was cancelled
    Cancelled,
    /// The context deadline passed
    DeadlineExceeded,
}

impl Interrupt {
    /// Short reason string used in error context
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "timeout",
        }
    }

    /// Convert into a classified error of the given kind
    pub fn into_error(self, kind: ErrorKind, operation: &str) -> SshError {
        SshError::new(kind, format!("{} {}", operation, self.reason()))
            .with_context("reason", self.reason())
    }
}

/// Cancellable, optionally deadline-bound context passed to every call that
/// touches the network
///
/// Derived contexts share cancellation with their parent: cancelling a parent
/// cancels every child, cancelling a child leaves the parent running.
#[derive(Debug, Clone)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Derive a child context that expires after `timeout`
    ///
    /// The child keeps the parent's deadline when that one is earlier.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let requested = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) if parent < requested => parent,
            _ => requested,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Derive a child context that can be cancelled independently
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Cancel this context and all contexts derived from it
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Deadline, if one is set
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when there is no deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Non-blocking check of the context state
    pub fn interrupted(&self) -> Option<Interrupt> {
        if self.token.is_cancelled() {
            return Some(Interrupt::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Interrupt::DeadlineExceeded),
            _ => None,
        }
    }

    /// Wait until the context is cancelled or its deadline passes
    pub async fn done(&self) -> Interrupt {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => Interrupt::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => Interrupt::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                Interrupt::Cancelled
            }
        }
    }

    /// Run a future to completion unless the context ends first
    ///
    /// Cancellation wins ties so an already-cancelled context never starts
    /// new work.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, Interrupt>
    where
        F: Future,
    {
        if let Some(interrupt) = self.interrupted() {
            return Err(interrupt);
        }
        tokio::select! {
            biased;
            interrupt = self.done() => Err(interrupt),
            output = fut => Ok(output),
        }
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::background()
    }
}
