//! Cooperative cancellation for sync runs.
//!
//! A [`CancelToken`] spans one run. Long operations call
//! [`CancelToken::checkpoint`] before each blocking step, and blocked waits
//! race against [`CancelToken::cancelled`]. Child tokens are cancelled with
//! their parent but can be cancelled on their own without touching it.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{Error, Result};

const LIVE: u8 = 0;
const CANCELLED: u8 = 1;
const DEADLINE: u8 = 2;

/// Why a token stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Cancelled explicitly (Ctrl-C, or a sibling task failed).
    Cancelled,
    /// The token's deadline passed.
    DeadlineExceeded,
}

impl CancelReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "deadline exceeded",
        }
    }

    const fn code(self) -> u8 {
        match self {
            Self::Cancelled => CANCELLED,
            Self::DeadlineExceeded => DEADLINE,
        }
    }
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct Inner {
    state: AtomicU8,
    notify: Notify,
    deadline: Option<Instant>,
    children: Mutex<Vec<Weak<Inner>>>,
}

impl Inner {
    fn new(deadline: Option<Instant>) -> Self {
        Self {
            state: AtomicU8::new(LIVE),
            notify: Notify::new(),
            deadline,
            children: Mutex::new(Vec::new()),
        }
    }

    fn cancel(&self, reason: CancelReason) {
        if self
            .state
            .compare_exchange(LIVE, reason.code(), Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.notify.notify_waiters();

        let children = std::mem::take(
            &mut *self
                .children
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel(reason);
        }
    }

    fn reason(&self) -> Option<CancelReason> {
        match self.state.load(Ordering::Acquire) {
            CANCELLED => Some(CancelReason::Cancelled),
            DEADLINE => Some(CancelReason::DeadlineExceeded),
            _ => match self.deadline {
                Some(deadline) if Instant::now() >= deadline => {
                    Some(CancelReason::DeadlineExceeded)
                }
                _ => None,
            },
        }
    }
}

/// Clonable cancellation handle with an optional deadline.
///
/// Clones share state: cancelling any clone cancels all of them.
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// A token that only stops when cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::new(None)),
        }
    }

    /// A token that also stops once `timeout` has elapsed.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner::new(Some(Instant::now() + timeout))),
        }
    }

    /// Derive a token that is cancelled whenever this one is.
    ///
    /// The child inherits this token's deadline. Cancelling the child does
    /// not affect the parent.
    #[must_use]
    pub fn child(&self) -> Self {
        let child = Arc::new(Inner::new(self.inner.deadline));
        {
            let mut children = self
                .inner
                .children
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            children.retain(|weak| weak.strong_count() > 0);
            children.push(Arc::downgrade(&child));
        }
        if let Some(reason) = self.inner.reason() {
            child.cancel(reason);
        }
        Self { inner: child }
    }

    /// Cancel this token and every token derived from it.
    pub fn cancel(&self) {
        self.inner.cancel(CancelReason::Cancelled);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.reason().is_some()
    }

    /// Why this token stopped, if it has.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        self.inner.reason()
    }

    /// Fail with [`Error::Cancelled`] if the token has stopped.
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` with the stop reason.
    pub fn checkpoint(&self) -> Result<()> {
        match self.inner.reason() {
            Some(reason) => Err(Error::Cancelled(reason)),
            None => Ok(()),
        }
    }

    /// Resolve once the token is cancelled or its deadline passes.
    pub async fn cancelled(&self) -> CancelReason {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(reason) = self.inner.reason() {
                return reason;
            }

            match self.inner.deadline {
                Some(deadline) => tokio::select! {
                    () = notified.as_mut() => {}
                    () = tokio::time::sleep_until(deadline) => {
                        self.inner.cancel(CancelReason::DeadlineExceeded);
                    }
                },
                None => notified.await,
            }
        }
    }

    /// Drive `fut` to completion unless the token stops first.
    ///
    /// A token that has already stopped wins over a ready future.
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` if the token stops, otherwise `fut`'s error.
    pub async fn run_until_cancelled<T, F>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            reason = self.cancelled() => Err(Error::Cancelled(reason)),
            out = fut => out,
        }
    }

    /// Cancel this token when the returned guard is dropped.
    #[must_use]
    pub fn drop_guard(&self) -> DropGuard {
        DropGuard {
            token: self.clone(),
        }
    }
}

/// Cancels its token on drop.
#[derive(Debug)]
pub struct DropGuard {
    token: CancelToken,
}

impl Drop for DropGuard {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
