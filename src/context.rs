//! Cancellation and deadline token threaded through every database call.
//!
//! A [`CallContext`] carries an optional deadline and a cancel signal shared by
//! every context derived from it. Canceling any of them aborts the in-flight
//! operation of all of them.

use crate::error::{DbError, DbResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct CallContext {
    deadline: Option<Instant>,
    timeout: Option<Duration>,
    cancel: Arc<watch::Sender<bool>>,
}

impl CallContext {
    /// A context that never expires and is only canceled explicitly.
    pub fn background() -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            deadline: None,
            timeout: None,
            cancel: Arc::new(cancel),
        }
    }

    /// A fresh context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().child_with_timeout(timeout)
    }

    /// Derive a context sharing this one's cancel signal.
    ///
    /// The child expires at the earlier of the parent's deadline and
    /// `timeout` from now.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let (deadline, timeout) = match (self.deadline, self.timeout) {
            (Some(parent), parent_timeout) if parent <= candidate => (parent, parent_timeout),
            _ => (candidate, Some(timeout)),
        };
        Self {
            deadline: Some(deadline),
            timeout,
            cancel: Arc::clone(&self.cancel),
        }
    }

    /// Signal cancellation to this context and every context sharing its signal.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_canceled(&self) -> bool {
        *self.cancel.borrow()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when the context has no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Fail fast if the context is already canceled or expired.
    pub fn check(&self, operation: &str) -> DbResult<()> {
        if self.is_canceled() {
            return Err(DbError::canceled(operation));
        }
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => Err(self.expired(operation)),
            _ => Ok(()),
        }
    }

    /// Resolves once the context is canceled.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|canceled| *canceled).await;
    }

    /// Drive `fut` to completion unless the context is canceled or expires first.
    ///
    /// Dropping `fut` on abort is what interrupts the driver; sqlx futures are
    /// cancel-safe with respect to the pool.
    pub async fn run<T, E, F>(&self, operation: &str, fut: F) -> DbResult<T>
    where
        F: Future<Output = Result<T, E>>,
        DbError: From<E>,
    {
        self.check(operation)?;

        let guarded = async {
            tokio::select! {
                biased;
                _ = self.cancelled() => Err(DbError::canceled(operation)),
                result = fut => result.map_err(DbError::from),
            }
        };

        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, guarded)
                .await
                .unwrap_or_else(|_| Err(self.expired(operation))),
            None => guarded.await,
        }
    }

    fn expired(&self, operation: &str) -> DbError {
        DbError::timeout(operation, self.timeout.unwrap_or_default())
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::background()
    }
}
