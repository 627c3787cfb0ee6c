//! Request-scoped cancellation and deadlines.
//!
//! Every inbound controller call carries a [`RequestContext`]. Outbound
//! backend calls and wait loops race against it so a cancelled or expired
//! request unblocks promptly instead of running to its own internal timeout.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Reason a request stopped before its work completed.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum Interruption {
    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,
    /// The request deadline passed.
    #[error("request deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation token, optional deadline and correlation id for one request.
#[derive(Clone, Debug)]
pub struct RequestContext {
    id: Uuid,
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    /// Creates a context with no deadline and a fresh cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            cancellation: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Sets a deadline `timeout` from now.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Binds the context to an externally owned cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Correlation id attached to log spans for this request.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Returns a handle that cancels this request when triggered.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Returns a context detached from this request's cancellation but bound
    /// by its own `timeout`. Used for cleanup that must run after the caller
    /// has gone away.
    #[must_use]
    pub fn detached(&self, timeout: Duration) -> Self {
        Self {
            id: self.id,
            cancellation: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Reports whether the request has been cancelled or has expired.
    ///
    /// # Errors
    ///
    /// Returns the [`Interruption`] that ended the request.
    pub fn check(&self) -> Result<(), Interruption> {
        if self.cancellation.is_cancelled() {
            return Err(Interruption::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(Interruption::DeadlineExceeded);
        }
        Ok(())
    }

    /// Drives `future` to completion unless the request is cancelled or its
    /// deadline passes first.
    ///
    /// # Errors
    ///
    /// Returns [`Interruption`] when the request ends before `future`.
    pub async fn run<F>(&self, future: F) -> Result<F::Output, Interruption>
    where
        F: Future,
    {
        self.check()?;
        let deadline = self.deadline;
        let expiry = async move {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            () = self.cancellation.cancelled() => Err(Interruption::Cancelled),
            () = expiry => Err(Interruption::DeadlineExceeded),
            output = future => Ok(output),
        }
    }

    /// Sleeps for `duration`, waking early if the request ends.
    ///
    /// # Errors
    ///
    /// Returns [`Interruption`] when the request ends during the sleep.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Interruption> {
        self.run(sleep(duration)).await
    }
}
