//! Bounded polling until a backend resource reaches a terminal state.
//!
//! The backend answers mutations immediately and completes them in the
//! background. [`wait_until`] re-fetches the resource on a backoff schedule
//! until a caller-supplied [`Verdict`] reports success or failure, the budget
//! runs out, or the request context ends. Nothing is cached between waits
//! and each wait starts its own schedule.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::context::{Interruption, RequestContext};
use crate::resources::{Backup, Snapshot, Status, Volume};

/// Poll schedule for a wait.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Backoff {
    /// Up to `steps` fetches, the first immediately, then sleeping `initial`
    /// and multiplying the delay by `factor` after each attempt.
    Exponential {
        /// Delay before the second fetch.
        initial: Duration,
        /// Growth applied to the delay after every attempt.
        factor: f64,
        /// Maximum number of fetches.
        steps: u32,
    },
    /// Fetch every `interval` until `timeout` has elapsed.
    Fixed {
        /// Delay between fetches.
        interval: Duration,
        /// Total budget for the wait.
        timeout: Duration,
    },
}

impl Backoff {
    /// Builds an exponential schedule.
    #[must_use]
    pub const fn exponential(initial: Duration, factor: f64, steps: u32) -> Self {
        Self::Exponential {
            initial,
            factor,
            steps,
        }
    }

    /// Builds a fixed-interval schedule bounded by `timeout`.
    #[must_use]
    pub const fn fixed(interval: Duration, timeout: Duration) -> Self {
        Self::Fixed { interval, timeout }
    }

    fn schedule(&self) -> Schedule {
        match *self {
            Self::Exponential {
                initial,
                factor,
                steps,
            } => Schedule::Exponential {
                delay: initial,
                factor,
                remaining: steps.max(1),
            },
            Self::Fixed { interval, timeout } => Schedule::Fixed {
                interval,
                deadline: Instant::now() + timeout,
            },
        }
    }
}

enum Schedule {
    Exponential {
        delay: Duration,
        factor: f64,
        remaining: u32,
    },
    Fixed {
        interval: Duration,
        deadline: Instant,
    },
}

impl Schedule {
    /// Returns the delay before the next fetch, or `None` once the budget is
    /// spent.
    fn next_delay(&mut self) -> Option<Duration> {
        match self {
            Self::Exponential {
                delay,
                factor,
                remaining,
            } => {
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 {
                    return None;
                }
                let current = *delay;
                *delay = current.mul_f64(*factor);
                Some(current)
            }
            Self::Fixed { interval, deadline } => {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    return None;
                }
                Some((*interval).min(left))
            }
        }
    }
}

/// Classification of one fetched resource state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Verdict {
    /// The resource reached an acceptable terminal state.
    Ready,
    /// The operation is still in progress.
    Pending,
    /// The resource reached a fatal error state.
    Fatal,
}

/// Acceptable and fatal status sets for status-driven waits.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StatusTarget<'a> {
    /// Statuses that end the wait successfully.
    pub accept: &'a [&'a str],
    /// Statuses that end the wait with an error.
    pub fatal: &'a [&'a str],
}

impl<'a> StatusTarget<'a> {
    /// Builds a status target.
    #[must_use]
    pub const fn new(accept: &'a [&'a str], fatal: &'a [&'a str]) -> Self {
        Self { accept, fatal }
    }

    /// Classifies `status`, checking fatal states first.
    #[must_use]
    pub fn judge(&self, status: &Status) -> Verdict {
        if status.is_any(self.fatal) {
            Verdict::Fatal
        } else if status.is_any(self.accept) {
            Verdict::Ready
        } else {
            Verdict::Pending
        }
    }
}

/// Backend record with a lifecycle status.
pub trait Observed {
    /// Current lifecycle status.
    fn status(&self) -> &Status;

    /// Short human-readable description of the current state.
    fn observed_state(&self) -> String {
        self.status().to_string()
    }
}

impl Observed for Volume {
    fn status(&self) -> &Status {
        &self.status
    }

    fn observed_state(&self) -> String {
        match self.attached_server() {
            Some(server) => format!("{} (server {server})", self.status),
            None => self.status.to_string(),
        }
    }
}

impl Observed for Snapshot {
    fn status(&self) -> &Status {
        &self.status
    }
}

impl Observed for Backup {
    fn status(&self) -> &Status {
        &self.status
    }
}

/// Errors returned by [`wait_until`].
#[derive(Debug, Error)]
pub enum WaitError<E>
where
    E: std::error::Error + 'static,
{
    /// The resource reached a fatal status.
    #[error("{resource} reached error state {state}")]
    Fatal {
        /// Resource being waited on.
        resource: String,
        /// State that ended the wait.
        state: String,
    },
    /// The poll budget ran out before a terminal state was observed.
    #[error(
        "timed out waiting for {resource}; last observed state: {}",
        .last_state.as_deref().unwrap_or("unknown")
    )]
    Timeout {
        /// Resource being waited on.
        resource: String,
        /// Last state seen before the budget ran out.
        last_state: Option<String>,
    },
    /// Fetching the resource failed.
    #[error("status fetch failed: {0}")]
    Fetch(#[source] E),
    /// The request was cancelled or its deadline passed.
    #[error(transparent)]
    Interrupted(#[from] Interruption),
}

/// Polls `fetch` on the `backoff` schedule until `judge` reports a terminal
/// verdict.
///
/// The first fetch happens immediately. Each fetch and each sleep races
/// against `ctx`.
///
/// # Errors
///
/// Returns [`WaitError::Fatal`] on a fatal verdict, [`WaitError::Fetch`] when
/// a fetch fails, [`WaitError::Timeout`] when the schedule is exhausted and
/// [`WaitError::Interrupted`] when the request ends.
pub async fn wait_until<R, E, Fetch, Fut, Judge>(
    ctx: &RequestContext,
    backoff: &Backoff,
    resource: &str,
    mut fetch: Fetch,
    judge: Judge,
) -> Result<R, WaitError<E>>
where
    R: Observed,
    E: std::error::Error + 'static,
    Fetch: FnMut() -> Fut,
    Fut: Future<Output = Result<R, E>>,
    Judge: Fn(&R) -> Verdict,
{
    let mut schedule = backoff.schedule();
    let mut last_state = None;
    loop {
        let record = ctx.run(fetch()).await?.map_err(WaitError::Fetch)?;
        match judge(&record) {
            Verdict::Ready => return Ok(record),
            Verdict::Fatal => {
                return Err(WaitError::Fatal {
                    resource: resource.to_owned(),
                    state: record.observed_state(),
                });
            }
            Verdict::Pending => last_state = Some(record.observed_state()),
        }

        let Some(delay) = schedule.next_delay() else {
            return Err(WaitError::Timeout {
                resource: resource.to_owned(),
                last_state,
            });
        };
        ctx.sleep(delay).await?;
    }
}

/// Convenience wrapper around [`wait_until`] for status-driven waits.
///
/// # Errors
///
/// See [`wait_until`].
pub async fn wait_for_status<R, E, Fetch, Fut>(
    ctx: &RequestContext,
    backoff: &Backoff,
    resource: &str,
    target: StatusTarget<'_>,
    fetch: Fetch,
) -> Result<R, WaitError<E>>
where
    R: Observed,
    E: std::error::Error + 'static,
    Fetch: FnMut() -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    wait_until(ctx, backoff, resource, fetch, |record: &R| {
        target.judge(record.status())
    })
    .await
}
