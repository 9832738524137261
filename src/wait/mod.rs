//! Generic bounded polling: observe a condition until ready or deadline.
//!
//! Every backend wait (readiness, stop, deletion, artifact availability)
//! funnels through [`wait_until`]. The engine is agnostic to how the probe
//! is implemented: delegation to a provider's own waiter, polling a
//! long-running operation, or parsing a local process's status output all
//! reduce to the same observe shape (see [`observe`]).

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep};

use crate::errors::LifecycleError;

mod backoff;
pub mod observe;
#[cfg(test)]
mod tests;

pub use backoff::BackoffPolicy;

const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Deadline and pacing for a bounded wait. Both values are injected
/// configuration, never hardcoded at call sites, so tests can use near-zero
/// intervals under a paused clock.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WaitPolicy {
    /// Total time budget before the wait reports [`WaitResult::TimedOut`].
    pub timeout: Duration,
    /// Delay schedule between probes.
    pub backoff: BackoffPolicy,
}

impl WaitPolicy {
    /// Creates a policy from a timeout and a backoff schedule.
    #[must_use]
    pub const fn new(timeout: Duration, backoff: BackoffPolicy) -> Self {
        Self { timeout, backoff }
    }

    /// Creates a fixed-interval policy.
    #[must_use]
    pub const fn fixed(timeout: Duration, interval: Duration) -> Self {
        Self::new(timeout, BackoffPolicy::fixed(interval))
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_WAIT_TIMEOUT, DEFAULT_POLL_INTERVAL)
    }
}

/// Outcome of a bounded wait, distinguishing readiness from deadline expiry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[must_use]
pub enum WaitResult<T> {
    /// The observed condition was met; carries the probe's value.
    Ready(T),
    /// The deadline elapsed before the condition was met. The resource may
    /// still be in flight backend-side; no further contact is made.
    TimedOut,
}

impl<T> WaitResult<T> {
    /// Returns `true` for [`WaitResult::Ready`].
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

/// Probes `observe` until it yields a value or the deadline elapses.
///
/// The engine sleeps the backoff delay (clamped to the remaining budget)
/// before each probe, so a probe always lands at or before the deadline and
/// a never-ready condition reports [`WaitResult::TimedOut`] at or after the
/// deadline, never before. `observe` must be side-effect free or idempotent;
/// it returns `Ok(Some(value))` once the condition is met and `Ok(None)`
/// while it is not.
///
/// # Errors
///
/// Propagates the first error returned by `observe` unmodified.
pub async fn wait_until<T, E, F, Fut>(policy: &WaitPolicy, mut observe: F) -> Result<WaitResult<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let deadline = Instant::now() + policy.timeout;
    let mut attempt: u32 = 0;

    loop {
        let now = Instant::now();
        if now >= deadline {
            return Ok(WaitResult::TimedOut);
        }

        let delay = policy.backoff.delay(attempt).min(deadline - now);
        attempt = attempt.saturating_add(1);
        sleep(delay).await;

        if let Some(value) = observe().await? {
            return Ok(WaitResult::Ready(value));
        }
    }
}

/// Like [`wait_until`], but converts deadline expiry into
/// [`LifecycleError::Timeout`] carrying the action name and resource id.
///
/// # Errors
///
/// Returns [`LifecycleError::Timeout`] when the deadline elapses, or any
/// error surfaced by `observe`.
pub async fn wait_or_timeout<T, F, Fut>(
    policy: &WaitPolicy,
    action: &str,
    resource_id: &str,
    observe: F,
) -> Result<T, LifecycleError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, LifecycleError>>,
{
    match wait_until(policy, observe).await? {
        WaitResult::Ready(value) => Ok(value),
        WaitResult::TimedOut => Err(LifecycleError::timeout(action, resource_id)),
    }
}
