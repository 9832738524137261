//! Adapters converting provider completion models into the observe shape.
//!
//! Providers expose "is it done yet" in one of three ways: a built-in
//! blocking waiter, a pollable long-running operation resource, or a local
//! process whose textual status must be parsed. The first two are adapted
//! here; the third lives with the drivers that own the parsing (for example
//! [`crate::lxd`]).

use std::future::Future;

use crate::errors::LifecycleError;
use crate::state::InstanceState;
use crate::wait::{WaitPolicy, WaitResult, wait_until};

/// One observation of a long-running backend operation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct OperationStatus {
    /// Status field reported by the provider (for example `PENDING`, `DONE`).
    pub status: String,
    /// Error detail attached to the operation, if any.
    pub error: Option<String>,
}

impl OperationStatus {
    /// Builds a status with no error attached.
    #[must_use]
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            error: None,
        }
    }

    /// Returns `true` when the status matches `terminal`, ignoring case.
    #[must_use]
    pub fn reached(&self, terminal: &str) -> bool {
        self.status.eq_ignore_ascii_case(terminal)
    }
}

/// Polls a long-running operation until its status reaches `terminal_status`.
///
/// A non-empty error field on the terminal result is surfaced as
/// [`LifecycleError::Operation`], never swallowed.
///
/// # Errors
///
/// Returns [`LifecycleError::Timeout`] when the deadline elapses,
/// [`LifecycleError::Operation`] when the terminal result carries an error,
/// or any error raised by `fetch` itself.
pub async fn await_operation<F, Fut>(
    policy: &WaitPolicy,
    resource_id: &str,
    terminal_status: &str,
    mut fetch: F,
) -> Result<OperationStatus, LifecycleError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<OperationStatus, LifecycleError>>,
{
    let outcome = wait_until(policy, || {
        let pending = fetch();
        async move {
            let status = pending.await?;
            if status.reached(terminal_status) {
                Ok(Some(status))
            } else {
                Ok(None)
            }
        }
    })
    .await?;

    match outcome {
        WaitResult::Ready(status) => {
            if let Some(message) = status
                .error
                .as_ref()
                .filter(|message| !message.trim().is_empty())
            {
                return Err(LifecycleError::Operation {
                    resource_id: resource_id.to_owned(),
                    state: InstanceState::Unknown,
                    message: message.clone(),
                });
            }
            Ok(status)
        }
        WaitResult::TimedOut => Err(LifecycleError::timeout("operation", resource_id)),
    }
}

/// Hands a wait off to a provider's own blocking waiter, keeping our
/// deadline as the outer bound.
///
/// The provider manages its own polling; the core only needs success,
/// timeout, or error back. Deadline expiry does not cancel work the
/// provider has already started remotely.
///
/// # Errors
///
/// Returns [`LifecycleError::Timeout`] when `waiter` does not resolve within
/// the policy's timeout, or the waiter's own error.
pub async fn delegate<T, F>(
    policy: &WaitPolicy,
    action: &str,
    resource_id: &str,
    waiter: F,
) -> Result<T, LifecycleError>
where
    F: Future<Output = Result<T, LifecycleError>>,
{
    match tokio::time::timeout(policy.timeout, waiter).await {
        Ok(result) => result,
        Err(_elapsed) => Err(LifecycleError::timeout(action, resource_id)),
    }
}
