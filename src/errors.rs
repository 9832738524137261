//! Crate-wide error taxonomy shared by every backend.
//!
//! Callers branch on variants rather than on backend-specific error types:
//! timeouts are distinct from failures, unsupported capabilities are a
//! checked outcome, and a non-zero exit from a command run inside an
//! instance is data rather than an error.

use thiserror::Error;

use crate::state::InstanceState;

/// Errors raised by lifecycle operations across all backends.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LifecycleError {
    /// Raised when session or backend configuration is incomplete. Fatal and
    /// never retried.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when a request is missing a required field.
    #[error("missing or empty field: {0}")]
    Validation(String),
    /// Raised when a backend lacks a capability such as console logs or
    /// image capture. Callers are expected to catch and route around this.
    #[error("backend {backend} does not support {operation}")]
    Unsupported {
        /// Operation that was requested.
        operation: String,
        /// Name of the backend that lacks the capability.
        backend: String,
    },
    /// Raised when a condition is not reached within the wait deadline. The
    /// resource may still be in flight; the handle remains usable for
    /// inspection or deletion.
    #[error("timeout waiting for {action} on {resource_id}")]
    Timeout {
        /// Action being waited on.
        action: String,
        /// Identifier of the resource being observed.
        resource_id: String,
    },
    /// Raised when the backend reports an explicit failure for an issued
    /// operation. Carries enough identity for the caller to clean up.
    #[error("operation failed on {resource_id} (last state {state}): {message}")]
    Operation {
        /// Identifier of the affected resource.
        resource_id: String,
        /// Last lifecycle state observed before the failure.
        state: InstanceState,
        /// Failure detail reported by the backend.
        message: String,
    },
    /// Raised when an operation other than re-delete or a delete wait is
    /// attempted on a deleted instance.
    #[error("instance {instance_id} has been deleted")]
    InstanceGone {
        /// Identifier of the deleted instance.
        instance_id: String,
    },
    /// Raised when a local command cannot be started at all. A command that
    /// runs and exits non-zero is not an error.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when structured backend output cannot be parsed where a
    /// defaulted value would be unsafe (for example a launch response with
    /// no instance identifier).
    #[error("failed to parse {resource} output: {message}")]
    Parse {
        /// Resource type being parsed.
        resource: String,
        /// Parser error message.
        message: String,
    },
}

impl LifecycleError {
    /// Builds an [`LifecycleError::Unsupported`] for `operation` on `backend`.
    #[must_use]
    pub fn unsupported(operation: &str, backend: &str) -> Self {
        Self::Unsupported {
            operation: operation.to_owned(),
            backend: backend.to_owned(),
        }
    }

    /// Builds a [`LifecycleError::Timeout`] for `action` on `resource_id`.
    #[must_use]
    pub fn timeout(action: &str, resource_id: &str) -> Self {
        Self::Timeout {
            action: action.to_owned(),
            resource_id: resource_id.to_owned(),
        }
    }

    /// Returns `true` for the timeout variant, which callers must branch on
    /// separately from hard failures.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
