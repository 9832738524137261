//! Canonical instance lifecycle states and legal transitions.
//!
//! Every backend maps its native status vocabulary onto [`InstanceState`].
//! Parsing is deliberately lenient: a status string the backend has never
//! shown before degrades to [`InstanceState::Unknown`] instead of raising,
//! so cleanup paths stay reachable even when introspection is broken.

use std::fmt;

/// Lifecycle state of an instance as observed through its backend.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum InstanceState {
    /// Launch has been issued but the instance is not yet reachable.
    Provisioning,
    /// The instance is powered on and reachable.
    Running,
    /// The instance is powered off but still exists.
    Stopped,
    /// Destruction has been requested but not yet confirmed.
    Deleting,
    /// The backend has confirmed the instance no longer exists. Terminal.
    Deleted,
    /// The state could not be determined.
    #[default]
    Unknown,
}

impl InstanceState {
    /// Maps backend status text onto a canonical state.
    ///
    /// Matching is case-insensitive and covers the synonyms the supported
    /// backends emit (`running`, `stopped`/`stopped in place`, `starting`,
    /// `pending`). Anything else yields [`InstanceState::Unknown`].
    #[must_use]
    pub fn parse(text: &str) -> Self {
        match text.trim().to_ascii_lowercase().as_str() {
            "running" => Self::Running,
            "stopped" | "stopping" | "stopped in place" => Self::Stopped,
            "provisioning" | "pending" | "starting" => Self::Provisioning,
            "deleting" | "terminating" => Self::Deleting,
            "deleted" | "terminated" => Self::Deleted,
            _ => Self::Unknown,
        }
    }

    /// Returns `true` when no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Deleted)
    }

    /// Returns `true` when a transition from `self` to `next` is legal.
    ///
    /// `Unknown` acts as a wildcard in both directions: an undetermined
    /// state may resolve to anything, and any observation may degrade to
    /// `Unknown`. `Deleted` admits nothing.
    #[must_use]
    pub const fn can_become(self, next: Self) -> bool {
        match (self, next) {
            (Self::Deleted, _) => false,
            (Self::Unknown, _) | (_, Self::Unknown) => true,
            (Self::Provisioning, Self::Running)
            | (Self::Running, Self::Stopped)
            | (Self::Stopped, Self::Running)
            | (Self::Running | Self::Stopped | Self::Provisioning, Self::Deleting)
            | (Self::Deleting, Self::Deleted) => true,
            _ => false,
        }
    }

    /// Canonical lower-case name of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Provisioning => "provisioning",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
