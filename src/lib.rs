//! Backend-agnostic provisioning and lifecycle management for ephemeral
//! compute instances.
//!
//! The crate exposes one instance-handle contract ([`Instance`]) and one
//! backend contract ([`CloudBackend`]); a generic wait engine turns every
//! flavour of asynchronous completion (delegated waiters, long-running
//! operations, CLI polling) into the same blocking-with-deadline surface.
//! The [`lxd`] module ships a local-process backend; the snapshot
//! coordinator and batch helpers compose the contracts without knowing
//! which backend sits underneath.

pub mod backend;
pub mod batch;
pub mod command;
pub mod config;
pub mod errors;
pub mod instance;
pub mod key;
pub mod lxd;
pub mod snapshot;
pub mod state;
pub mod test_support;
pub mod wait;

pub use backend::{CloudBackend, ImageRef, LaunchOptions, LaunchOptionsBuilder, NetworkContext};
pub use batch::{delete_many, launch_many};
pub use command::{CommandOutput, CommandRunner, ProcessCommandRunner};
pub use config::SessionConfig;
pub use errors::LifecycleError;
pub use instance::{Capabilities, Instance, InstanceDriver};
pub use key::KeyPair;
pub use lxd::{LxdBackend, LxdDriver};
pub use snapshot::SnapshotCoordinator;
pub use state::InstanceState;
pub use wait::{BackoffPolicy, WaitPolicy, WaitResult, wait_or_timeout, wait_until};
