//! The uniform instance handle every backend mints.
//!
//! Backends implement the raw [`InstanceDriver`] operations; [`Instance`]
//! layers the canonical state machine on top: idempotent no-op
//! short-circuits, blocking and non-blocking variants of every transition,
//! wait-engine integration, and graceful degradation when introspection
//! fails. State-changing methods take `&mut self`: a handle is driven by one
//! logical flow at a time and the crate makes no cross-task guarantee for a
//! single handle.

use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

use tracing::debug;

use crate::backend::ImageRef;
use crate::command::CommandOutput;
use crate::errors::LifecycleError;
use crate::key::KeyPair;
use crate::state::InstanceState;
use crate::wait::{WaitPolicy, wait_or_timeout};

#[cfg(test)]
mod tests;

/// Future returned by driver operations.
pub type DriverFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, LifecycleError>> + Send + 'a>>;

/// Optional capabilities a backend may declare.
///
/// Callers query these instead of calling and catching; the corresponding
/// handle operations still return [`LifecycleError::Unsupported`] as a
/// checked outcome when the capability is absent.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Capabilities {
    /// The backend can retrieve an instance's console log.
    pub console_log: bool,
    /// The backend can capture an instance into a launchable image.
    pub image_capture: bool,
}

impl Capabilities {
    /// No optional capabilities.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            console_log: false,
            image_capture: false,
        }
    }

    /// All optional capabilities.
    #[must_use]
    pub const fn full() -> Self {
        Self {
            console_log: true,
            image_capture: true,
        }
    }
}

/// Raw per-backend operations behind an [`Instance`] handle.
///
/// Observation methods (`fetch_state`, `is_ready`, `is_gone`, `image_ready`)
/// must be side-effect free or idempotent; the wait engine re-invokes them.
/// `console_log` and `capture_image` default to
/// [`LifecycleError::Unsupported`] so capability-gapped backends implement
/// only what they have.
pub trait InstanceDriver: Send + Sync {
    /// Backend-assigned identifier, assigned at creation and never changed.
    fn id(&self) -> &str;

    /// Human-readable name or tag of the instance.
    fn name(&self) -> &str;

    /// Short backend name used in logs and error messages.
    fn backend_name(&self) -> &'static str;

    /// Declares which optional operations this backend supports.
    fn capabilities(&self) -> Capabilities {
        Capabilities::none()
    }

    /// Observes the current lifecycle state.
    fn fetch_state(&self) -> DriverFuture<'_, InstanceState>;

    /// Observes the instance's address, when one is assigned.
    fn fetch_ip(&self) -> DriverFuture<'_, Option<IpAddr>>;

    /// Returns `true` once the instance is fully reachable, including guest
    /// init-system readiness, not merely power state.
    fn is_ready(&self) -> DriverFuture<'_, bool>;

    /// Returns `true` once the backend no longer knows the instance.
    fn is_gone(&self) -> DriverFuture<'_, bool>;

    /// Returns `true` once a captured image is usable for launch. Backends
    /// whose capture primitive is synchronous keep the default.
    fn image_ready<'a>(&'a self, image_id: &'a str) -> DriverFuture<'a, bool> {
        let _ = image_id;
        Box::pin(std::future::ready(Ok(true)))
    }

    /// Asks the backend to power the instance on.
    fn request_start(&self) -> DriverFuture<'_, ()>;

    /// Asks the backend to power the instance off.
    fn request_stop(&self) -> DriverFuture<'_, ()>;

    /// Asks the backend to destroy the instance. Must succeed when the
    /// instance is already gone.
    fn request_delete(&self) -> DriverFuture<'_, ()>;

    /// Runs a command inside the instance. A non-zero exit is data in the
    /// returned output, not an error.
    fn execute<'a>(&'a self, command: &'a [String]) -> DriverFuture<'a, CommandOutput>;

    /// Retrieves the console log.
    fn console_log(&self) -> DriverFuture<'_, String> {
        let unsupported = LifecycleError::unsupported("console_log", self.backend_name());
        Box::pin(std::future::ready(Err(unsupported)))
    }

    /// Captures the (stopped) instance into a new launchable image.
    fn capture_image<'a>(&'a self, name: &'a str) -> DriverFuture<'a, ImageRef> {
        let _ = name;
        let unsupported = LifecycleError::unsupported("capture_image", self.backend_name());
        Box::pin(std::future::ready(Err(unsupported)))
    }
}

/// Handle to one remote compute resource.
///
/// Created by [`crate::backend::CloudBackend::launch`] or
/// [`crate::backend::CloudBackend::get_instance`]; the identifier is
/// assigned at construction and never changes. The cached lifecycle state is
/// advisory and may be stale; refresh it with [`Instance::state`].
#[derive(Debug)]
pub struct Instance<D: InstanceDriver> {
    driver: D,
    state: InstanceState,
    key_pair: Option<KeyPair>,
    wait_policy: WaitPolicy,
}

impl<D: InstanceDriver> Instance<D> {
    /// Wraps a driver into a handle with an undetermined cached state.
    #[must_use]
    pub const fn new(driver: D, wait_policy: WaitPolicy) -> Self {
        Self {
            driver,
            state: InstanceState::Unknown,
            key_pair: None,
            wait_policy,
        }
    }

    /// Sets the initial cached state (used by `launch`).
    #[must_use]
    pub const fn with_state(mut self, state: InstanceState) -> Self {
        self.state = state;
        self
    }

    /// Associates the key pair injected at launch.
    #[must_use]
    pub fn with_key_pair(mut self, key_pair: KeyPair) -> Self {
        self.key_pair = Some(key_pair);
        self
    }

    /// Backend-assigned identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        self.driver.id()
    }

    /// Human-readable name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.driver.name()
    }

    /// Key pair associated at launch, if any.
    #[must_use]
    pub const fn key_pair(&self) -> Option<&KeyPair> {
        self.key_pair.as_ref()
    }

    /// Capabilities declared by the backing driver.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.driver.capabilities()
    }

    /// Wait tuning applied to this handle's blocking operations.
    #[must_use]
    pub const fn wait_policy(&self) -> &WaitPolicy {
        &self.wait_policy
    }

    /// Backend-specific driver, for operations outside the uniform contract.
    #[must_use]
    pub const fn driver(&self) -> &D {
        &self.driver
    }

    /// Last observed lifecycle state, without backend contact.
    #[must_use]
    pub const fn last_known_state(&self) -> InstanceState {
        self.state
    }

    /// Refreshes and returns the lifecycle state.
    ///
    /// Falls back to [`InstanceState::Unknown`] instead of raising when the
    /// backend's status cannot be determined, so the handle stays usable for
    /// cleanup even when introspection is broken.
    pub async fn state(&mut self) -> InstanceState {
        match self.driver.fetch_state().await {
            Ok(state) => {
                self.state = state;
                state
            }
            Err(err) => {
                debug!(instance = self.driver.id(), error = %err, "state probe failed");
                self.state = InstanceState::Unknown;
                InstanceState::Unknown
            }
        }
    }

    /// Observes the instance's address, when one is assigned.
    ///
    /// # Errors
    ///
    /// Propagates driver failures.
    pub async fn ip(&self) -> Result<Option<IpAddr>, LifecycleError> {
        self.driver.fetch_ip().await
    }

    /// Powers the instance on.
    ///
    /// A handle whose cached state is already `Running` returns success
    /// immediately without contacting the backend. With `wait` unset the
    /// method returns once the request is acknowledged and the cached state
    /// becomes `Unknown` until a later explicit [`Instance::wait`].
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InstanceGone`] on a deleted or deleting
    /// handle, a [`LifecycleError::Timeout`] when readiness is not reached
    /// in time, or any driver failure.
    pub async fn start(&mut self, wait: bool) -> Result<(), LifecycleError> {
        self.ensure_not_deleted()?;
        if self.state == InstanceState::Running {
            return Ok(());
        }

        debug!(instance = self.driver.id(), "starting");
        self.driver.request_start().await?;
        self.state = InstanceState::Unknown;

        if wait {
            self.wait().await?;
        }
        Ok(())
    }

    /// Powers the instance off.
    ///
    /// A handle whose cached state is already `Stopped` returns success
    /// immediately without contacting the backend.
    ///
    /// # Errors
    ///
    /// Same shapes as [`Instance::start`].
    pub async fn shutdown(&mut self, wait: bool) -> Result<(), LifecycleError> {
        self.ensure_not_deleted()?;
        if self.state == InstanceState::Stopped {
            return Ok(());
        }

        debug!(instance = self.driver.id(), "shutting down");
        self.driver.request_stop().await?;
        self.state = InstanceState::Unknown;

        if wait {
            self.wait_for_stop().await?;
        }
        Ok(())
    }

    /// Restarts the instance: a full shutdown to the quiescent stopped
    /// state, then a start. Observably equivalent to calling both.
    ///
    /// # Errors
    ///
    /// Same shapes as [`Instance::start`].
    pub async fn restart(&mut self, wait: bool) -> Result<(), LifecycleError> {
        self.shutdown(true).await?;
        self.start(wait).await
    }

    /// Requests destruction of the instance.
    ///
    /// Deleting an already-deleted handle succeeds without backend contact.
    /// With `wait` set, blocks until the backend confirms absence. Once a
    /// deletion has been requested, every operation other than a repeat
    /// `delete` or [`Instance::wait_for_delete`] fails with
    /// [`LifecycleError::InstanceGone`].
    ///
    /// # Errors
    ///
    /// Returns a [`LifecycleError::Timeout`] when absence is not confirmed
    /// in time, or any driver failure.
    pub async fn delete(&mut self, wait: bool) -> Result<(), LifecycleError> {
        if self.state == InstanceState::Deleted {
            return Ok(());
        }

        debug!(instance = self.driver.id(), "deleting");
        self.driver.request_delete().await?;
        self.state = InstanceState::Deleting;

        if wait {
            self.wait_for_delete().await?;
        }
        Ok(())
    }

    /// Blocks until the instance is fully reachable (guest readiness, not
    /// merely power state) and records the `Running` state.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Timeout`] when the deadline elapses; the
    /// handle remains valid afterwards.
    pub async fn wait(&mut self) -> Result<(), LifecycleError> {
        self.ensure_not_deleted()?;
        let driver = &self.driver;
        let policy = self.wait_policy;
        wait_or_timeout(&policy, "wait_for_ready", driver.id(), move || {
            let probe = driver;
            async move { Ok(probe.is_ready().await?.then_some(())) }
        })
        .await?;
        self.state = InstanceState::Running;
        Ok(())
    }

    /// Blocks until the backend reports the stopped state.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Timeout`] when the deadline elapses.
    pub async fn wait_for_stop(&mut self) -> Result<(), LifecycleError> {
        self.ensure_not_deleted()?;
        let driver = &self.driver;
        let policy = self.wait_policy;
        wait_or_timeout(&policy, "wait_for_stop", driver.id(), move || {
            let probe = driver;
            async move {
                let observed = probe.fetch_state().await?;
                Ok((observed == InstanceState::Stopped).then_some(()))
            }
        })
        .await?;
        self.state = InstanceState::Stopped;
        Ok(())
    }

    /// Blocks until the backend confirms the instance is gone. This is the
    /// observe-for-absence wait: the condition is "resource not found", and
    /// it is the only operation permitted on a deleted handle.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Timeout`] when absence is not confirmed in
    /// time.
    pub async fn wait_for_delete(&mut self) -> Result<(), LifecycleError> {
        if self.state == InstanceState::Deleted {
            return Ok(());
        }
        let driver = &self.driver;
        let policy = self.wait_policy;
        wait_or_timeout(&policy, "wait_for_delete", driver.id(), move || {
            let probe = driver;
            async move { Ok(probe.is_gone().await?.then_some(())) }
        })
        .await?;
        self.state = InstanceState::Deleted;
        Ok(())
    }

    /// Runs a command inside the instance.
    ///
    /// A command that runs but exits non-zero is reported in the returned
    /// output (`is_success`/`failed`), not as an error.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Spawn`] when the command cannot be run at
    /// all, or [`LifecycleError::InstanceGone`] on a deleted or deleting
    /// handle.
    pub async fn execute(&self, command: &[String]) -> Result<CommandOutput, LifecycleError> {
        self.ensure_not_deleted()?;
        self.driver.execute(command).await
    }

    /// Retrieves the instance's console log.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Unsupported`] when the backend lacks the
    /// capability; callers treat this as a checked outcome and route around
    /// it.
    pub async fn console_log(&self) -> Result<String, LifecycleError> {
        self.ensure_not_deleted()?;
        if !self.driver.capabilities().console_log {
            return Err(LifecycleError::unsupported(
                "console_log",
                self.driver.backend_name(),
            ));
        }
        self.driver.console_log().await
    }

    /// Captures the instance into a new launchable image. The instance must
    /// already be stopped; [`crate::snapshot::SnapshotCoordinator`] drives
    /// the full clean→stop→capture→restart protocol.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Unsupported`] when the backend lacks the
    /// capability.
    pub async fn capture_image(&self, name: &str) -> Result<ImageRef, LifecycleError> {
        self.ensure_not_deleted()?;
        if !self.driver.capabilities().image_capture {
            return Err(LifecycleError::unsupported(
                "capture_image",
                self.driver.backend_name(),
            ));
        }
        self.driver.capture_image(name).await
    }

    fn ensure_not_deleted(&self) -> Result<(), LifecycleError> {
        if matches!(self.state, InstanceState::Deleted | InstanceState::Deleting) {
            return Err(LifecycleError::InstanceGone {
                instance_id: self.driver.id().to_owned(),
            });
        }
        Ok(())
    }
}
