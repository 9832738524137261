//! The clean → stop → capture → wait-available → restart protocol.
//!
//! "Snapshot" means the same thing on every backend: capture an instance's
//! disk state into a new launchable image. Each backend translates the
//! capture step to its native primitive (create-image on a cloud API,
//! publish on a local runtime); the surrounding protocol is uniform and
//! lives here, composed entirely from handle operations.

use tracing::{debug, warn};

use crate::backend::ImageRef;
use crate::errors::LifecycleError;
use crate::instance::{Instance, InstanceDriver};
use crate::wait::wait_or_timeout;

/// Default hygiene pass run before capturing when `clean` is requested.
const DEFAULT_CLEAN_COMMAND: &[&str] = &["sudo", "cloud-init", "clean", "--logs"];

/// Drives the uniform snapshot protocol over any instance handle.
#[derive(Clone, Debug)]
pub struct SnapshotCoordinator {
    clean_commands: Vec<Vec<String>>,
    restart_after_failure: bool,
}

impl Default for SnapshotCoordinator {
    fn default() -> Self {
        Self {
            clean_commands: vec![
                DEFAULT_CLEAN_COMMAND
                    .iter()
                    .map(|part| (*part).to_owned())
                    .collect(),
            ],
            restart_after_failure: true,
        }
    }
}

impl SnapshotCoordinator {
    /// Creates a coordinator with the default clean pass and restart policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the hygiene commands run when `clean` is requested.
    #[must_use]
    pub fn with_clean_commands(mut self, commands: Vec<Vec<String>>) -> Self {
        self.clean_commands = commands;
        self
    }

    /// Controls whether a failed capture still restarts the source
    /// instance. Defaults to `true`: the instance was stopped by step 2 of
    /// the protocol, and a failed snapshot must not strand it stopped.
    #[must_use]
    pub const fn restart_after_failure(mut self, enabled: bool) -> Self {
        self.restart_after_failure = enabled;
        self
    }

    /// Captures `instance` into a new launchable image named `name`.
    ///
    /// On success the source instance is left `Running` and the returned
    /// artifact is distinct from the image the instance was launched from.
    /// On capture failure the source is restarted (unless configured
    /// otherwise) before the original error propagates.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Unsupported`] when the backend cannot
    /// capture images, a [`LifecycleError::Timeout`] when stop or artifact
    /// availability is not reached in time, or any driver failure.
    pub async fn capture<D: InstanceDriver>(
        &self,
        instance: &mut Instance<D>,
        name: &str,
        clean: bool,
    ) -> Result<ImageRef, LifecycleError> {
        if clean {
            self.clean_instance(instance).await?;
        }

        // Capturing a running filesystem is not supported on any backend.
        instance.shutdown(true).await?;

        match Self::capture_and_wait(instance, name).await {
            Ok(image) => {
                instance.start(true).await?;
                Ok(image)
            }
            Err(err) => {
                if self.restart_after_failure
                    && let Err(restart_err) = instance.start(true).await
                {
                    warn!(
                        instance = instance.id(),
                        error = %restart_err,
                        "failed to restart source instance after capture failure"
                    );
                }
                Err(err)
            }
        }
    }

    async fn clean_instance<D: InstanceDriver>(
        &self,
        instance: &mut Instance<D>,
    ) -> Result<(), LifecycleError> {
        for command in &self.clean_commands {
            let output = instance.execute(command).await?;
            if output.failed() {
                // Hygiene is best-effort; a non-zero exit is not fatal.
                warn!(
                    instance = instance.id(),
                    command = ?command,
                    code = ?output.code,
                    "clean command exited non-zero"
                );
            }
        }
        Ok(())
    }

    async fn capture_and_wait<D: InstanceDriver>(
        instance: &mut Instance<D>,
        name: &str,
    ) -> Result<ImageRef, LifecycleError> {
        debug!(instance = instance.id(), image = name, "capturing image");
        let image = instance.capture_image(name).await?;

        let driver = instance.driver();
        let policy = *instance.wait_policy();
        let image_id = image.id.as_str();
        wait_or_timeout(&policy, "image_available", image_id, move || {
            let probe = driver;
            let id = image_id;
            async move { Ok(probe.image_ready(id).await?.then_some(())) }
        })
        .await?;

        Ok(image)
    }
}
