//! Session configuration loaded via `ortho-config`.
//!
//! A [`SessionConfig`] identifies one backend session: the tag used to name
//! and group resources, the provider location (region/project/zone), and a
//! credential reference. It is immutable after construction and passed
//! explicitly to every backend constructor; there is no ambient global
//! session state.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::LifecycleError;
use crate::wait::WaitPolicy;

/// Backend session settings merged from defaults, configuration files, and
/// environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "CLOUDLAB")]
pub struct SessionConfig {
    /// Name prefix used to label and group every resource this session
    /// creates. Required.
    pub tag: String,
    /// Provider region, when the backend needs one.
    pub region: Option<String>,
    /// Project identifier used for billing and resource scoping.
    pub project_id: Option<String>,
    /// Availability zone within the region.
    pub zone: Option<String>,
    /// Credential reference (profile name or secret path) resolved by the
    /// backend. Credential acquisition itself happens outside this crate.
    pub credentials: Option<String>,
    /// Wait deadline in seconds for blocking operations.
    #[ortho_config(default = 300)]
    pub wait_timeout_secs: u64,
    /// Delay in seconds between wait-engine probes.
    #[ortho_config(default = 5)]
    pub poll_interval_secs: u64,
}

impl SessionConfig {
    /// Creates a session with the given tag and default wait tuning.
    #[must_use]
    pub fn with_tag(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            region: None,
            project_id: None,
            zone: None,
            credentials: None,
            wait_timeout_secs: 300,
            poll_interval_secs: 5,
        }
    }

    /// Loads configuration by merging defaults, configuration files, and
    /// environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Config`] when the loader fails to merge
    /// sources or the result fails validation.
    pub fn load_from_sources() -> Result<Self, LifecycleError> {
        let config = Self::load_from_iter([std::ffi::OsString::from("cloudlab")])
            .map_err(|err| LifecycleError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that required fields are present.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Config`] when the tag is blank.
    pub fn validate(&self) -> Result<(), LifecycleError> {
        if self.tag.trim().is_empty() {
            return Err(LifecycleError::Config(String::from(
                "missing session tag: set CLOUDLAB_TAG or add tag to cloudlab.toml",
            )));
        }
        Ok(())
    }

    /// Mints a unique instance name under the session tag.
    #[must_use]
    pub fn instance_name(&self) -> String {
        format!("{}-{}", self.tag, Uuid::new_v4().simple())
    }

    /// Builds the wait policy derived from this session's tuning.
    #[must_use]
    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy::fixed(
            Duration::from_secs(self.wait_timeout_secs),
            Duration::from_secs(self.poll_interval_secs),
        )
    }
}
