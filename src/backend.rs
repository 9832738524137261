//! Backend abstraction for provisioning and reclaiming instances.
//!
//! A [`CloudBackend`] identifies one provider session and mints
//! [`Instance`] handles. The contract is the same whether the provider is a
//! remote cloud API or a local container runtime; only the driver behind
//! each handle differs.

use std::future::Future;
use std::pin::Pin;

use serde_json::{Map, Value};

use crate::config::SessionConfig;
use crate::errors::LifecycleError;
use crate::instance::{Instance, InstanceDriver};
use crate::key::read_to_string_ambient;
use crate::snapshot::SnapshotCoordinator;

/// Future returned by backend operations.
pub type BackendFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, LifecycleError>> + Send + 'a>>;

/// Reference to a launchable image or captured artifact.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageRef {
    /// Backend-assigned identifier of the artifact.
    pub id: String,
    /// Serial or version of the artifact, when the backend exposes one.
    pub serial: Option<String>,
}

impl ImageRef {
    /// Creates a reference with no serial.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            serial: None,
        }
    }

    /// Attaches a serial/version to the reference.
    #[must_use]
    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }
}

/// Network context (VPC/subnet/bridge) an instance launches into.
///
/// Created or looked up via [`CloudBackend::get_or_create_network`];
/// referenced by id at launch. Deleting one cascades to dependent instances
/// backend-side and is not re-specified here.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NetworkContext {
    /// Backend-assigned identifier.
    pub id: String,
    /// Name the context was created or looked up under.
    pub name: String,
}

/// Launch-time options recognised across backends.
///
/// Keys a backend does not recognise are carried in `extra` and passed
/// through verbatim rather than rejected, preserving extensibility.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LaunchOptions {
    /// Instance size/class to request (for example `t2.micro`).
    pub instance_type: Option<String>,
    /// Cloud-init user-data payload injected at first boot.
    pub user_data: Option<String>,
    /// Additional tags applied to the instance.
    pub tags: Vec<String>,
    /// Network context to launch into.
    pub network: Option<NetworkContext>,
    /// Destroy the instance automatically when it stops.
    pub ephemeral: bool,
    /// Unrecognised keys forwarded verbatim to the backend.
    pub extra: Map<String, Value>,
}

impl LaunchOptions {
    /// Starts a builder for [`LaunchOptions`].
    #[must_use]
    pub fn builder() -> LaunchOptionsBuilder {
        LaunchOptionsBuilder::default()
    }
}

/// Builder for [`LaunchOptions`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LaunchOptionsBuilder {
    options: LaunchOptions,
}

impl LaunchOptionsBuilder {
    /// Sets the instance size/class.
    #[must_use]
    pub fn instance_type(mut self, value: impl Into<String>) -> Self {
        self.options.instance_type = Some(value.into());
        self
    }

    /// Sets an inline user-data payload.
    #[must_use]
    pub fn user_data(mut self, value: impl Into<String>) -> Self {
        self.options.user_data = Some(value.into());
        self
    }

    /// Loads the user-data payload from a file.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Config`] when the file cannot be read or is
    /// empty.
    pub fn user_data_file(mut self, path: &camino::Utf8Path) -> Result<Self, LifecycleError> {
        let content = read_to_string_ambient(path)
            .map_err(|message| {
                LifecycleError::Config(format!("failed to read user-data `{path}`: {message}"))
            })?;
        if content.trim().is_empty() {
            return Err(LifecycleError::Config(format!(
                "user-data file `{path}` is empty"
            )));
        }
        self.options.user_data = Some(content);
        Ok(self)
    }

    /// Adds a tag.
    #[must_use]
    pub fn tag(mut self, value: impl Into<String>) -> Self {
        self.options.tags.push(value.into());
        self
    }

    /// Sets the network context to launch into.
    #[must_use]
    pub fn network(mut self, value: NetworkContext) -> Self {
        self.options.network = Some(value);
        self
    }

    /// Marks the instance for automatic destruction on stop.
    #[must_use]
    pub const fn ephemeral(mut self, value: bool) -> Self {
        self.options.ephemeral = value;
        self
    }

    /// Forwards an unrecognised key/value pair verbatim to the backend.
    #[must_use]
    pub fn extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.extra.insert(key.into(), value);
        self
    }

    /// Finishes the builder.
    #[must_use]
    pub fn build(self) -> LaunchOptions {
        self.options
    }
}

/// Operations a provider adapter implements.
///
/// A backend instance is immutable after construction and may mint many
/// handles. Blocking behaviour is always explicit through the `wait`
/// parameter; a non-blocking launch still returns a valid handle.
pub trait CloudBackend {
    /// Driver type behind handles minted by this backend.
    type Driver: InstanceDriver;

    /// Session settings (tag, location, credential reference) this backend
    /// was constructed with.
    fn session(&self) -> &SessionConfig;

    /// Launches a new instance from `image_id`.
    ///
    /// Always returns a valid handle; with `wait` set, blocks until the
    /// provider-defined readiness condition (including guest-agent or
    /// init-system readiness, not merely power state) is met.
    fn launch<'a>(
        &'a self,
        image_id: &'a str,
        options: &'a LaunchOptions,
        wait: bool,
    ) -> BackendFuture<'a, Instance<Self::Driver>>;

    /// Re-attaches to an existing instance by id. The result is
    /// representationally equal to the handle `launch` originally returned
    /// for the same id.
    fn get_instance<'a>(&'a self, instance_id: &'a str)
    -> BackendFuture<'a, Instance<Self::Driver>>;

    /// Deletes a launchable image or captured artifact.
    fn delete_image<'a>(&'a self, image_id: &'a str) -> BackendFuture<'a, ()>;

    /// Returns the network context named `name`, creating it when absent.
    /// Idempotent by name: repeated calls return the same underlying
    /// resource and never create a duplicate.
    fn get_or_create_network<'a>(&'a self, name: &'a str)
    -> BackendFuture<'a, NetworkContext>;

    /// Captures `instance` into a new launchable image via the default
    /// [`SnapshotCoordinator`] protocol: optional clean, stop, capture,
    /// wait-available, restart.
    fn snapshot<'a>(
        &'a self,
        instance: &'a mut Instance<Self::Driver>,
        name: &'a str,
        clean: bool,
    ) -> BackendFuture<'a, ImageRef> {
        Box::pin(async move {
            SnapshotCoordinator::new()
                .capture(instance, name, clean)
                .await
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::LaunchOptions;

    #[test]
    fn builder_collects_recognised_and_extra_keys() {
        let options = LaunchOptions::builder()
            .instance_type("t2.micro")
            .user_data("#cloud-config\n")
            .tag("ci")
            .ephemeral(true)
            .extra("SecurityGroupIds", json!(["sg-1"]))
            .build();

        assert_eq!(options.instance_type.as_deref(), Some("t2.micro"));
        assert!(options.ephemeral);
        assert_eq!(options.tags, vec![String::from("ci")]);
        assert_eq!(
            options.extra.get("SecurityGroupIds"),
            Some(&Value::from(vec!["sg-1"]))
        );
    }

    #[test]
    fn default_options_carry_nothing() {
        let options = LaunchOptions::default();
        assert!(options.instance_type.is_none());
        assert!(options.user_data.is_none());
        assert!(options.tags.is_empty());
        assert!(options.extra.is_empty());
        assert!(!options.ephemeral);
    }
}
