//! Local-process backend driving instances through the `lxc` CLI.
//!
//! Every lifecycle request is one `lxc` invocation through a
//! [`CommandRunner`], and every state observation is another invocation
//! followed by a parse of the text output. Completion is never delegated:
//! the generic wait engine polls `fetch_state`/`image_ready` exactly as it
//! would poll a remote API.

use std::ffi::OsString;
use std::net::IpAddr;

use serde_json::Value;
use tracing::debug;

use crate::backend::{BackendFuture, CloudBackend, ImageRef, LaunchOptions, NetworkContext};
use crate::command::{CommandOutput, CommandRunner, ProcessCommandRunner};
use crate::config::SessionConfig;
use crate::errors::LifecycleError;
use crate::instance::{Capabilities, DriverFuture, Instance, InstanceDriver};
use crate::key::KeyPair;
use crate::state::InstanceState;
use crate::wait::WaitPolicy;

mod parse;

/// Path whose existence marks the guest's boot sequence as finished.
const BOOT_FINISHED: &str = "/var/lib/cloud/instance/boot-finished";

/// Backend managing LXD containers on the local host.
#[derive(Debug)]
pub struct LxdBackend<R: CommandRunner + Clone> {
    session: SessionConfig,
    runner: R,
    lxc_bin: String,
    wait_policy: WaitPolicy,
    key_pair: Option<KeyPair>,
}

impl LxdBackend<ProcessCommandRunner> {
    /// Creates a backend that shells out to `lxc` on the ambient `PATH`.
    #[must_use]
    pub fn new(session: SessionConfig) -> Self {
        let wait_policy = session.wait_policy();
        Self {
            session,
            runner: ProcessCommandRunner,
            lxc_bin: String::from("lxc"),
            wait_policy,
            key_pair: None,
        }
    }
}

impl<R: CommandRunner + Clone> LxdBackend<R> {
    /// Replaces the command runner, keeping session and binary settings.
    #[must_use]
    pub fn with_runner<S: CommandRunner + Clone>(self, runner: S) -> LxdBackend<S> {
        LxdBackend {
            session: self.session,
            runner,
            lxc_bin: self.lxc_bin,
            wait_policy: self.wait_policy,
            key_pair: self.key_pair,
        }
    }

    /// Registers the key pair granted access to every launched container.
    ///
    /// The public half is injected through cloud-init user data at launch
    /// time, and minted handles carry the pair for later connections.
    #[must_use]
    pub fn with_key_pair(mut self, key_pair: KeyPair) -> Self {
        self.key_pair = Some(key_pair);
        self
    }

    /// Overrides the `lxc` binary path.
    #[must_use]
    pub fn with_lxc_bin(mut self, lxc_bin: impl Into<String>) -> Self {
        self.lxc_bin = lxc_bin.into();
        self
    }

    /// Overrides the wait policy applied to launched instances.
    #[must_use]
    pub fn with_wait_policy(mut self, wait_policy: WaitPolicy) -> Self {
        self.wait_policy = wait_policy;
        self
    }

    fn driver(&self, name: &str) -> LxdDriver<R> {
        LxdDriver {
            name: name.to_owned(),
            lxc_bin: self.lxc_bin.clone(),
            runner: self.runner.clone(),
        }
    }

    fn run_lxc(&self, arguments: &[String]) -> Result<CommandOutput, LifecycleError> {
        run_cli(&self.runner, &self.lxc_bin, arguments)
    }

    /// Folds the session key pair into the caller's user data.
    ///
    /// Reading the public key fails the launch before any container exists.
    fn effective_user_data(
        &self,
        options: &LaunchOptions,
    ) -> Result<Option<String>, LifecycleError> {
        let Some(key_pair) = &self.key_pair else {
            return Ok(options.user_data.clone());
        };
        let public_key = key_pair.public_key_content()?;
        let keys_block = format!("ssh_authorized_keys:\n  - {}", public_key.trim_end());
        Ok(Some(match &options.user_data {
            Some(user_data) => format!("{}\n{keys_block}", user_data.trim_end()),
            None => format!("#cloud-config\n{keys_block}"),
        }))
    }

    fn mint(&self, name: &str, state: InstanceState) -> Instance<LxdDriver<R>> {
        let instance = Instance::new(self.driver(name), self.wait_policy).with_state(state);
        match &self.key_pair {
            Some(key_pair) => instance.with_key_pair(key_pair.clone()),
            None => instance,
        }
    }
}

impl<R: CommandRunner + Clone + 'static> CloudBackend for LxdBackend<R> {
    type Driver = LxdDriver<R>;

    fn session(&self) -> &SessionConfig {
        &self.session
    }

    fn launch<'a>(
        &'a self,
        image_id: &'a str,
        options: &'a LaunchOptions,
        wait: bool,
    ) -> BackendFuture<'a, Instance<Self::Driver>> {
        Box::pin(async move {
            let user_data = self.effective_user_data(options)?;
            let name = self.session.instance_name();
            debug!(image = image_id, instance = %name, "launching container");
            let output =
                self.run_lxc(&launch_args(image_id, &name, options, user_data.as_deref()))?;
            checked(output, &name, InstanceState::Provisioning)?;
            let mut instance = self.mint(&name, InstanceState::Provisioning);
            if wait {
                instance.wait().await?;
            }
            Ok(instance)
        })
    }

    fn get_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> BackendFuture<'a, Instance<Self::Driver>> {
        Box::pin(async move {
            let output = self.run_lxc(&string_args(&["info", instance_id]))?;
            if output.failed() {
                return Err(LifecycleError::InstanceGone {
                    instance_id: instance_id.to_owned(),
                });
            }
            let state = parse::status_field(&output.stdout)
                .map_or(InstanceState::Unknown, InstanceState::parse);
            Ok(self.mint(instance_id, state))
        })
    }

    fn delete_image<'a>(&'a self, image_id: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let local = image_id.strip_prefix("local:").unwrap_or(image_id);
            let output = self.run_lxc(&string_args(&["image", "delete", local]))?;
            checked(output, image_id, InstanceState::Unknown)?;
            Ok(())
        })
    }

    fn get_or_create_network<'a>(&'a self, name: &'a str) -> BackendFuture<'a, NetworkContext> {
        Box::pin(async move {
            let existing = self.run_lxc(&string_args(&["network", "show", name]))?;
            if existing.is_success() {
                debug!(network = name, "reusing existing network");
            } else {
                let created = self.run_lxc(&string_args(&["network", "create", name]))?;
                checked(created, name, InstanceState::Unknown)?;
            }
            Ok(NetworkContext {
                id: name.to_owned(),
                name: name.to_owned(),
            })
        })
    }
}

/// Driver observing and mutating one LXD container by name.
#[derive(Clone, Debug)]
pub struct LxdDriver<R: CommandRunner> {
    name: String,
    lxc_bin: String,
    runner: R,
}

impl<R: CommandRunner> LxdDriver<R> {
    fn run(&self, arguments: &[String]) -> Result<CommandOutput, LifecycleError> {
        run_cli(&self.runner, &self.lxc_bin, arguments)
    }

    fn run_checked(
        &self,
        arguments: &[String],
        last_state: InstanceState,
    ) -> Result<CommandOutput, LifecycleError> {
        let output = self.run(arguments)?;
        checked(output, &self.name, last_state)
    }

    /// Copies a file out of the container to a local path.
    ///
    /// # Errors
    /// Returns [`LifecycleError::Operation`] when `lxc file pull` fails,
    /// typically because the remote path does not exist.
    pub fn pull_file(&self, remote_path: &str, local_path: &str) -> Result<(), LifecycleError> {
        let source = format!("{}{remote_path}", self.name);
        self.run_checked(
            &string_args(&["file", "pull", source.as_str(), local_path]),
            InstanceState::Running,
        )?;
        Ok(())
    }

    /// Copies a local file into the container.
    ///
    /// # Errors
    /// Returns [`LifecycleError::Operation`] when `lxc file push` fails.
    pub fn push_file(&self, local_path: &str, remote_path: &str) -> Result<(), LifecycleError> {
        let target = format!("{}{remote_path}", self.name);
        self.run_checked(
            &string_args(&["file", "push", local_path, target.as_str()]),
            InstanceState::Running,
        )?;
        Ok(())
    }

    /// Sets one configuration key on the container.
    ///
    /// # Errors
    /// Returns [`LifecycleError::Operation`] when `lxc config set` rejects
    /// the key or value.
    pub fn set_config(&self, key: &str, value: &str) -> Result<(), LifecycleError> {
        self.run_checked(
            &string_args(&["config", "set", self.name.as_str(), key, value]),
            InstanceState::Unknown,
        )?;
        Ok(())
    }

    /// Records a stateless local snapshot of the container.
    ///
    /// # Errors
    /// Returns [`LifecycleError::Operation`] when `lxc snapshot` fails.
    pub fn local_snapshot(&self, snapshot_name: &str) -> Result<(), LifecycleError> {
        self.run_checked(
            &string_args(&["snapshot", self.name.as_str(), snapshot_name]),
            InstanceState::Unknown,
        )?;
        Ok(())
    }

    /// Rolls the container back to a previously recorded local snapshot.
    ///
    /// # Errors
    /// Returns [`LifecycleError::Operation`] when the snapshot does not
    /// exist or `lxc restore` otherwise fails.
    pub fn restore_snapshot(&self, snapshot_name: &str) -> Result<(), LifecycleError> {
        self.run_checked(
            &string_args(&["restore", self.name.as_str(), snapshot_name]),
            InstanceState::Unknown,
        )?;
        Ok(())
    }

    /// Discards a local snapshot without touching the container itself.
    ///
    /// # Errors
    /// Returns [`LifecycleError::Operation`] when `lxc delete` fails.
    pub fn delete_snapshot(&self, snapshot_name: &str) -> Result<(), LifecycleError> {
        let target = format!("{}/{snapshot_name}", self.name);
        self.run_checked(
            &string_args(&["delete", target.as_str()]),
            InstanceState::Unknown,
        )?;
        Ok(())
    }

    /// Reports whether the container was launched as ephemeral.
    ///
    /// A missing or unparseable `Type:` field reads as persistent.
    #[must_use]
    pub fn is_ephemeral(&self) -> bool {
        match self.run(&string_args(&["info", self.name.as_str()])) {
            Ok(output) if output.is_success() => parse::type_field(&output.stdout)
                .is_some_and(|kind| kind.eq_ignore_ascii_case("ephemeral")),
            Ok(_) | Err(_) => false,
        }
    }
}

impl<R: CommandRunner> InstanceDriver for LxdDriver<R> {
    fn id(&self) -> &str {
        &self.name
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn backend_name(&self) -> &'static str {
        "lxd"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::full()
    }

    fn fetch_state(&self) -> DriverFuture<'_, InstanceState> {
        Box::pin(async move {
            let output = self.run(&string_args(&["info", self.name.as_str()]))?;
            if output.failed() {
                return Ok(InstanceState::Unknown);
            }
            Ok(parse::status_field(&output.stdout)
                .map_or(InstanceState::Unknown, InstanceState::parse))
        })
    }

    fn fetch_ip(&self) -> DriverFuture<'_, Option<IpAddr>> {
        Box::pin(async move {
            let output = self.run(&string_args(&[
                "list",
                self.name.as_str(),
                "-c",
                "4",
                "--format",
                "csv",
            ]))?;
            if output.failed() {
                return Ok(None);
            }
            Ok(parse::first_address(&output.stdout).and_then(|token| token.parse().ok()))
        })
    }

    fn is_ready(&self) -> DriverFuture<'_, bool> {
        Box::pin(async move {
            if self.fetch_state().await? != InstanceState::Running {
                return Ok(false);
            }
            let output = self.run(&string_args(&[
                "exec",
                self.name.as_str(),
                "--",
                "test",
                "-f",
                BOOT_FINISHED,
            ]))?;
            Ok(output.is_success())
        })
    }

    fn is_gone(&self) -> DriverFuture<'_, bool> {
        Box::pin(async move {
            let output = self.run(&string_args(&["info", self.name.as_str()]))?;
            Ok(output.failed())
        })
    }

    fn image_ready<'a>(&'a self, image_id: &'a str) -> DriverFuture<'a, bool> {
        Box::pin(async move {
            let local = image_id.strip_prefix("local:").unwrap_or(image_id);
            let output = self.run(&string_args(&["image", "show", local]))?;
            Ok(output.is_success())
        })
    }

    fn request_start(&self) -> DriverFuture<'_, ()> {
        Box::pin(async move {
            self.run_checked(
                &string_args(&["start", self.name.as_str()]),
                InstanceState::Stopped,
            )?;
            Ok(())
        })
    }

    fn request_stop(&self) -> DriverFuture<'_, ()> {
        Box::pin(async move {
            self.run_checked(
                &string_args(&["stop", self.name.as_str(), "--force"]),
                InstanceState::Running,
            )?;
            Ok(())
        })
    }

    fn request_delete(&self) -> DriverFuture<'_, ()> {
        Box::pin(async move {
            let output = self.run(&string_args(&["delete", self.name.as_str(), "--force"]))?;
            if output.failed() && !output.stderr.to_lowercase().contains("not found") {
                return Err(LifecycleError::Operation {
                    resource_id: self.name.clone(),
                    state: InstanceState::Deleting,
                    message: output.stderr.trim().to_owned(),
                });
            }
            Ok(())
        })
    }

    fn execute<'a>(&'a self, command: &'a [String]) -> DriverFuture<'a, CommandOutput> {
        Box::pin(async move {
            let script = shell_join(command);
            self.run(&string_args(&["exec", self.name.as_str(), "--", "sh", "-c", script.as_str()]))
        })
    }

    fn console_log(&self) -> DriverFuture<'_, String> {
        Box::pin(async move {
            let output = self.run_checked(
                &string_args(&["console", self.name.as_str(), "--show-log"]),
                InstanceState::Unknown,
            )?;
            Ok(output.stdout)
        })
    }

    fn capture_image<'a>(&'a self, name: &'a str) -> DriverFuture<'a, ImageRef> {
        Box::pin(async move {
            self.run_checked(
                &string_args(&["publish", self.name.as_str(), "--alias", name]),
                InstanceState::Stopped,
            )?;
            Ok(ImageRef::new(format!("local:{name}")))
        })
    }
}

fn run_cli<R: CommandRunner>(
    runner: &R,
    bin: &str,
    arguments: &[String],
) -> Result<CommandOutput, LifecycleError> {
    let os_args: Vec<OsString> = arguments.iter().map(OsString::from).collect();
    runner.run(bin, &os_args)
}

fn checked(
    output: CommandOutput,
    resource_id: &str,
    state: InstanceState,
) -> Result<CommandOutput, LifecycleError> {
    if output.failed() {
        return Err(LifecycleError::Operation {
            resource_id: resource_id.to_owned(),
            state,
            message: output.stderr.trim().to_owned(),
        });
    }
    Ok(output)
}

fn string_args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| (*part).to_owned()).collect()
}

fn launch_args(
    image_id: &str,
    name: &str,
    options: &LaunchOptions,
    user_data: Option<&str>,
) -> Vec<String> {
    let mut arguments = vec![
        String::from("launch"),
        image_id.to_owned(),
        name.to_owned(),
    ];
    if options.ephemeral {
        arguments.push(String::from("--ephemeral"));
    }
    if let Some(instance_type) = &options.instance_type {
        arguments.push(String::from("--type"));
        arguments.push(instance_type.clone());
    }
    if let Some(user_data) = user_data {
        arguments.push(String::from("--config"));
        arguments.push(format!("user.user-data={user_data}"));
    }
    if let Some(network) = &options.network {
        arguments.push(String::from("--network"));
        arguments.push(network.id.clone());
    }
    if !options.tags.is_empty() {
        arguments.push(String::from("--config"));
        arguments.push(format!("user.tags={}", options.tags.join(",")));
    }
    for (key, value) in &options.extra {
        arguments.push(String::from("--config"));
        arguments.push(format!("{key}={}", render_value(value)));
    }
    arguments
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn shell_join(command: &[String]) -> String {
    let escaped: Vec<String> = command
        .iter()
        .map(|part| shell_escape::unix::escape(part.as_str().into()).into_owned())
        .collect();
    escaped.join(" ")
}
