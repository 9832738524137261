//! Test support utilities shared across unit and integration tests.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::backend::{BackendFuture, CloudBackend, ImageRef, LaunchOptions, NetworkContext};
use crate::command::{CommandOutput, CommandRunner};
use crate::config::SessionConfig;
use crate::errors::LifecycleError;
use crate::instance::{Capabilities, DriverFuture, Instance, InstanceDriver};
use crate::key::KeyPair;
use crate::state::InstanceState;
use crate::wait::WaitPolicy;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
/// Running with an empty queue reports success with empty output, so tests
/// only script the invocations they assert on.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.invocations).clone()
    }

    /// Returns the recorded invocations rendered as command strings.
    #[must_use]
    pub fn command_strings(&self) -> Vec<String> {
        self.invocations()
            .iter()
            .map(CommandInvocation::command_string)
            .collect()
    }

    /// Pushes a successful exit status with empty output.
    pub fn push_success(&self) {
        lock(&self.responses).push_back(CommandOutput::ok(""));
    }

    /// Pushes a successful exit status with the given stdout.
    pub fn push_stdout(&self, stdout: &str) {
        lock(&self.responses).push_back(CommandOutput::ok(stdout));
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32, stderr: &str) {
        lock(&self.responses).push_back(CommandOutput::err(code, stderr));
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(
        &self,
        program: &str,
        args: &[std::ffi::OsString],
    ) -> Result<CommandOutput, LifecycleError> {
        lock(&self.invocations).push(CommandInvocation {
            program: program.to_owned(),
            args: args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned())
                .collect(),
        });
        Ok(lock(&self.responses)
            .pop_front()
            .unwrap_or_else(|| CommandOutput::ok("")))
    }
}

#[derive(Debug)]
struct FakeDriverState {
    states: VecDeque<InstanceState>,
    last_state: InstanceState,
    ready_after: u32,
    ready_probes: u32,
    ready_at: Option<Instant>,
    gone_after: u32,
    gone_probes: u32,
    image_ready: bool,
    ip: Option<IpAddr>,
    calls: Vec<String>,
    exec_outputs: VecDeque<CommandOutput>,
    fail_start: Option<LifecycleError>,
    fail_state: Option<LifecycleError>,
    capabilities: Capabilities,
}

impl Default for FakeDriverState {
    fn default() -> Self {
        Self {
            states: VecDeque::new(),
            last_state: InstanceState::Unknown,
            ready_after: 0,
            ready_probes: 0,
            ready_at: None,
            gone_after: 0,
            gone_probes: 0,
            image_ready: true,
            ip: None,
            calls: Vec::new(),
            exec_outputs: VecDeque::new(),
            fail_start: None,
            fail_state: None,
            capabilities: Capabilities::full(),
        }
    }
}

/// In-memory driver with scriptable observations and recorded requests.
#[derive(Clone, Debug)]
pub struct FakeDriver {
    name: String,
    shared: Arc<Mutex<FakeDriverState>>,
}

impl FakeDriver {
    /// Creates a driver with the given name and default behaviour: state
    /// `Unknown`, immediately ready, immediately gone after delete.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            shared: Arc::new(Mutex::new(FakeDriverState::default())),
        }
    }

    /// Queues a state for `fetch_state`; the last queued state repeats.
    pub fn push_state(&self, state: InstanceState) {
        let mut shared = lock(&self.shared);
        shared.states.push_back(state);
        shared.last_state = state;
    }

    /// Makes `is_ready` report false for the first `probes` calls.
    pub fn ready_after(&self, probes: u32) {
        lock(&self.shared).ready_after = probes;
    }

    /// Makes `is_ready` time-based: false until `delay` has elapsed on the
    /// tokio clock, mimicking backend-side work that progresses while the
    /// caller waits on other handles.
    pub fn ready_in(&self, delay: Duration) {
        lock(&self.shared).ready_at = Some(Instant::now() + delay);
    }

    /// Makes `is_gone` report false for the first `probes` calls.
    pub fn gone_after(&self, probes: u32) {
        lock(&self.shared).gone_after = probes;
    }

    /// Pins the image-availability probe to the given answer.
    pub fn set_image_ready(&self, ready: bool) {
        lock(&self.shared).image_ready = ready;
    }

    /// Sets the address returned by `fetch_ip`.
    pub fn set_ip(&self, ip: IpAddr) {
        lock(&self.shared).ip = Some(ip);
    }

    /// Queues an output for the next `execute` call.
    pub fn push_exec_output(&self, output: CommandOutput) {
        lock(&self.shared).exec_outputs.push_back(output);
    }

    /// Makes the next `request_start` fail with the given error.
    pub fn fail_next_start(&self, error: LifecycleError) {
        lock(&self.shared).fail_start = Some(error);
    }

    /// Makes the next `fetch_state` fail with the given error.
    pub fn fail_next_state_fetch(&self, error: LifecycleError) {
        lock(&self.shared).fail_state = Some(error);
    }

    /// Restricts the advertised capabilities.
    pub fn set_capabilities(&self, capabilities: Capabilities) {
        lock(&self.shared).capabilities = capabilities;
    }

    /// Returns all recorded request and execute calls in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        lock(&self.shared).calls.clone()
    }

    fn record(&self, call: &str) {
        lock(&self.shared).calls.push(call.to_owned());
    }
}

impl InstanceDriver for FakeDriver {
    fn id(&self) -> &str {
        &self.name
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn backend_name(&self) -> &'static str {
        "fake"
    }

    fn capabilities(&self) -> Capabilities {
        lock(&self.shared).capabilities
    }

    fn fetch_state(&self) -> DriverFuture<'_, InstanceState> {
        Box::pin(async move {
            let mut shared = lock(&self.shared);
            if let Some(error) = shared.fail_state.take() {
                return Err(error);
            }
            let state = shared.states.pop_front().unwrap_or(shared.last_state);
            Ok(state)
        })
    }

    fn fetch_ip(&self) -> DriverFuture<'_, Option<IpAddr>> {
        Box::pin(async move { Ok(lock(&self.shared).ip) })
    }

    fn is_ready(&self) -> DriverFuture<'_, bool> {
        Box::pin(async move {
            let mut shared = lock(&self.shared);
            if let Some(ready_at) = shared.ready_at {
                return Ok(Instant::now() >= ready_at);
            }
            shared.ready_probes = shared.ready_probes.saturating_add(1);
            Ok(shared.ready_probes > shared.ready_after)
        })
    }

    fn is_gone(&self) -> DriverFuture<'_, bool> {
        Box::pin(async move {
            let mut shared = lock(&self.shared);
            shared.gone_probes = shared.gone_probes.saturating_add(1);
            Ok(shared.gone_probes > shared.gone_after)
        })
    }

    fn image_ready<'a>(&'a self, _image_id: &'a str) -> DriverFuture<'a, bool> {
        Box::pin(async move { Ok(lock(&self.shared).image_ready) })
    }

    fn request_start(&self) -> DriverFuture<'_, ()> {
        Box::pin(async move {
            self.record("start");
            let failure = lock(&self.shared).fail_start.take();
            match failure {
                Some(error) => Err(error),
                None => Ok(()),
            }
        })
    }

    fn request_stop(&self) -> DriverFuture<'_, ()> {
        Box::pin(async move {
            self.record("stop");
            Ok(())
        })
    }

    fn request_delete(&self) -> DriverFuture<'_, ()> {
        Box::pin(async move {
            self.record("delete");
            Ok(())
        })
    }

    fn execute<'a>(&'a self, command: &'a [String]) -> DriverFuture<'a, CommandOutput> {
        Box::pin(async move {
            self.record(&format!("execute {}", command.join(" ")));
            Ok(lock(&self.shared)
                .exec_outputs
                .pop_front()
                .unwrap_or_else(|| CommandOutput::ok("")))
        })
    }

    fn console_log(&self) -> DriverFuture<'_, String> {
        Box::pin(async move {
            self.record("console_log");
            Ok(String::from("fake console output"))
        })
    }

    fn capture_image<'a>(&'a self, name: &'a str) -> DriverFuture<'a, ImageRef> {
        Box::pin(async move {
            self.record(&format!("capture_image {name}"));
            Ok(ImageRef::new(format!("image-{name}")))
        })
    }
}

#[derive(Debug, Default)]
struct FakeBackendState {
    launched: Vec<String>,
    deleted_images: Vec<String>,
    networks: Vec<String>,
}

/// In-memory backend that hands out [`FakeDriver`] instances.
#[derive(Clone)]
pub struct FakeBackend {
    session: SessionConfig,
    wait_policy: WaitPolicy,
    readiness_delay: Option<Duration>,
    key_pair: Option<KeyPair>,
    shared: Arc<Mutex<FakeBackendState>>,
}

impl FakeBackend {
    /// Creates a backend for the given session tag.
    #[must_use]
    pub fn new(tag: &str) -> Self {
        let session = SessionConfig::with_tag(tag);
        let wait_policy = session.wait_policy();
        Self {
            session,
            wait_policy,
            readiness_delay: None,
            key_pair: None,
            shared: Arc::new(Mutex::new(FakeBackendState::default())),
        }
    }

    /// Overrides the wait policy applied to launched instances.
    #[must_use]
    pub fn with_wait_policy(mut self, wait_policy: WaitPolicy) -> Self {
        self.wait_policy = wait_policy;
        self
    }

    /// Registers the key pair attached to every minted handle.
    #[must_use]
    pub fn with_key_pair(mut self, key_pair: KeyPair) -> Self {
        self.key_pair = Some(key_pair);
        self
    }

    /// Makes every launched instance become ready `delay` after its launch
    /// request, on the tokio clock.
    #[must_use]
    pub const fn with_instance_readiness(mut self, delay: Duration) -> Self {
        self.readiness_delay = Some(delay);
        self
    }

    /// Returns the names of every launched instance in order.
    #[must_use]
    pub fn launched(&self) -> Vec<String> {
        lock(&self.shared).launched.clone()
    }

    /// Returns every image id passed to `delete_image`.
    #[must_use]
    pub fn deleted_images(&self) -> Vec<String> {
        lock(&self.shared).deleted_images.clone()
    }

    /// Returns every network name that was created (not merely fetched).
    #[must_use]
    pub fn created_networks(&self) -> Vec<String> {
        lock(&self.shared).networks.clone()
    }

    fn mint(&self, driver: FakeDriver, state: InstanceState) -> Instance<FakeDriver> {
        let instance = Instance::new(driver, self.wait_policy).with_state(state);
        match &self.key_pair {
            Some(key_pair) => instance.with_key_pair(key_pair.clone()),
            None => instance,
        }
    }
}

impl CloudBackend for FakeBackend {
    type Driver = FakeDriver;

    fn session(&self) -> &SessionConfig {
        &self.session
    }

    fn launch<'a>(
        &'a self,
        _image_id: &'a str,
        _options: &'a LaunchOptions,
        wait: bool,
    ) -> BackendFuture<'a, Instance<Self::Driver>> {
        Box::pin(async move {
            let name = self.session.instance_name();
            lock(&self.shared).launched.push(name.clone());
            let driver = FakeDriver::new(&name);
            if let Some(delay) = self.readiness_delay {
                driver.ready_in(delay);
            }
            let mut instance = self.mint(driver, InstanceState::Provisioning);
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
            let known = lock(&self.shared)
                .launched
                .iter()
                .any(|name| name == instance_id);
            if !known {
                return Err(LifecycleError::InstanceGone {
                    instance_id: instance_id.to_owned(),
                });
            }
            Ok(self.mint(FakeDriver::new(instance_id), InstanceState::Unknown))
        })
    }

    fn delete_image<'a>(&'a self, image_id: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            lock(&self.shared).deleted_images.push(image_id.to_owned());
            Ok(())
        })
    }

    fn get_or_create_network<'a>(&'a self, name: &'a str) -> BackendFuture<'a, NetworkContext> {
        Box::pin(async move {
            let mut shared = lock(&self.shared);
            if !shared.networks.iter().any(|existing| existing == name) {
                shared.networks.push(name.to_owned());
            }
            Ok(NetworkContext {
                id: format!("net-{name}"),
                name: name.to_owned(),
            })
        })
    }
}
