//! Local process execution behind a narrow, fakeable boundary.
//!
//! Local backends drive their runtime's CLI through [`CommandRunner`], so
//! tests can script outputs without spawning processes. A command that runs
//! and exits non-zero is data, not an error; only failing to start the
//! process at all surfaces as [`LifecycleError::Spawn`].

use std::ffi::OsString;
use std::process::Command;

use crate::errors::LifecycleError;

/// Result of running a command, locally or inside an instance.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Builds a successful output with the given stdout.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Builds a failed output with the given exit code and stderr.
    #[must_use]
    pub fn err(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Returns `true` when the command ran but did not exit cleanly.
    #[must_use]
    pub const fn failed(&self) -> bool {
        !self.is_success()
    }
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, LifecycleError>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, LifecycleError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| LifecycleError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{CommandOutput, CommandRunner, ProcessCommandRunner};
    use crate::errors::LifecycleError;

    #[test]
    fn non_zero_exit_is_data_not_an_error() {
        let output = CommandOutput::err(2, "no such instance");
        assert!(output.failed());
        assert!(!output.is_success());
    }

    #[test]
    fn missing_program_surfaces_a_spawn_error() {
        let runner = ProcessCommandRunner;
        let result = runner.run("cloudlab-test-nonexistent-binary", &[]);
        assert!(matches!(result, Err(LifecycleError::Spawn { .. })));
    }
}
