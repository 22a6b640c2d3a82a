//! Command runner abstraction used for every toolchain interaction.
//!
//! All external programs (`adb`, `emulator`, `android`, `aapt`, the signing
//! tools) are invoked through a [`CommandRunner`]. The system implementation
//! spawns real processes; [`scripted::ScriptedRunner`] answers from a closure
//! so the lifecycle can be exercised without an SDK.

use crate::core::error::{Error, Result};
use std::fmt;
use std::path::PathBuf;
use std::sync::mpsc::Receiver;

pub mod execution;
pub mod retry;
pub mod scripted;
pub mod system;
pub mod watcher;

pub use execution::{CancellationToken, Execution};
pub use retry::{Budget, CountdownWatch, RetryPolicy, poll_until};
pub use scripted::{ScriptedRunner, SpawnScript};
pub use system::SystemRunner;
pub use watcher::{Condition, OutputWatcher};

/// A single external command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

impl ProcessCommand {
    /// Create a command for `program` with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child process.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Run the command from `dir`.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }
}

impl fmt::Display for ProcessCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(' ') {
                write!(f, " \"{arg}\"")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Outcome of a foreground command.
///
/// A non-zero exit code is not an error by itself; callers inspect the result
/// and decide.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessResult {
    /// Exit code, `None` if the process was terminated by a signal.
    pub exit_code: Option<i32>,

    /// Stdout lines followed by stderr lines.
    pub output: Vec<String>,
}

impl ProcessResult {
    /// Create a result from an exit code and output lines.
    pub fn new(exit_code: Option<i32>, output: Vec<String>) -> Self {
        Self { exit_code, output }
    }

    /// A zero exit code with the given output.
    pub fn success<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Some(0), lines.into_iter().map(Into::into).collect())
    }

    /// A non-zero exit code with the given output.
    pub fn failed<I, S>(exit_code: i32, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Some(exit_code), lines.into_iter().map(Into::into).collect())
    }

    /// Whether the process exited with code zero.
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Whether any output line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.output.iter().any(|line| line.contains(needle))
    }

    /// Whole output joined with newlines.
    pub fn text(&self) -> String {
        self.output.join("\n")
    }

    /// Convert into an execution error for `command`, keeping the output.
    pub fn into_error(self, command: &ProcessCommand) -> Error {
        Error::execution(command.to_string(), self.exit_code).with_output(self.output)
    }
}

/// Executes external programs.
pub trait CommandRunner: Send + Sync {
    /// Run `command` to completion and capture its output.
    fn run(&self, command: &ProcessCommand) -> Result<ProcessResult>;

    /// Start `command` in the background and stream its output.
    fn spawn(&self, command: &ProcessCommand) -> Result<Box<dyn RunningProcess>>;

    /// Run `command` and turn a non-zero exit into an execution error.
    fn run_checked(&self, command: &ProcessCommand) -> Result<ProcessResult> {
        let result = self.run(command)?;
        if result.succeeded() {
            Ok(result)
        } else {
            Err(result.into_error(command))
        }
    }

    /// Get a human-readable name for this runner.
    fn name(&self) -> &str;
}

/// Handle to a background process started by [`CommandRunner::spawn`].
///
/// The handle does not kill the process on drop; owners call [`kill`](Self::kill)
/// explicitly as part of their teardown.
pub trait RunningProcess: Send {
    /// OS process id, when there is one.
    fn id(&self) -> Option<u32>;

    /// Take the line stream. Returns `None` after the first call.
    ///
    /// The channel disconnects once the process closes its output.
    fn take_lines(&mut self) -> Option<Receiver<String>>;

    /// Exit code if the process has exited, without blocking.
    fn try_wait(&mut self) -> Result<Option<i32>>;

    /// Terminate the process. Killing an exited process is not an error.
    fn kill(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_command_display() {
        let cmd = ProcessCommand::new("adb")
            .args(["-s", "emulator-5554", "shell"])
            .arg("pm list packages");
        assert_eq!(cmd.to_string(), "adb -s emulator-5554 shell \"pm list packages\"");
    }

    #[test]
    fn test_process_result_success() {
        let result = ProcessResult::success(["Success"]);
        assert!(result.succeeded());
        assert!(result.contains("Succ"));
        assert_eq!(result.text(), "Success");
    }

    #[test]
    fn test_process_result_failed_into_error() {
        let cmd = ProcessCommand::new("adb").arg("install");
        let err = ProcessResult::failed(1, ["Failure"]).into_error(&cmd);
        assert!(err.is_execution());
        assert_eq!(err.output(), ["Failure".to_string()]);
    }

    #[test]
    fn test_signal_exit_is_not_success() {
        let result = ProcessResult::new(None, Vec::new());
        assert!(!result.succeeded());
    }
}
