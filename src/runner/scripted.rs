//! A [`CommandRunner`] that answers from closures instead of spawning
//! processes.
//!
//! Useful for exercising the lifecycle without an Android SDK: every
//! invocation is recorded so tests can assert on what was run and in which
//! order.
//!
//! # Example
//!
//! ```
//! use droid_runner::runner::{CommandRunner, ProcessCommand, ProcessResult, ScriptedRunner};
//!
//! let runner = ScriptedRunner::new(|cmd| {
//!     if cmd.args.iter().any(|a| a == "devices") {
//!         ProcessResult::success(["List of devices attached", "emulator-5554\tdevice"])
//!     } else {
//!         ProcessResult::success(Vec::<String>::new())
//!     }
//! });
//! let result = runner.run(&ProcessCommand::new("adb").arg("devices")).unwrap();
//! assert!(result.contains("emulator-5554"));
//! assert_eq!(runner.count_matching("adb devices"), 1);
//! ```

use super::{CommandRunner, ProcessCommand, ProcessResult, RunningProcess};
use crate::core::error::Result;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

type RunHandler = dyn Fn(&ProcessCommand) -> ProcessResult + Send + Sync;
type SpawnHandler = dyn Fn(&ProcessCommand) -> SpawnScript + Send + Sync;

/// Behaviour of a scripted background process.
#[derive(Debug, Clone, Default)]
pub struct SpawnScript {
    /// Lines emitted, in order.
    pub lines: Vec<String>,
    /// Delay before each line.
    pub line_interval: Duration,
    /// Keep running after the last line until killed.
    pub stay_alive: bool,
}

impl SpawnScript {
    /// Emit `lines` and exit.
    pub fn exits_after<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Emit `lines` and keep running until killed.
    pub fn runs_after<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            stay_alive: true,
            ..Self::exits_after(lines)
        }
    }

    /// Delay each line by `interval`.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.line_interval = interval;
        self
    }
}

/// Closure-driven runner that records every invocation.
pub struct ScriptedRunner {
    on_run: Box<RunHandler>,
    on_spawn: Box<SpawnHandler>,
    invocations: Mutex<Vec<ProcessCommand>>,
    kills: Arc<AtomicUsize>,
}

impl ScriptedRunner {
    /// Create a runner answering foreground commands with `on_run`.
    ///
    /// Background commands exit immediately without output unless
    /// [`on_spawn`](Self::on_spawn) is set.
    pub fn new<F>(on_run: F) -> Self
    where
        F: Fn(&ProcessCommand) -> ProcessResult + Send + Sync + 'static,
    {
        Self {
            on_run: Box::new(on_run),
            on_spawn: Box::new(|_| SpawnScript::default()),
            invocations: Mutex::new(Vec::new()),
            kills: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Answer background commands with `on_spawn`.
    pub fn on_spawn<F>(mut self, on_spawn: F) -> Self
    where
        F: Fn(&ProcessCommand) -> SpawnScript + Send + Sync + 'static,
    {
        self.on_spawn = Box::new(on_spawn);
        self
    }

    /// Every command run or spawned so far, in order.
    pub fn invocations(&self) -> Vec<ProcessCommand> {
        self.invocations
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Rendered command lines of every invocation.
    pub fn command_lines(&self) -> Vec<String> {
        self.invocations().iter().map(ToString::to_string).collect()
    }

    /// Number of invocations whose rendered command line contains `needle`.
    pub fn count_matching(&self, needle: &str) -> usize {
        self.command_lines()
            .iter()
            .filter(|line| line.contains(needle))
            .count()
    }

    /// Number of scripted processes that were killed while still running.
    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    fn record(&self, command: &ProcessCommand) {
        if let Ok(mut guard) = self.invocations.lock() {
            guard.push(command.clone());
        }
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, command: &ProcessCommand) -> Result<ProcessResult> {
        self.record(command);
        Ok((self.on_run)(command))
    }

    fn spawn(&self, command: &ProcessCommand) -> Result<Box<dyn RunningProcess>> {
        self.record(command);
        let script = (self.on_spawn)(command);
        Ok(Box::new(ScriptedProcess::start(script, self.kills.clone())))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct ScriptedProcess {
    lines: Option<Receiver<String>>,
    killed: Arc<AtomicBool>,
    exited: Arc<AtomicBool>,
    kills: Arc<AtomicUsize>,
}

impl ScriptedProcess {
    fn start(script: SpawnScript, kills: Arc<AtomicUsize>) -> Self {
        let (tx, rx) = mpsc::channel();
        let killed = Arc::new(AtomicBool::new(false));
        let exited = Arc::new(AtomicBool::new(false));

        let thread_killed = killed.clone();
        let thread_exited = exited.clone();
        thread::spawn(move || {
            for line in script.lines {
                if thread_killed.load(Ordering::SeqCst) {
                    break;
                }
                if !script.line_interval.is_zero() {
                    thread::sleep(script.line_interval);
                }
                if tx.send(line).is_err() {
                    break;
                }
            }
            if script.stay_alive {
                while !thread_killed.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(10));
                }
            }
            thread_exited.store(true, Ordering::SeqCst);
        });

        Self {
            lines: Some(rx),
            killed,
            exited,
            kills,
        }
    }
}

impl RunningProcess for ScriptedProcess {
    fn id(&self) -> Option<u32> {
        None
    }

    fn take_lines(&mut self) -> Option<Receiver<String>> {
        self.lines.take()
    }

    fn try_wait(&mut self) -> Result<Option<i32>> {
        if self.killed.load(Ordering::SeqCst) {
            Ok(Some(-9))
        } else if self.exited.load(Ordering::SeqCst) {
            Ok(Some(0))
        } else {
            Ok(None)
        }
    }

    fn kill(&mut self) -> Result<()> {
        if !self.exited.load(Ordering::SeqCst) && !self.killed.swap(true, Ordering::SeqCst) {
            self.kills.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_invocations_in_order() {
        let runner = ScriptedRunner::new(|_| ProcessResult::success(["ok"]));
        runner.run(&ProcessCommand::new("adb").arg("devices")).unwrap();
        runner
            .run(&ProcessCommand::new("android").args(["list", "target"]))
            .unwrap();
        assert_eq!(
            runner.command_lines(),
            vec!["adb devices".to_string(), "android list target".to_string()]
        );
        assert_eq!(runner.count_matching("list"), 1);
    }

    #[test]
    fn test_spawned_process_exits_after_lines() {
        let runner = ScriptedRunner::new(|_| ProcessResult::default())
            .on_spawn(|_| SpawnScript::exits_after(["a", "b"]));
        let mut process = runner.spawn(&ProcessCommand::new("emulator")).unwrap();
        let lines: Vec<String> = process.take_lines().unwrap().iter().collect();
        assert_eq!(lines, vec!["a".to_string(), "b".to_string()]);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(process.try_wait().unwrap(), Some(0));
        process.kill().unwrap();
        assert_eq!(runner.kills(), 0);
    }

    #[test]
    fn test_spawned_process_stays_alive_until_killed() {
        let runner = ScriptedRunner::new(|_| ProcessResult::default())
            .on_spawn(|_| SpawnScript::runs_after(["starting"]));
        let mut process = runner.spawn(&ProcessCommand::new("emulator")).unwrap();
        let rx = process.take_lines().unwrap();
        assert_eq!(rx.recv().unwrap(), "starting");
        assert!(process.try_wait().unwrap().is_none());

        process.kill().unwrap();
        process.kill().unwrap();
        assert_eq!(runner.kills(), 1);
        assert_eq!(process.try_wait().unwrap(), Some(-9));
        // Channel disconnects once the scripted process winds down.
        assert!(rx.recv().is_err());
    }
}
