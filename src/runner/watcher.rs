//! Output-matching watchers.
//!
//! An [`OutputWatcher`] flips to active once a command's output contains (or
//! stops containing) a given substring. It is used both against a streamed
//! process (the emulator boot marker) and against repeatedly polled shell
//! output (the package and process "monkey" waits).
//!
//! The watcher keeps a bounded tail of what it has seen so failures can report
//! the output that led up to them.

use super::retry::{RetryPolicy, poll_until};
use super::{CommandRunner, ProcessCommand};
use crate::core::error::Result;
use std::collections::VecDeque;

/// Number of trailing lines kept for error reports.
const CAPTURE_LINES: usize = 200;

/// What the watcher waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// Active once any line contains the needle.
    Contains,
    /// Active once a complete output batch has no line containing the needle.
    Absent,
}

/// Watches command output for a substring.
#[derive(Debug, Clone)]
pub struct OutputWatcher {
    needle: String,
    condition: Condition,
    ignore_case: bool,
    exact: bool,
    active: bool,
    captured: VecDeque<String>,
}

impl OutputWatcher {
    /// Watch for `needle` appearing.
    pub fn contains(needle: impl Into<String>) -> Self {
        Self::new(needle.into(), Condition::Contains)
    }

    /// Watch for `needle` disappearing.
    pub fn absent(needle: impl Into<String>) -> Self {
        Self::new(needle.into(), Condition::Absent)
    }

    fn new(needle: String, condition: Condition) -> Self {
        Self {
            needle,
            condition,
            ignore_case: false,
            exact: false,
            active: false,
            captured: VecDeque::new(),
        }
    }

    /// Match without regard to ASCII case.
    pub fn ignore_case(mut self) -> Self {
        self.ignore_case = true;
        self.needle = self.needle.to_ascii_lowercase();
        self
    }

    /// Match only whole whitespace-separated fields, so `package:a.b` does
    /// not match `package:a.b.test`.
    pub fn exact(mut self) -> Self {
        self.exact = true;
        self
    }

    pub fn condition(&self) -> Condition {
        self.condition
    }

    /// Whether the condition has been met.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Lines seen so far, oldest first, bounded to the most recent ones.
    pub fn captured(&self) -> Vec<String> {
        self.captured.iter().cloned().collect()
    }

    fn matches(&self, line: &str) -> bool {
        let line = if self.ignore_case {
            line.to_ascii_lowercase()
        } else {
            line.to_string()
        };
        if self.exact {
            line.split_whitespace().any(|field| field == self.needle)
        } else {
            line.contains(&self.needle)
        }
    }

    fn capture(&mut self, line: &str) {
        if self.captured.len() == CAPTURE_LINES {
            self.captured.pop_front();
        }
        self.captured.push_back(line.to_string());
    }

    /// Feed one streamed line. Returns whether the watcher is active.
    ///
    /// Only [`Condition::Contains`] can activate from a stream; absence needs
    /// a complete batch.
    pub fn on_line(&mut self, line: &str) -> bool {
        self.capture(line);
        if self.condition == Condition::Contains && self.matches(line) {
            self.active = true;
        }
        self.active
    }

    /// Feed the complete output of one poll. Returns whether the watcher is
    /// active.
    pub fn observe(&mut self, lines: &[String]) -> bool {
        for line in lines {
            self.capture(line);
        }
        let found = lines.iter().any(|l| self.matches(l));
        self.active = match self.condition {
            Condition::Contains => found,
            Condition::Absent => !found,
        };
        self.active
    }

    /// Re-run `command` under `policy` until the watcher activates.
    ///
    /// Runner errors are retried. On exhaustion the timeout error carries the
    /// captured output.
    pub fn await_command(
        &mut self,
        runner: &dyn CommandRunner,
        command: &ProcessCommand,
        policy: &RetryPolicy,
        operation: &str,
    ) -> Result<()> {
        poll_until(operation, policy, None, |_| {
            let result = runner.run(command)?;
            Ok(self.observe(&result.output))
        })
        .map_err(|e| e.with_output(self.captured()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{ProcessResult, ScriptedRunner};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_contains_activates_on_stream() {
        let mut watcher = OutputWatcher::contains("boot completed").ignore_case();
        assert!(!watcher.on_line("emulator: starting"));
        assert!(watcher.on_line("emulator: INFO: Boot Completed in 12000 ms"));
        assert_eq!(watcher.captured().len(), 2);
    }

    #[test]
    fn test_absent_ignores_stream_lines() {
        let mut watcher = OutputWatcher::absent("com.example");
        assert!(!watcher.on_line("anything"));
    }

    #[test]
    fn test_absent_activates_on_clean_batch() {
        let mut watcher = OutputWatcher::absent("package:com.example.app");
        assert!(!watcher.observe(&lines(&["package:android", "package:com.example.app"])));
        assert!(watcher.observe(&lines(&["package:android"])));
    }

    #[test]
    fn test_exact_ignores_longer_names() {
        let mut watcher = OutputWatcher::absent("package:com.example.shop").exact();
        assert!(watcher.observe(&lines(&["package:com.example.shop.test"])));
        assert!(!watcher.observe(&lines(&["package:com.example.shop.test", "package:com.example.shop"])));

        let mut process = OutputWatcher::contains("io.droidrunner.agent_1").exact();
        assert!(!process.observe(&lines(&["u0_a9 901 1 io.droidrunner.agent_10"])));
        assert!(process.observe(&lines(&["u0_a8 900 1 io.droidrunner.agent_1"])));
    }

    #[test]
    fn test_capture_is_bounded() {
        let mut watcher = OutputWatcher::contains("never");
        for i in 0..(CAPTURE_LINES + 50) {
            watcher.on_line(&format!("line {i}"));
        }
        let captured = watcher.captured();
        assert_eq!(captured.len(), CAPTURE_LINES);
        assert_eq!(captured[0], "line 50");
    }

    #[test]
    fn test_await_command_until_package_appears() {
        let polls = Arc::new(AtomicU32::new(0));
        let counter = polls.clone();
        let runner = ScriptedRunner::new(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                ProcessResult::success(["root 1 init"])
            } else {
                ProcessResult::success(["u0_a1 812 com.example.app"])
            }
        });
        let cmd = ProcessCommand::new("adb").args(["shell", "ps"]);
        let mut watcher = OutputWatcher::contains("com.example.app");
        watcher
            .await_command(
                &runner,
                &cmd,
                &RetryPolicy::attempts(5, Duration::from_millis(1)),
                "monkey wait",
            )
            .unwrap();
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_await_command_timeout_carries_output() {
        let runner = ScriptedRunner::new(|_| ProcessResult::success(["package:com.example.app"]));
        let cmd = ProcessCommand::new("adb").args(["shell", "pm", "list", "packages"]);
        let mut watcher = OutputWatcher::absent("com.example.app");
        let err = watcher
            .await_command(
                &runner,
                &cmd,
                &RetryPolicy::attempts(2, Duration::from_millis(1)),
                "monkey wait",
            )
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(err.output().iter().any(|l| l.contains("com.example.app")));
    }
}
