use super::{CommandRunner, ProcessCommand, ProcessResult, RunningProcess};
use crate::core::error::{Error, Result};
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

/// Grace period between SIGTERM and SIGKILL when stopping a background process.
const TERMINATE_GRACE: Duration = Duration::from_secs(3);

/// Runner that executes real OS processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    /// Create a new system runner.
    pub fn new() -> Self {
        Self
    }

    fn command(command: &ProcessCommand) -> Command {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args);
        for (key, value) in &command.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &command.cwd {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd
    }

    fn launch_error(command: &ProcessCommand, err: std::io::Error) -> Error {
        Error::execution(command.to_string(), None)
            .with_output(vec![format!("failed to execute {}: {}", command.program.display(), err)])
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, command: &ProcessCommand) -> Result<ProcessResult> {
        tracing::debug!(command = %command, "executing");

        let output = Self::command(command)
            .output()
            .map_err(|e| Self::launch_error(command, e))?;

        let mut lines: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.trim_end_matches('\r').to_string())
            .collect();
        lines.extend(
            String::from_utf8_lossy(&output.stderr)
                .lines()
                .map(|l| l.trim_end_matches('\r').to_string()),
        );

        let result = ProcessResult::new(output.status.code(), lines);
        tracing::trace!(command = %command, exit_code = ?result.exit_code, "finished");
        Ok(result)
    }

    fn spawn(&self, command: &ProcessCommand) -> Result<Box<dyn RunningProcess>> {
        tracing::debug!(command = %command, "spawning");

        let mut child = Self::command(command)
            .spawn()
            .map_err(|e| Self::launch_error(command, e))?;

        let (tx, rx) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, tx);
        }

        Ok(Box::new(SystemProcess {
            child,
            lines: Some(rx),
        }))
    }

    fn name(&self) -> &str {
        "system"
    }
}

/// Pump a child stream into the shared line channel until EOF.
///
/// The stream is drained to the end even after the receiver is gone: closing
/// the read end would kill a chatty child with SIGPIPE on its next write.
fn forward_lines<R: Read + Send + 'static>(stream: R, tx: Sender<String>) {
    thread::spawn(move || {
        let reader = BufReader::new(stream);
        let mut tx = Some(tx);
        for line in reader.lines() {
            let Ok(line) = line else { break };
            if let Some(sender) = &tx {
                if sender.send(line.trim_end_matches('\r').to_string()).is_err() {
                    tx = None;
                }
            }
        }
    });
}

struct SystemProcess {
    child: Child,
    lines: Option<Receiver<String>>,
}

impl SystemProcess {
    #[cfg(unix)]
    fn terminate_gracefully(&mut self) -> Result<bool> {
        let pid = self.child.id() as libc::pid_t;
        // SAFETY: the pid belongs to a child we spawned and have not reaped yet.
        unsafe {
            libc::kill(pid, libc::SIGTERM);
        }

        let deadline = Instant::now() + TERMINATE_GRACE;
        while Instant::now() < deadline {
            if self.child.try_wait()?.is_some() {
                return Ok(true);
            }
            thread::sleep(Duration::from_millis(50));
        }
        Ok(false)
    }

    #[cfg(not(unix))]
    fn terminate_gracefully(&mut self) -> Result<bool> {
        let _ = (TERMINATE_GRACE, Instant::now());
        Ok(false)
    }
}

impl RunningProcess for SystemProcess {
    fn id(&self) -> Option<u32> {
        Some(self.child.id())
    }

    fn take_lines(&mut self) -> Option<Receiver<String>> {
        self.lines.take()
    }

    fn try_wait(&mut self) -> Result<Option<i32>> {
        Ok(self.child.try_wait()?.map(|status| status.code().unwrap_or(-1)))
    }

    fn kill(&mut self) -> Result<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        if !self.terminate_gracefully()? {
            match self.child.kill() {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.child.wait()?;
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_run_captures_output_and_exit_code() {
        let runner = SystemRunner::new();
        let cmd = ProcessCommand::new("sh").args(["-c", "echo hello; echo oops 1>&2; exit 3"]);
        let result = runner.run(&cmd).unwrap();
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.output, vec!["hello".to_string(), "oops".to_string()]);
    }

    #[test]
    fn test_run_missing_program_is_execution_error() {
        let runner = SystemRunner::new();
        let cmd = ProcessCommand::new("/definitely/not/a/program");
        let err = runner.run(&cmd).unwrap_err();
        assert!(err.is_execution());
    }

    #[test]
    fn test_run_checked_rejects_nonzero_exit() {
        let runner = SystemRunner::new();
        let cmd = ProcessCommand::new("sh").args(["-c", "exit 1"]);
        assert!(runner.run_checked(&cmd).is_err());
    }

    #[test]
    fn test_spawn_streams_lines() {
        let runner = SystemRunner::new();
        let cmd = ProcessCommand::new("sh").args(["-c", "echo one; echo two"]);
        let mut process = runner.spawn(&cmd).unwrap();
        let lines: Vec<String> = process.take_lines().unwrap().iter().collect();
        assert_eq!(lines, vec!["one".to_string(), "two".to_string()]);
        assert!(process.take_lines().is_none());
    }

    #[test]
    fn test_child_survives_dropped_line_receiver() {
        let runner = SystemRunner::new();
        let cmd = ProcessCommand::new("sh").args([
            "-c",
            "echo 'emulator: boot completed'; while true; do echo still logging; sleep 0.05; done",
        ]);
        let mut process = runner.spawn(&cmd).unwrap();
        let lines = process.take_lines().unwrap();
        assert_eq!(lines.recv().unwrap(), "emulator: boot completed");
        drop(lines);

        thread::sleep(Duration::from_millis(500));
        assert!(process.try_wait().unwrap().is_none(), "process died after its output was abandoned");
        process.kill().unwrap();
    }

    #[test]
    fn test_kill_long_running_process() {
        let runner = SystemRunner::new();
        let cmd = ProcessCommand::new("sleep").arg("30");
        let mut process = runner.spawn(&cmd).unwrap();
        assert!(process.try_wait().unwrap().is_none());
        process.kill().unwrap();
        assert!(process.try_wait().unwrap().is_some());
        // Killing again is a no-op.
        process.kill().unwrap();
    }
}
