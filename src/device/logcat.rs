use super::AdbBridge;
use crate::config::LogcatConfig;
use crate::core::error::Result;
use crate::runner::{CancellationToken, Execution, RunningProcess};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

/// Background task streaming a device's log into a file.
///
/// The file writer lives inside the task and is flushed and closed only
/// after the task has observed cancellation.
pub struct LogTail {
    serial: String,
    path: PathBuf,
    process: Box<dyn RunningProcess>,
    execution: Option<Execution<u64>>,
}

impl LogTail {
    /// Start tailing the log of `serial` into `path`.
    pub fn start(bridge: &AdbBridge, serial: &str, config: &LogcatConfig, path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            crate::util::ensure_dir_exists(parent)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);

        let cmd = bridge.logcat_command(serial, &config.format, &config.filter_specs);
        let mut process = bridge.runner().spawn(&cmd)?;
        let lines = process.take_lines();

        let submitted = Execution::submit(format!("logcat {serial}"), move |token: &CancellationToken| {
            let mut written = 0u64;
            if let Some(lines) = lines {
                while !token.is_cancelled() {
                    match lines.recv_timeout(Duration::from_millis(100)) {
                        Ok(line) => {
                            writeln!(writer, "{line}")?;
                            written += 1;
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            }
            writer.flush()?;
            Ok(written)
        });
        let execution = match submitted {
            Ok(execution) => execution,
            Err(e) => {
                if let Err(kill) = process.kill() {
                    tracing::warn!(serial, error = %kill, "failed to stop logcat");
                }
                return Err(e);
            }
        };

        tracing::info!(serial, path = %path.display(), "capturing device log");
        Ok(Self {
            serial: serial.to_string(),
            path: path.to_path_buf(),
            process,
            execution: Some(execution),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cancel the task, stop `logcat` and wait for the writer to close.
    ///
    /// Failures are logged; calling `stop` twice is a no-op.
    pub fn stop(&mut self) {
        let Some(execution) = self.execution.take() else {
            return;
        };
        execution.cancel();
        if let Err(e) = self.process.kill() {
            tracing::warn!(serial = %self.serial, error = %e, "failed to stop logcat");
        }
        match execution.cancel_and_join() {
            Some(Ok(lines)) => tracing::debug!(serial = %self.serial, lines, "device log closed"),
            Some(Err(e)) => tracing::warn!(serial = %self.serial, error = %e, "device log capture failed"),
            None => tracing::debug!(serial = %self.serial, "device log already closed"),
        }
    }
}

impl Drop for LogTail {
    fn drop(&mut self) {
        self.stop();
    }
}
