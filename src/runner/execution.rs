//! Background executions with bounded waits and cooperative cancellation.
//!
//! An [`Execution`] wraps a unit of work running on its own thread. The
//! submitting thread blocks on [`Execution::wait_at_most`] for a bounded time;
//! on timeout the execution's [`CancellationToken`] is tripped so the worker
//! can observe it and stop.

use crate::core::error::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Shared flag a background task polls to learn it should stop.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Create a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` in short slices, returning early on cancellation.
    ///
    /// Returns `true` if the full duration elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        let slice = Duration::from_millis(25);
        let mut remaining = duration;
        while !remaining.is_zero() {
            if self.is_cancelled() {
                return false;
            }
            let step = remaining.min(slice);
            thread::sleep(step);
            remaining -= step;
        }
        !self.is_cancelled()
    }
}

/// Handle to a unit of work running in the background.
pub struct Execution<T> {
    name: String,
    token: CancellationToken,
    rx: Receiver<Result<T>>,
    handle: Option<JoinHandle<()>>,
    outcome: Option<Result<T>>,
}

impl<T: Send + 'static> Execution<T> {
    /// Start `task` on a new thread named after the execution.
    pub fn submit<F>(name: impl Into<String>, task: F) -> Result<Self>
    where
        F: FnOnce(&CancellationToken) -> Result<T> + Send + 'static,
    {
        let name = name.into();
        let token = CancellationToken::new();
        let (tx, rx) = mpsc::sync_channel(1);

        let worker_token = token.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let _ = tx.send(task(&worker_token));
            })?;

        tracing::trace!(execution = %name, "submitted");
        Ok(Self {
            name,
            token,
            rx,
            handle: Some(handle),
            outcome: None,
        })
    }
}

impl<T> Execution<T> {
    /// Execution name, used in timeout errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A clone of this execution's cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Request cancellation without waiting.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the task has completed, successfully or not.
    pub fn is_finished(&mut self) -> bool {
        self.collect();
        self.outcome.is_some()
    }

    /// Whether the task completed with an error.
    pub fn has_failed(&mut self) -> bool {
        self.collect();
        matches!(self.outcome, Some(Err(_)))
    }

    /// Block until the task completes.
    pub fn wait(mut self) -> Result<T> {
        if let Some(outcome) = self.outcome.take() {
            return outcome;
        }
        let outcome = self.rx.recv().unwrap_or_else(|_| Err(self.panicked()));
        self.join();
        outcome
    }

    /// Block for at most `timeout`.
    ///
    /// On timeout the task is cancelled and a timeout error naming the
    /// execution is returned; the worker thread is left to observe the
    /// cancellation and exit on its own.
    pub fn wait_at_most(mut self, timeout: Duration) -> Result<T> {
        if let Some(outcome) = self.outcome.take() {
            return outcome;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => {
                self.join();
                outcome
            }
            Err(RecvTimeoutError::Timeout) => {
                self.token.cancel();
                tracing::debug!(execution = %self.name, ?timeout, "wait timed out, cancelled");
                Err(Error::timeout(self.name.clone(), timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(self.panicked()),
        }
    }

    /// Cancel the task and wait for it to observe the cancellation.
    pub fn cancel_and_join(mut self) -> Option<Result<T>> {
        self.token.cancel();
        let outcome = match self.outcome.take() {
            Some(outcome) => Some(outcome),
            None => self.rx.recv().ok(),
        };
        self.join();
        outcome
    }

    fn collect(&mut self) {
        if self.outcome.is_some() {
            return;
        }
        match self.rx.try_recv() {
            Ok(outcome) => self.outcome = Some(outcome),
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => self.outcome = Some(Err(self.panicked())),
        }
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    fn panicked(&self) -> Error {
        Error::execution(self.name.clone(), None)
            .with_output(vec!["background task terminated without a result".to_string()])
    }
}
