//! Bounded retry helper shared by every polling site (offline wait, monkey
//! waits, readiness polling).

use super::execution::CancellationToken;
use crate::core::error::{Error, Result};
use std::time::{Duration, Instant};

/// How long a [`RetryPolicy`] keeps trying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    /// A fixed number of attempts.
    Attempts(u32),
    /// Keep trying until this much time has passed.
    Within(Duration),
}

/// Interval plus budget for a polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub budget: Budget,
}

impl RetryPolicy {
    /// Try `attempts` times, sleeping `interval` after each miss.
    pub fn attempts(attempts: u32, interval: Duration) -> Self {
        Self {
            interval,
            budget: Budget::Attempts(attempts.max(1)),
        }
    }

    /// Try until `deadline` has elapsed, sleeping `interval` after each miss.
    pub fn within(deadline: Duration, interval: Duration) -> Self {
        Self {
            interval,
            budget: Budget::Within(deadline),
        }
    }
}

/// A wait budget shared across a sequence of attempts.
#[derive(Debug, Clone, Copy)]
pub struct CountdownWatch {
    started: Instant,
    budget: Duration,
}

impl CountdownWatch {
    /// Start counting down from `budget`.
    pub fn start(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.elapsed())
    }

    pub fn is_expired(&self) -> bool {
        self.elapsed() >= self.budget
    }
}

/// Call `probe` until it reports success or the policy's budget runs out.
///
/// `probe` receives the 1-based attempt number. A probe error counts as a
/// miss: it is logged and the loop carries on. Exhausting the budget yields a
/// timeout error for `operation`. A tripped `cancel` token ends the loop early
/// with the same timeout error.
pub fn poll_until<F>(
    operation: &str,
    policy: &RetryPolicy,
    cancel: Option<&CancellationToken>,
    mut probe: F,
) -> Result<()>
where
    F: FnMut(u32) -> Result<bool>,
{
    let watch = CountdownWatch::start(match policy.budget {
        Budget::Within(deadline) => deadline,
        Budget::Attempts(_) => Duration::MAX,
    });
    let never = CancellationToken::new();
    let cancel = cancel.unwrap_or(&never);

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match probe(attempt) {
            Ok(true) => {
                tracing::debug!(operation, attempt, "condition met");
                return Ok(());
            }
            Ok(false) => tracing::trace!(operation, attempt, "condition not met yet"),
            Err(e) => tracing::debug!(operation, attempt, error = %e, "probe failed, retrying"),
        }

        if !cancel.sleep(policy.interval) {
            return Err(Error::timeout(operation, watch.elapsed()));
        }

        let exhausted = match policy.budget {
            Budget::Attempts(max) => attempt >= max,
            Budget::Within(_) => watch.is_expired(),
        };
        if exhausted {
            tracing::warn!(operation, attempts = attempt, elapsed = ?watch.elapsed(), "gave up waiting");
            return Err(Error::timeout(operation, watch.elapsed()));
        }
    }
}
