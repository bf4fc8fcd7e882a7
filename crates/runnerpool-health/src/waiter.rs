//! Timeout and interval polling.
//!
//! The check runs immediately, then once per interval, until it reports
//! success or failure or the deadline passes. Timing out is its own
//! outcome: "still unknown" is not the same answer as "definitively no".

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Result of one check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    Success,
    /// Not yet; the string says what is still outstanding.
    Retry(String),
    /// Will never succeed.
    Failure(String),
}

/// Terminal result of a wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Success { attempts: u32 },
    Failure { reason: String, attempts: u32 },
    TimedOut { attempts: u32, last_retry: String },
}

/// Boolean poll result with a human-readable diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    pub state: bool,
    pub message: String,
}

impl PollOutcome {
    /// Fold a wait outcome into a poll result. `what` names the condition
    /// that was waited for, e.g. "all instances healthy".
    pub fn from_wait(outcome: &WaitOutcome, what: &str, timeout: Duration) -> Self {
        match outcome {
            WaitOutcome::Success { attempts } => Self {
                state: true,
                message: format!("{what} after {attempts} check(s)"),
            },
            WaitOutcome::Failure { reason, .. } => Self {
                state: false,
                message: format!("{what} failed: {reason}"),
            },
            WaitOutcome::TimedOut { last_retry, .. } => Self {
                state: false,
                message: format!(
                    "timed out after {}s waiting for {what}: {last_retry}",
                    timeout.as_secs()
                ),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Waiter {
    timeout: Duration,
    interval: Duration,
}

impl Waiter {
    /// An interval of zero is raised to one millisecond.
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    pub fn from_secs(timeout_secs: u64, interval_secs: u64) -> Self {
        Self::new(
            Duration::from_secs(timeout_secs),
            Duration::from_secs(interval_secs),
        )
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll `check` until it settles or the deadline passes.
    ///
    /// The last sleep is cut short at the deadline, so a final check always
    /// happens exactly at the deadline.
    pub async fn wait<F, Fut>(&self, mut check: F) -> WaitOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Check>,
    {
        let deadline = Instant::now() + self.timeout;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let last_retry = match check().await {
                Check::Success => return WaitOutcome::Success { attempts },
                Check::Failure(reason) => return WaitOutcome::Failure { reason, attempts },
                Check::Retry(outstanding) => outstanding,
            };

            let now = Instant::now();
            if now >= deadline {
                debug!(attempts, "waiter deadline reached");
                return WaitOutcome::TimedOut {
                    attempts,
                    last_retry,
                };
            }
            debug!(attempts, outstanding = %last_retry, "waiter retrying");
            tokio::time::sleep_until((now + self.interval).min(deadline)).await;
        }
    }
}
