//! Bounded timeout around each negotiation attempt.

use std::time::Duration;

use tokio::time::Instant;

/// Outcome of a fired watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogVerdict {
    /// Renegotiate; `attempt` is the new retry count.
    Retry { attempt: u32 },
    /// The retry bound was reached; the call has failed.
    Exhausted { attempts: u32 },
}

/// Single deadline plus a retry counter.
///
/// The watchdog does not own a task; the session loop awaits [`RetryWatchdog::expired`]
/// next to its other event sources and calls [`RetryWatchdog::on_timeout`] when it fires.
#[derive(Debug)]
pub struct RetryWatchdog {
    timeout: Duration,
    max_retries: u32,
    retries: u32,
    deadline: Option<Instant>,
}

impl RetryWatchdog {
    pub fn new(timeout: Duration, max_retries: u32) -> Self {
        Self {
            timeout,
            max_retries,
            retries: 0,
            deadline: None,
        }
    }

    /// Start, or restart from zero, the timeout window.
    pub fn arm(&mut self) {
        self.deadline = Some(Instant::now() + self.timeout);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Resolves when the armed deadline passes. Never resolves while disarmed.
    pub async fn expired(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    /// Account for a fired deadline. Disarms; the caller re-arms after renegotiating.
    pub fn on_timeout(&mut self) -> WatchdogVerdict {
        self.deadline = None;
        if self.retries < self.max_retries {
            self.retries += 1;
        }
        if self.retries >= self.max_retries {
            WatchdogVerdict::Exhausted {
                attempts: self.retries,
            }
        } else {
            WatchdogVerdict::Retry {
                attempt: self.retries,
            }
        }
    }
}
