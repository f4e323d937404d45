//! Per-operation deadline and cancellation
//!
//! Every blocking wait in the core goes through [`OpContext`]: pessimistic
//! lock acquisition, the simulated critical-section work, probe pauses and
//! the hold of a long-running update. Waits are sliced so a cancelled token
//! is noticed within [`POLL_INTERVAL`].

use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upper bound on a single blocking slice
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Cloneable cancellation flag shared between a caller and an operation
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// New, not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Deadline and cancellation for one operation
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    deadline: Option<Instant>,
    cancel: CancelToken,
}

impl OpContext {
    /// No deadline, never cancelled unless the token is
    pub fn background() -> Self {
        Self::default()
    }

    /// Deadline `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().deadline(Instant::now() + timeout)
    }

    /// Replace the deadline
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Attach a cancellation token
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Same token, deadline tightened to at most `timeout` from now
    pub fn bounded(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        Self {
            deadline: Some(self.deadline.map_or(candidate, |d| d.min(candidate))),
            cancel: self.cancel.clone(),
        }
    }

    /// Deadline, if any
    pub fn deadline_at(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline (`None` = unbounded)
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fail if cancelled or past the deadline
    pub fn check(&self, what: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled(what.to_string()));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::DeadlineExceeded(what.to_string()));
            }
        }
        Ok(())
    }

    /// Blocking sleep that honours cancellation and the deadline
    pub fn sleep(&self, duration: Duration, what: &str) -> Result<()> {
        let until = Instant::now() + duration;
        loop {
            self.check(what)?;
            let now = Instant::now();
            if now >= until {
                return Ok(());
            }
            let mut slice = (until - now).min(POLL_INTERVAL);
            if let Some(left) = self.remaining() {
                if left.is_zero() {
                    return Err(Error::DeadlineExceeded(what.to_string()));
                }
                slice = slice.min(left);
            }
            std::thread::sleep(slice);
        }
    }

    /// Length of the next wait slice when polling for a resource
    pub(crate) fn next_slice(&self) -> Duration {
        match self.remaining() {
            Some(left) => left.min(POLL_INTERVAL),
            None => POLL_INTERVAL,
        }
    }
}
