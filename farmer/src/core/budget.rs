//! Wall-clock budgets for bounded poll loops.
//!
//! Budgets take the current instant as an argument so that callers can drive
//! them from an injected clock.

use std::time::{Duration, Instant};

/// A point in time after which a poll loop must give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    expires_at: Instant,
}

impl Deadline {
    pub fn after(now: Instant, budget: Duration) -> Self {
        Self {
            expires_at: now + budget,
        }
    }

    /// Remaining time, saturating at zero.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at
            .checked_duration_since(now)
            .unwrap_or(Duration::from_secs(0))
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.remaining(now).is_zero()
    }

    /// Sleep interval for the next poll: `interval`, cut short at the deadline.
    pub fn next_wait(&self, now: Instant, interval: Duration) -> Duration {
        interval.min(self.remaining(now))
    }
}
