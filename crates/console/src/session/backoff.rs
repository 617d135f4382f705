//! Reconnect backoff policy.

use std::time::Duration;

/// Default delay before the first reconnect attempt.
pub const INITIAL_BACKOFF_MS: u64 = 2_000;
/// Ceiling for the reconnect delay.
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Backoff state for unexpected disconnects.
///
/// The delay starts at the seed, doubles after every scheduled reconnect and
/// saturates at the cap. Both the delay and the attempt counter go back to
/// their seed values on [`reset`](Self::reset).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    initial: Duration,
    max: Duration,
    delay: Duration,
    attempt: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(INITIAL_BACKOFF_MS),
            Duration::from_millis(MAX_BACKOFF_MS),
        )
    }
}

impl ReconnectPolicy {
    /// Creates a policy with the given seed delay and cap.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            delay: initial,
            attempt: 0,
        }
    }

    /// Current delay, i.e. the one the next reconnect will wait for.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Number of consecutive unexpected disconnects since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns whether a reconnect is in progress (at least one failure recorded).
    pub fn is_reconnecting(&self) -> bool {
        self.attempt > 0
    }

    /// Records an unexpected disconnect.
    ///
    /// Returns the attempt number and the delay to wait before reconnecting,
    /// then doubles the stored delay up to the cap.
    pub fn record_failure(&mut self) -> (u32, Duration) {
        self.attempt = self.attempt.saturating_add(1);
        let delay = self.delay;
        self.delay = std::cmp::min(delay.saturating_mul(2), self.max);
        (self.attempt, delay)
    }

    /// Returns the policy to its seed values.
    pub fn reset(&mut self) {
        self.delay = self.initial;
        self.attempt = 0;
    }
}
