use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};

/// Bounded exponential backoff.
///
/// `max_attempts` counts the first delivery, so a policy with three
/// attempts calls the handler at most three times. The delay before
/// attempt `n + 1` is `base_delay * multiplier^(n - 1)`, capped at
/// `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            multiplier,
            max_delay,
        }
    }

    /// Policy used by the order and payment consumers.
    pub fn three_attempts() -> Self {
        Self::new(3, Duration::from_secs(1), 2.0, Duration::from_secs(10))
    }

    /// Policy used by the inventory consumers.
    pub fn four_attempts() -> Self {
        Self::new(4, Duration::from_secs(1), 2.0, Duration::from_secs(10))
    }

    /// Single attempt, no waiting.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, 1.0, Duration::ZERO)
    }

    /// Returns a copy with a different base and cap.
    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Backoff builder without jitter; yields one delay per retry.
    pub fn builder(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_factor(self.multiplier as f32)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
    }

    /// Fresh delay schedule for one message.
    pub fn backoff(&self) -> ExponentialBackoff {
        self.builder().build()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::three_attempts()
    }
}
