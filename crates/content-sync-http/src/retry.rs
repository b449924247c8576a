use std::time::Duration;

/// Bounded retry schedule for a whole download operation.
///
/// The delay grows linearly with the attempt number and is capped at
/// `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay
            .checked_mul(attempt)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// True if another attempt is allowed after `attempt` failed.
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
