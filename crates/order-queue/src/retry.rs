//! # Retry Policy Module
//!
//! Backoff between attempts of a transient receive failure.
//!
//! The polling receiver waits `base * attempt` after each failed attempt, so
//! the default policy pauses 100ms and then 200ms before giving up after the
//! third attempt.

use std::time::Duration;

/// Retry policy configuration
///
/// # Examples
///
/// ```rust
/// use order_queue::retry::RetryPolicy;
/// use std::time::Duration;
///
/// // Three attempts in total, waiting 100ms then 200ms between them
/// let policy = RetryPolicy::new(3, Duration::from_millis(100));
/// assert_eq!(policy.calculate_delay(1), Duration::from_millis(100));
/// assert_eq!(policy.calculate_delay(2), Duration::from_millis(200));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Delay unit for the linear schedule
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay to wait after the given attempt failed
    ///
    /// # Arguments
    ///
    /// * `attempt` - Number of the attempt that just failed (1-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt.max(1))
    }

    /// Check whether another attempt may follow the given one
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// State tracker for one retried operation
#[derive(Debug, Clone)]
pub struct RetryState {
    /// Attempts made so far
    pub attempt: u32,
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryState {
    /// Create state for an operation that has not been attempted yet
    pub fn new() -> Self {
        Self { attempt: 0 }
    }

    /// Record the start of the next attempt and return its number
    pub fn next_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    /// Delay to wait after the current attempt failed
    pub fn get_delay(&self, policy: &RetryPolicy) -> Duration {
        policy.calculate_delay(self.attempt)
    }

    /// Check whether another attempt is allowed
    pub fn can_retry(&self, policy: &RetryPolicy) -> bool {
        policy.should_retry(self.attempt)
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
