//! # Exponential Backoff
//!
//! Retry delays for list and watch failures inside the reconciliation loop.
//!
//! The delay starts at `start`, doubles after every failure and is capped at `max`.
//! A successful list or a received watch event calls [`ExponentialBackoff::reset`].
//! An optional attempt ceiling turns an endless transient failure into a hard error.
//!
//! ## Usage
//!
//! ```rust
//! use k8s_file_sidecar::controller::backoff::ExponentialBackoff;
//! use std::time::Duration;
//!
//! let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(4), None);
//! assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(1)));
//! assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(2)));
//! assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(4)));
//! assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(4)));
//! ```

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    start: Duration,
    max: Duration,
    current: Duration,
    /// Consecutive failures since the last reset
    attempts: u32,
    /// Give up after this many consecutive failures, `None` retries forever
    max_attempts: Option<u32>,
}

impl ExponentialBackoff {
    #[must_use]
    pub fn new(start: Duration, max: Duration, max_attempts: Option<u32>) -> Self {
        let max = max.max(start);
        Self {
            start,
            max,
            current: start,
            attempts: 0,
            max_attempts,
        }
    }

    /// Record a failure and return the delay before the next attempt.
    ///
    /// Returns `None` once the attempt ceiling has been reached.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        self.attempts = self.attempts.saturating_add(1);
        if self.max_attempts.is_some_and(|limit| self.attempts > limit) {
            return None;
        }
        Some(self.advance())
    }

    /// Record an attempt and return the next delay, ignoring any attempt ceiling
    pub fn next_delay(&mut self) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        self.advance()
    }

    fn advance(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Consecutive failures recorded since the last reset
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.current = self.start;
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_sequence() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(1000), Duration::from_millis(30_000), None);

        // 1s, 2s, 4s, 8s, 16s, 30s (max)
        let expected = [1000, 2000, 4000, 8000, 16_000, 30_000, 30_000];
        for ms in expected {
            assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(ms)));
        }
        assert_eq!(backoff.attempts(), 7);
    }

    #[test]
    fn test_exponential_backoff_reset() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_millis(1000), None);

        backoff.next_backoff();
        backoff.next_backoff();
        backoff.next_backoff();
        backoff.reset();

        // Should restart from beginning after success
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(200)));
    }

    #[test]
    fn test_exponential_backoff_attempt_ceiling() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(10), Duration::from_millis(100), Some(2));

        assert!(backoff.next_backoff().is_some());
        assert!(backoff.next_backoff().is_some());
        assert_eq!(backoff.next_backoff(), None);

        backoff.reset();
        assert!(backoff.next_backoff().is_some());
    }

    #[test]
    fn test_next_delay_ignores_ceiling() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(10), Duration::from_millis(30), Some(1));

        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
        assert_eq!(backoff.next_delay(), Duration::from_millis(20));
        assert_eq!(backoff.next_delay(), Duration::from_millis(30));
        assert_eq!(backoff.next_backoff(), None);
    }

    #[test]
    fn test_max_below_start_is_raised() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_secs(5), Duration::from_secs(1), None);
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(5)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(5)));
    }
}
