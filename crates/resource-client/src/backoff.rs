//! # Exponential Backoff
//!
//! Provides a doubling backoff for retrying transient API failures.
//!
//! Delays are tracked in milliseconds. With the default retry policy the
//! sequence is 200ms, 400ms, 800ms, 1.6s, 3.2s, 5s (max).

use std::time::Duration;

/// Exponential backoff calculator
///
/// Each backoff is twice the previous one, capped at `max_millis`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Current backoff value in milliseconds
    current_millis: u64,
    /// Maximum backoff value in milliseconds
    max_millis: u64,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with minimum and maximum delays
    ///
    /// # Arguments
    ///
    /// * `min` - First delay returned
    /// * `max` - Cap for the sequence
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        let min_millis = duration_millis(min).max(1);
        Self {
            current_millis: min_millis,
            max_millis: duration_millis(max).max(min_millis),
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current_millis;
        self.current_millis = self.current_millis.saturating_mul(2).min(self.max_millis);
        Duration::from_millis(result)
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
