//! # Fibonacci Backoff
//!
//! Per-parent retry delays for reconcile errors that need more than a short
//! requeue. Delays grow along the Fibonacci sequence in minutes
//! (1m, 1m, 2m, 3m, 5m, 8m, ...) and are capped at the maximum.

use std::time::Duration;

/// Fibonacci backoff measured in minutes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FibonacciBackoff {
    min_minutes: u64,
    max_minutes: u64,
    previous: u64,
    current: u64,
}

impl FibonacciBackoff {
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        let min_minutes = min_minutes.max(1);
        Self {
            min_minutes,
            max_minutes: max_minutes.max(min_minutes),
            previous: 0,
            current: min_minutes,
        }
    }

    /// Return the next delay in seconds and advance the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let minutes = self.current.min(self.max_minutes);
        if self.current < self.max_minutes {
            let next = self.previous + self.current;
            self.previous = self.current;
            self.current = next;
        }
        minutes * 60
    }

    /// Start over from the minimum delay
    pub fn reset(&mut self) {
        self.previous = 0;
        self.current = self.min_minutes;
    }

    /// Delay for the `error_count`-th consecutive error (1-based)
    pub fn calculate_for_error_count(
        error_count: u32,
        min_minutes: u64,
        max_minutes: u64,
    ) -> Duration {
        let mut backoff = Self::new(min_minutes, max_minutes);
        let mut seconds = backoff.next_backoff_seconds();
        for _ in 1..error_count {
            seconds = backoff.next_backoff_seconds();
        }
        Duration::from_secs(seconds)
    }
}
