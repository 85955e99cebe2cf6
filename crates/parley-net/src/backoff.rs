//! Exponential backoff schedule for reconnection.
//!
//! Kept as a standalone value type so the delay sequence is testable without
//! touching a socket.

use std::time::Duration;

use parley_shared::constants::{
    MAX_RECONNECT_ATTEMPTS, RECONNECT_BASE_DELAY, RECONNECT_MAX_DELAY,
};

/// Tunables for the reconnect schedule.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub base: Duration,
    /// Ceiling for the doubled delay.
    pub max_delay: Duration,
    /// Retries before giving up.
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: RECONNECT_BASE_DELAY,
            max_delay: RECONNECT_MAX_DELAY,
            max_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// One reconnection episode: doubling delays from `base`, capped at
/// `max_delay`, exhausted after `max_attempts`.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay to wait before the next attempt, or `None` once the schedule is
    /// exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.config.max_attempts {
            return None;
        }
        let factor = 1u32 << self.attempt.min(31);
        let delay = self
            .config
            .base
            .checked_mul(factor)
            .unwrap_or(self.config.max_delay)
            .min(self.config.max_delay);
        self.attempt += 1;
        Some(delay)
    }

    /// Number of the attempt the most recent delay belongs to (1-based).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_doubles_then_exhausts() {
        let mut backoff = Backoff::new(BackoffConfig::default());

        let delays: Vec<u64> = std::iter::from_fn(|| backoff.next_delay())
            .map(|d| d.as_secs())
            .collect();

        assert_eq!(delays, vec![1, 2, 4, 8, 16]);
        // The schedule is spent: a further failure is terminal.
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn delay_is_capped() {
        let mut backoff = Backoff::new(BackoffConfig {
            base: Duration::from_secs(10),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        });

        let delays: Vec<u64> = std::iter::from_fn(|| backoff.next_delay())
            .map(|d| d.as_secs())
            .collect();

        assert_eq!(delays, vec![10, 20, 30, 30, 30]);
    }

    #[test]
    fn attempt_counter_tracks_delays() {
        let mut backoff = Backoff::new(BackoffConfig::default());
        assert_eq!(backoff.attempt(), 0);
        backoff.next_delay();
        assert_eq!(backoff.attempt(), 1);
        backoff.next_delay();
        assert_eq!(backoff.attempt(), 2);
    }
}
