//! Incremental reconnection backoff.
//!
//! Delay after attempt *n* (1-indexed) is
//! `base * min((n + 2) / 3, MAX_BACKOFF_COEFFICIENT)`, scaled by a random
//! jitter coefficient and clamped to a floor/ceiling.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::core::{MAX_BACKOFF_COEFFICIENT, RETRY_JITTER};

/// Backoff multiplier for the given attempt number.
pub fn backoff_coefficient(attempt: u32) -> f64 {
    let attempt = attempt.max(1) as f64;
    ((attempt + 2.0) / 3.0).min(MAX_BACKOFF_COEFFICIENT)
}

/// Random coefficient in `[1 - RETRY_JITTER, 1 + RETRY_JITTER]`.
pub fn jitter_coefficient() -> f64 {
    rand::thread_rng().gen_range((1.0 - RETRY_JITTER)..=(1.0 + RETRY_JITTER))
}

/// Retry delay for `attempt`, with `jitter` applied, clamped to
/// `[floor, ceiling]`.
pub fn retry_delay(
    base: Duration,
    attempt: u32,
    jitter: f64,
    floor: Duration,
    ceiling: Duration,
) -> Duration {
    let delay = base.mul_f64(backoff_coefficient(attempt) * jitter);
    delay.clamp(floor, ceiling.max(floor))
}

/// Per-episode retry bookkeeping.
///
/// An episode starts with the first attempt after the connection was lost
/// (or first requested) and ends when the connection is established.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    episode_started: Option<Instant>,
    attempts: u32,
}

impl RetryState {
    /// Create an empty retry state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection attempt made at `now`. Returns the attempt number.
    pub fn record_attempt(&mut self, now: Instant) -> u32 {
        self.episode_started.get_or_insert(now);
        self.attempts = self.attempts.saturating_add(1);
        self.attempts
    }

    /// When the current episode started.
    pub fn episode_started(&self) -> Option<Instant> {
        self.episode_started
    }

    /// Attempts made in the current episode.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// End the episode.
    pub fn reset(&mut self) {
        self.episode_started = None;
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLOOR: Duration = Duration::from_secs(1);
    const CEILING: Duration = Duration::from_secs(60);

    #[test]
    fn test_coefficient_schedule() {
        assert_eq!(backoff_coefficient(1), 1.0);
        assert!((backoff_coefficient(2) - 4.0 / 3.0).abs() < 1e-9);
        assert!((backoff_coefficient(3) - 5.0 / 3.0).abs() < 1e-9);
        assert_eq!(backoff_coefficient(4), 2.0);
        assert_eq!(backoff_coefficient(100), 2.0);
    }

    #[test]
    fn test_retry_delay_without_jitter() {
        let base = Duration::from_secs(15);
        assert_eq!(retry_delay(base, 1, 1.0, FLOOR, CEILING), Duration::from_secs(15));
        assert_eq!(retry_delay(base, 4, 1.0, FLOOR, CEILING), Duration::from_secs(30));
        assert_eq!(retry_delay(base, 9, 1.0, FLOOR, CEILING), Duration::from_secs(30));
    }

    #[test]
    fn test_retry_delay_clamped() {
        let tiny = Duration::from_millis(10);
        assert_eq!(retry_delay(tiny, 1, 1.0, FLOOR, CEILING), FLOOR);

        let huge = Duration::from_secs(600);
        assert_eq!(retry_delay(huge, 4, 1.2, FLOOR, CEILING), CEILING);
    }

    #[test]
    fn test_jitter_bounds() {
        for _ in 0..1000 {
            let jitter = jitter_coefficient();
            assert!((0.8..=1.2).contains(&jitter), "jitter {} out of range", jitter);
        }
    }

    #[test]
    fn test_retry_state_episode() {
        let start = Instant::now();
        let mut retry = RetryState::new();

        assert_eq!(retry.record_attempt(start), 1);
        assert_eq!(retry.record_attempt(start + Duration::from_secs(5)), 2);
        assert_eq!(retry.episode_started(), Some(start));

        retry.reset();
        assert_eq!(retry.attempts(), 0);
        assert_eq!(retry.episode_started(), None);
    }
}
