//! Reconnection backoff policy.

use std::time::Duration;

use aq_core::config::RealtimeConfig;

/// Exponential backoff: attempt `n` waits `base * 2^n`, for at most
/// `max_attempts` attempts after an unclean close.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    /// Delay before the first reconnection attempt.
    pub base: Duration,
    /// Attempts allowed before the channel gives up.
    pub max_attempts: u32,
    /// Jitter (0.0 to 1.0) applied symmetrically around each delay.
    pub jitter_factor: f64,
}

impl Backoff {
    pub fn from_config(config: &RealtimeConfig) -> Self {
        Self {
            base: config.reconnect_delay(),
            max_attempts: config.reconnect_attempts,
            jitter_factor: config.jitter_factor,
        }
    }

    /// Delay before attempt `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let exponential = self.base.saturating_mul(factor);
        if self.jitter_factor <= 0.0 {
            return exponential;
        }

        let secs = exponential.as_secs_f64();
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * secs * self.jitter_factor;
        Duration::from_secs_f64((secs + jitter).max(0.0))
    }

    /// Delay for the next attempt, or `None` once `attempts_made` reaches the cap.
    pub fn next_delay(&self, attempts_made: u32) -> Option<Duration> {
        (attempts_made < self.max_attempts).then(|| self.delay(attempts_made))
    }
}
