//! Reconnect Backoff
//!
//! Bounded exponential backoff for re-opening a sync stream. With the
//! defaults a reconnect cycle waits 1 s, 2 s and 4 s, then gives up.

use std::time::Duration;

use rand::Rng;

/// Backoff knobs for one reconnect cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Attempts per cycle (0 = unbounded).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 3,
        }
    }
}

impl ReconnectConfig {
    /// Un-jittered delay before attempt `attempt` (one-based).
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.multiplier.powi(exponent);
        if !factor.is_finite() || factor <= 0.0 {
            return self.max_delay;
        }
        Duration::try_from_secs_f64(self.initial_delay.as_secs_f64() * factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Attempt counter for one reconnect cycle.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Start a cycle.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Claim the next attempt and return the delay to wait before it, or
    /// `None` once the cycle is spent.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempts += 1;
        Some(self.jittered(self.config.base_delay(self.attempts)))
    }

    /// Attempts claimed so far.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempts
    }

    /// Whether no attempt is left.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.config.max_attempts != 0 && self.attempts >= self.config.max_attempts
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let factor = self.config.jitter_factor;
        if factor <= 0.0 {
            return delay;
        }
        let spread = rand::rng().random_range(-factor..=factor);
        delay.mul_f64((1.0 + spread).max(0.0)).max(Duration::from_millis(1))
    }
}
