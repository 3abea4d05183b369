//! Retry delay calculation with exponential backoff and jitter.
//!
//! [`BackoffConfig`] controls how transient model-call failures (429, 5xx,
//! transport errors, malformed output) are retried with increasing delays.

use std::time::Duration;

/// Configuration for retry delays.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Initial delay before the first retry. Default: 1 second.
    pub initial_delay: Duration,

    /// Multiplier applied after each retry. Default: 2.0.
    /// Delay grows: initial, initial * multiplier, initial * multiplier^2, ...
    pub multiplier: f64,

    /// Maximum delay between retries. Default: 60 seconds.
    pub max_delay: Duration,

    /// Random jitter added on top of the capped delay, in [0, jitter_max).
    /// Default: 1 second. Set to zero for deterministic delays in tests.
    pub jitter_max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter_max: Duration::from_secs(1),
        }
    }
}

impl BackoffConfig {
    /// No jitter, for deterministic tests.
    pub fn without_jitter() -> Self {
        Self {
            jitter_max: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Calculate the delay for attempt N (0-indexed).
    ///
    /// The base delay is `initial_delay * multiplier^attempt`, capped at
    /// `max_delay`, plus a uniform random jitter in [0, jitter_max).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        let jitter = fastrand::f64() * self.jitter_max.as_secs_f64();
        Duration::from_secs_f64(capped + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_exponential_without_jitter() {
        let config = BackoffConfig::without_jitter();
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let config = BackoffConfig {
            max_delay: Duration::from_secs(5),
            jitter_max: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let config = BackoffConfig::default();
        for _ in 0..100 {
            let d = config.delay_for_attempt(0);
            assert!(d >= Duration::from_secs(1), "delay {:?} < base", d);
            assert!(d < Duration::from_secs(2), "delay {:?} >= base + jitter_max", d);
        }
    }
}
