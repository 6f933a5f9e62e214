// gpsd-stream - Resilient gpsd JSON client
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Reconnect backoff
//!
//! Capped exponential backoff with no retry limit. The delay starts at the
//! configured minimum, doubles after every failure and never exceeds the
//! maximum. A successful stream puts it back to the minimum.

use std::time::Duration;

use crate::error::ConfigError;

/// Backoff configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// First delay after a failure
    pub min_delay: Duration,
    /// Ceiling for the delay
    pub max_delay: Duration,
    /// Growth factor per consecutive failure
    pub multiplier: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(300),
            multiplier: 2,
        }
    }
}

impl BackoffConfig {
    /// Create a doubling configuration
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay,
            ..Default::default()
        }
    }

    /// Check the invariant `0 < min_delay <= max_delay`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_delay.is_zero() {
            return Err(ConfigError::Invalid(
                "retry delay must be greater than zero".to_string(),
            ));
        }
        if self.min_delay > self.max_delay {
            return Err(ConfigError::Invalid(format!(
                "retry delay {:?} exceeds maximum retry delay {:?}",
                self.min_delay, self.max_delay
            )));
        }
        if self.multiplier < 1 {
            return Err(ConfigError::Invalid(
                "backoff multiplier must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Retry state owned by the reconnect supervisor
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
    failures: u32,
}

impl Backoff {
    /// Create a backoff starting at the minimum delay
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            current: config.min_delay,
            failures: 0,
            config,
        }
    }

    /// Record a failure and return how long to wait before the next attempt
    ///
    /// The returned delay is the current one; the stored delay then grows
    /// for the following failure.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.failures = self.failures.saturating_add(1);
        self.current = self
            .current
            .saturating_mul(self.config.multiplier)
            .min(self.config.max_delay)
            .max(self.config.min_delay);
        delay
    }

    /// Delay the next failure will wait
    pub fn current_delay(&self) -> Duration {
        self.current
    }

    /// Consecutive failures since the last reset
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Back to the minimum delay after a successful stream
    pub fn reset(&mut self) {
        self.current = self.config.min_delay;
        self.failures = 0;
    }

    /// Configuration in use
    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_doubling_sequence() {
        let mut backoff = Backoff::new(BackoffConfig::new(secs(10), secs(300)));
        assert_eq!(backoff.next_delay(), secs(10));
        assert_eq!(backoff.next_delay(), secs(20));
        assert_eq!(backoff.next_delay(), secs(40));
        assert_eq!(backoff.failures(), 3);
        assert_eq!(backoff.current_delay(), secs(80));
    }

    #[test]
    fn test_capped_at_maximum() {
        let mut backoff = Backoff::new(BackoffConfig::new(secs(10), secs(300)));
        let delays: Vec<_> = (0..8).map(|_| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            vec![
                secs(10),
                secs(20),
                secs(40),
                secs(80),
                secs(160),
                secs(300),
                secs(300),
                secs(300)
            ]
        );
    }

    #[test]
    fn test_reset_returns_to_minimum() {
        let mut backoff = Backoff::new(BackoffConfig::new(secs(10), secs(300)));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.failures(), 0);
        assert_eq!(backoff.next_delay(), secs(10));
    }

    #[test]
    fn test_delay_stays_within_bounds() {
        let config = BackoffConfig::new(Duration::from_millis(7), Duration::from_millis(50));
        let mut backoff = Backoff::new(config);
        for _ in 0..100 {
            let delay = backoff.next_delay();
            assert!(delay >= config.min_delay && delay <= config.max_delay);
        }
    }

    #[test]
    fn test_validate() {
        assert!(BackoffConfig::default().validate().is_ok());
        assert!(BackoffConfig::new(secs(0), secs(1)).validate().is_err());
        assert!(BackoffConfig::new(secs(10), secs(5)).validate().is_err());
        assert!(BackoffConfig::new(secs(5), secs(5)).validate().is_ok());
    }
}
