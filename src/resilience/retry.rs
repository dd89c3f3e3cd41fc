// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Exponential backoff policy for failed deliveries.
//!
//! # Example
//!
//! ```
//! use event_sync_engine::RetryConfig;
//! use std::time::Duration;
//!
//! let config = RetryConfig::default();
//! assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
//! assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
//! assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
//! assert_eq!(config.delay_for_attempt(30), Duration::from_secs(60)); // capped
//! ```

use std::time::Duration;

use crate::config::SyncConfig;

/// Upper bound on any single retry delay, whatever the config says.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Backoff parameters: `delay = min(initial_delay * factor^attempt, max_delay)`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            factor: 2.0,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn from_sync_config(config: &SyncConfig) -> Self {
        Self {
            initial_delay: seconds(config.initial_retry_delay_secs),
            max_delay: seconds(config.max_retry_delay_secs),
            factor: config.retry_backoff_multiplier,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }

    /// Delay before retry number `attempt` (zero-based). Never more than
    /// [`MAX_RETRY_DELAY`].
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let cap = self.max_delay.min(MAX_RETRY_DELAY);
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.factor.powi(exponent);
        match Duration::try_from_secs_f64(secs) {
            Ok(delay) if delay < cap => delay,
            _ => cap,
        }
    }
}

/// Out-of-range or non-finite values clamp instead of panicking.
fn seconds(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).map_or(MAX_RETRY_DELAY, |d| d.min(MAX_RETRY_DELAY))
}
