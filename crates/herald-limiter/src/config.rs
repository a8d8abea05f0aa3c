//! Rate limiter configuration.

use serde::Deserialize;

use crate::error::LimitError;

/// Configuration for a [`RateLimiter`](crate::RateLimiter).
///
/// Supplied at construction and never mutated afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimiterConfig {
    /// Steady-state bucket capacity in tokens.
    pub capacity: f64,
    /// Refill rate in tokens per second.
    pub refill_rate: f64,
    /// Burst headroom factor; the bucket holds up to
    /// `capacity * burst_multiplier` tokens. Must be >= 1.
    #[serde(default = "default_burst_multiplier")]
    pub burst_multiplier: f64,
    /// Namespace prefix for bucket keys in the shared store.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Upper bound on the store call; past it the limiter fails open.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

fn default_burst_multiplier() -> f64 {
    1.0
}

fn default_key_prefix() -> String {
    "ratelimit".to_string()
}

fn default_store_timeout_ms() -> u64 {
    150
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 100.0,
            refill_rate: 10.0,
            burst_multiplier: default_burst_multiplier(),
            key_prefix: default_key_prefix(),
            store_timeout_ms: default_store_timeout_ms(),
        }
    }
}

impl RateLimiterConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), LimitError> {
        if !(self.capacity > 0.0) {
            return Err(LimitError::invalid_config("capacity must be positive"));
        }
        if !(self.refill_rate > 0.0) {
            return Err(LimitError::invalid_config("refill_rate must be positive"));
        }
        if !(self.burst_multiplier >= 1.0) {
            return Err(LimitError::invalid_config(
                "burst_multiplier must be at least 1.0",
            ));
        }
        if self.key_prefix.is_empty() {
            return Err(LimitError::invalid_config("key_prefix must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RateLimiterConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = RateLimiterConfig::default();
        config.capacity = 0.0;
        assert!(config.validate().is_err());

        let mut config = RateLimiterConfig::default();
        config.refill_rate = -1.0;
        assert!(config.validate().is_err());

        let mut config = RateLimiterConfig::default();
        config.burst_multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = RateLimiterConfig::default();
        config.key_prefix = String::new();
        assert!(config.validate().is_err());
    }
}
