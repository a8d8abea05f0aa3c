//! Redis connection configuration.

use serde::Deserialize;

/// Configuration for the Redis-backed state store.
///
/// Supplied at construction and never mutated afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Connection URL, e.g. `redis://127.0.0.1:6379`.
    pub url: String,
    /// Maximum pooled connections.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Bounded timeout applied to every store call, in milliseconds.
    ///
    /// The admission-control path must never block callers longer than
    /// this; 50-200 ms is the sensible range for a low-latency store.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_pool_size() -> usize {
    16
}

fn default_timeout_ms() -> u64 {
    150
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            pool_size: default_pool_size(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_partial_config() {
        let config: RedisConfig =
            serde_json::from_str(r#"{"url": "redis://cache:6379"}"#).unwrap();
        assert_eq!(config.url, "redis://cache:6379");
        assert_eq!(config.pool_size, 16);
        assert_eq!(config.timeout_ms, 150);
    }
}
