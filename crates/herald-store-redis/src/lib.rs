//! # herald-store-redis
//!
//! Redis implementation of the Herald state store capabilities.
//!
//! - [`RedisStateStore`]: [`herald_store::StateStore`] over a
//!   `deadpool-redis` pool. Every call is wrapped in a bounded timeout;
//!   an elapsed timeout surfaces as [`herald_store::StoreError::Timeout`]
//!   and is absorbed by the components above (fail-open, fall-through).
//! - [`RedisBucketStore`]: [`herald_store::AtomicBucketStore`] using a
//!   server-side Lua script, so the refill-and-consume sequence runs
//!   indivisibly inside Redis. Backends without scripting can use
//!   [`herald_store::CasBucketStore`] over [`RedisStateStore`] instead.
//!
//! Pub/sub subscriptions use a dedicated connection (pooled connections
//! cannot enter subscriber mode), created from the configured URL.

mod bucket;
mod config;
mod store;

pub use bucket::RedisBucketStore;
pub use config::RedisConfig;
pub use store::RedisStateStore;

use deadpool_redis::Pool;
use herald_store::StoreError;

/// Create a Redis connection pool from configuration.
///
/// The pool applies the configured timeout to connection acquisition;
/// per-command timeouts are enforced by the store wrapper itself.
pub fn create_pool(config: &RedisConfig) -> Result<Pool, StoreError> {
    use std::time::Duration;

    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    let mut pool_config = redis_config.get_pool_config();
    pool_config.max_size = config.pool_size;
    pool_config.timeouts.wait = Some(Duration::from_millis(config.timeout_ms));
    pool_config.timeouts.create = Some(Duration::from_millis(config.timeout_ms));
    pool_config.timeouts.recycle = Some(Duration::from_millis(config.timeout_ms));
    redis_config.pool = Some(pool_config);

    redis_config
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .map_err(|e| StoreError::pool(e.to_string()))
}
