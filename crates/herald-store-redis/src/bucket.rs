//! Server-side scripted token bucket.
//!
//! The whole refill-and-consume sequence runs as one Lua script, so two
//! concurrent checks for the same identifier are strictly serialized by
//! Redis itself. The bucket lives in a hash `{tokens, refreshed_at}`
//! with a PEXPIRE equal to the full-refill time, so idle identifiers
//! self-expire.

use async_trait::async_trait;
use deadpool_redis::Pool;
use std::sync::LazyLock;
use std::time::Duration;

use herald_store::{AtomicBucketStore, BucketParams, BucketSnapshot, StoreError};

use crate::config::RedisConfig;

/// ARGV: refill rate (tokens/sec), max tokens, now (unix ms), cost,
/// bucket TTL (ms). Returns {allowed, tokens-after} with tokens encoded
/// as a string because Lua numbers lose precision through RESP integers.
static TOKEN_BUCKET: LazyLock<redis::Script> = LazyLock::new(|| {
    redis::Script::new(
        r"
        local refill_rate = tonumber(ARGV[1])
        local max_tokens = tonumber(ARGV[2])
        local now_ms = tonumber(ARGV[3])
        local cost = tonumber(ARGV[4])
        local ttl_ms = tonumber(ARGV[5])

        local state = redis.call('HMGET', KEYS[1], 'tokens', 'refreshed_at')
        local tokens = tonumber(state[1])
        local refreshed_at = tonumber(state[2])

        if tokens == nil or refreshed_at == nil then
            tokens = max_tokens
            refreshed_at = now_ms
        end

        local elapsed_ms = now_ms - refreshed_at
        if elapsed_ms > 0 then
            tokens = math.min(max_tokens, tokens + (elapsed_ms / 1000.0) * refill_rate)
        end

        local allowed = 0
        if tokens >= cost then
            tokens = tokens - cost
            allowed = 1
        end

        redis.call('HSET', KEYS[1], 'tokens', tokens, 'refreshed_at', now_ms)
        redis.call('PEXPIRE', KEYS[1], ttl_ms)
        return {allowed, tostring(tokens)}
        ",
    )
});

/// [`AtomicBucketStore`] backed by the Lua script above.
#[derive(Clone)]
pub struct RedisBucketStore {
    pool: Pool,
    timeout: Duration,
}

impl RedisBucketStore {
    pub fn new(pool: Pool, config: &RedisConfig) -> Self {
        Self {
            pool,
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }
}

#[async_trait]
impl AtomicBucketStore for RedisBucketStore {
    async fn check_and_consume(
        &self,
        key: &str,
        params: &BucketParams,
        now_ms: i64,
        cost: f64,
    ) -> Result<BucketSnapshot, StoreError> {
        let invoke = async {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|e| StoreError::pool(e.to_string()))?;

            let (allowed, tokens): (i64, String) = TOKEN_BUCKET
                .key(key)
                .arg(params.refill_rate)
                .arg(params.max_tokens())
                .arg(now_ms)
                .arg(cost)
                .arg(params.full_refill_ttl().as_millis().max(1) as u64)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| StoreError::response(e.to_string()))?;

            let tokens: f64 = tokens
                .parse()
                .map_err(|_| StoreError::response(format!("bad bucket tokens reply: {tokens}")))?;

            Ok(BucketSnapshot {
                allowed: allowed == 1,
                tokens,
            })
        };

        match tokio::time::timeout(self.timeout, invoke).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::timeout("check_and_consume")),
        }
    }
}
