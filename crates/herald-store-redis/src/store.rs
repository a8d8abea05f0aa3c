//! Redis implementation of the [`StateStore`] capability.

use async_trait::async_trait;
use deadpool_redis::Pool;
use futures_util::StreamExt;
use redis::AsyncCommands;
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use herald_store::{MessageStream, StateStore, StoreError};

use crate::config::RedisConfig;

/// SCAN batch size; bounds the work per round-trip so a pattern
/// invalidation never turns into a blocking full-keyspace sweep.
const SCAN_COUNT: usize = 100;

/// Compare-and-delete: release a lease only if the stored owner token
/// still matches.
static DELETE_IF_MATCH: LazyLock<redis::Script> = LazyLock::new(|| {
    redis::Script::new(
        r"
        if redis.call('GET', KEYS[1]) == ARGV[1] then
            return redis.call('DEL', KEYS[1])
        end
        return 0
        ",
    )
});

/// Compare-and-swap. ARGV: expected value, new value, expected-present
/// flag ('1'/'0'), TTL in ms ('0' = no expiry).
static COMPARE_AND_SWAP: LazyLock<redis::Script> = LazyLock::new(|| {
    redis::Script::new(
        r"
        local current = redis.call('GET', KEYS[1])
        local matched
        if ARGV[3] == '1' then
            matched = current ~= false and current == ARGV[1]
        else
            matched = current == false
        end
        if not matched then
            return 0
        end
        if ARGV[4] == '0' then
            redis.call('SET', KEYS[1], ARGV[2])
        else
            redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[4])
        end
        return 1
        ",
    )
});

/// Set add with extend-only expiry. ARGV: member, TTL in ms ('0' = no
/// expiry requested). A new set gets the TTL, an existing expiry is only
/// ever extended, and a persistent set stays persistent.
static SET_ADD: LazyLock<redis::Script> = LazyLock::new(|| {
    redis::Script::new(
        r"
        local existed = redis.call('EXISTS', KEYS[1])
        redis.call('SADD', KEYS[1], ARGV[1])
        local ttl_ms = tonumber(ARGV[2])
        if ttl_ms > 0 then
            local current = redis.call('PTTL', KEYS[1])
            if existed == 0 or (current >= 0 and current < ttl_ms) then
                redis.call('PEXPIRE', KEYS[1], ttl_ms)
            end
        end
        return 1
        ",
    )
});

/// Redis-backed [`StateStore`].
///
/// Commands run on pooled connections; pub/sub subscriptions get a
/// dedicated connection built from the configured URL. Every call is
/// bounded by the configured timeout.
#[derive(Clone)]
pub struct RedisStateStore {
    pool: Pool,
    url: String,
    timeout: Duration,
}

impl RedisStateStore {
    /// Create a store over an existing pool.
    pub fn new(pool: Pool, config: &RedisConfig) -> Self {
        Self {
            pool,
            url: config.url.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    /// Create the pool and the store in one step.
    pub fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        let pool = crate::create_pool(config)?;
        Ok(Self::new(pool, config))
    }

    /// Underlying pool, for sharing with other Redis-based components.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// `true` if a connection can currently be checked out (health probe).
    pub async fn is_available(&self) -> bool {
        self.pool.get().await.is_ok()
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::pool(e.to_string()))
    }

    /// Bound `fut` by the configured per-call timeout.
    async fn run<T, F>(&self, operation: &str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(operation, timeout_ms = self.timeout.as_millis() as u64,
                    "Redis operation timed out");
                Err(StoreError::timeout(operation))
            }
        }
    }
}

fn response_err(e: redis::RedisError) -> StoreError {
    StoreError::response(e.to_string())
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.run("GET", async {
            let mut conn = self.conn().await?;
            conn.get::<_, Option<Vec<u8>>>(key)
                .await
                .map_err(response_err)
        })
        .await
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        self.run("SET", async {
            let mut conn = self.conn().await?;
            match ttl {
                Some(ttl) => conn
                    .pset_ex::<_, _, ()>(key, value, ttl.as_millis().max(1) as u64)
                    .await
                    .map_err(response_err),
                None => conn.set::<_, _, ()>(key, value).await.map_err(response_err),
            }
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.run("DEL", async {
            let mut conn = self.conn().await?;
            let removed: i64 = conn.del(key).await.map_err(response_err)?;
            Ok(removed > 0)
        })
        .await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        self.run("PTTL", async {
            let mut conn = self.conn().await?;
            let ms: i64 = conn.pttl(key).await.map_err(response_err)?;
            // -2: key absent, -1: key present without expiry.
            Ok(if ms >= 0 {
                Some(Duration::from_millis(ms as u64))
            } else {
                None
            })
        })
        .await
    }

    async fn set_nx(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.run("SET NX PX", async {
            let mut conn = self.conn().await?;
            let reply: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("NX")
                .arg("PX")
                .arg(ttl.as_millis().max(1) as u64)
                .query_async(&mut conn)
                .await
                .map_err(response_err)?;
            Ok(reply.is_some())
        })
        .await
    }

    async fn delete_if_match(&self, key: &str, expected: &[u8]) -> Result<bool, StoreError> {
        self.run("delete_if_match", async {
            let mut conn = self.conn().await?;
            let removed: i64 = DELETE_IF_MATCH
                .key(key)
                .arg(expected)
                .invoke_async(&mut conn)
                .await
                .map_err(response_err)?;
            Ok(removed > 0)
        })
        .await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        self.run("compare_and_swap", async {
            let mut conn = self.conn().await?;
            let ttl_ms = ttl.map(|t| t.as_millis().max(1) as u64).unwrap_or(0);
            let swapped: i64 = COMPARE_AND_SWAP
                .key(key)
                .arg(expected.unwrap_or_default())
                .arg(new)
                .arg(if expected.is_some() { "1" } else { "0" })
                .arg(ttl_ms.to_string())
                .invoke_async(&mut conn)
                .await
                .map_err(response_err)?;
            Ok(swapped > 0)
        })
        .await
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.run("SCAN", async {
            let mut conn = self.conn().await?;
            let mut keys = Vec::new();
            let mut cursor: u64 = 0;
            loop {
                let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(pattern)
                    .arg("COUNT")
                    .arg(SCAN_COUNT)
                    .query_async(&mut conn)
                    .await
                    .map_err(response_err)?;
                keys.extend(batch);
                cursor = next;
                if cursor == 0 {
                    break;
                }
            }
            Ok(keys)
        })
        .await
    }

    async fn set_add(
        &self,
        key: &str,
        member: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        self.run("SADD", async {
            let mut conn = self.conn().await?;
            let ttl_ms = ttl.map(|t| t.as_millis().max(1) as u64).unwrap_or(0);
            let _: i64 = SET_ADD
                .key(key)
                .arg(member)
                .arg(ttl_ms.to_string())
                .invoke_async(&mut conn)
                .await
                .map_err(response_err)?;
            Ok(())
        })
        .await
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.run("SMEMBERS", async {
            let mut conn = self.conn().await?;
            conn.smembers(key).await.map_err(response_err)
        })
        .await
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.run("SREM", async {
            let mut conn = self.conn().await?;
            conn.srem::<_, _, ()>(key, member).await.map_err(response_err)
        })
        .await
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), StoreError> {
        self.run("PUBLISH", async {
            let mut conn = self.conn().await?;
            conn.publish::<_, _, ()>(channel, payload)
                .await
                .map_err(response_err)
        })
        .await
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, StoreError> {
        // Subscriber mode needs a dedicated connection outside the pool.
        let client = redis::Client::open(self.url.as_str())
            .map_err(|e| StoreError::connection(e.to_string()))?;

        let mut pubsub = tokio::time::timeout(self.timeout, client.get_async_pubsub())
            .await
            .map_err(|_| StoreError::timeout("SUBSCRIBE"))?
            .map_err(|e| StoreError::connection(e.to_string()))?;

        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| StoreError::connection(e.to_string()))?;

        tracing::debug!(channel = %channel, "subscribed to Redis channel");

        let stream = pubsub
            .into_on_message()
            .map(|msg| msg.get_payload_bytes().to_vec());
        Ok(Box::pin(stream))
    }
}
