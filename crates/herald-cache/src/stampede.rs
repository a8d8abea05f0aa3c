//! Single-flight loading and proactive refresh.
//!
//! Under a miss storm, N concurrent loads for the same key collapse to
//! one loader invocation: the instance that wins the distributed lease
//! loads and populates the cache while everyone else polls for the
//! value to appear. Waiters that exhaust the bounded wait fall back to
//! loading directly — a possible duplicate load in exchange for a hard
//! latency bound, counted separately so the trade-off stays visible.

use dashmap::DashSet;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use herald_core::metrics;

use crate::backend::CacheStore;
use crate::entry::{CacheEntry, CacheOptions};
use crate::error::{BoxError, CacheError};
use crate::lease::DistributedLease;

fn lease_key(key: &str) -> String {
    format!("herald:lease:{key}")
}

/// Stampede prevention tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct StampedeConfig {
    /// Lease TTL; bounds how long a crashed loader can block waiters.
    #[serde(default = "default_lease_ttl_ms")]
    pub lease_ttl_ms: u64,
    /// How often waiters poll the cache for the holder's result.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Bounded wait before a waiter degrades to loading directly.
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

fn default_lease_ttl_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_max_wait_ms() -> u64 {
    2_000
}

impl Default for StampedeConfig {
    fn default() -> Self {
        Self {
            lease_ttl_ms: default_lease_ttl_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

/// Single-flight loader over a [`CacheStore`].
///
/// Cloning is cheap; clones share the in-flight refresh set.
#[derive(Clone)]
pub struct StampedeGuard {
    store: CacheStore,
    config: StampedeConfig,
    refreshing: Arc<DashSet<String>>,
}

impl StampedeGuard {
    pub fn new(store: CacheStore, config: StampedeConfig) -> Self {
        Self {
            store,
            config,
            refreshing: Arc::new(DashSet::new()),
        }
    }

    /// Load `key` with single-flight protection and populate the cache.
    ///
    /// Exactly one of three paths runs:
    ///
    /// 1. **Holder**: the lease was acquired — call the loader, write
    ///    the cache, release the lease, return the value. A loader
    ///    failure releases the lease immediately so waiters are not
    ///    stuck for the full lease TTL.
    /// 2. **Waiter**: the lease is held elsewhere — poll the cache up
    ///    to the bounded wait and return the value once it appears.
    /// 3. **Degraded**: the wait was exceeded, or the store itself is
    ///    unavailable for coordination — call the loader directly.
    pub async fn load_through<T, F, Fut>(
        &self,
        key: &str,
        opts: &CacheOptions,
        loader: F,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BoxError>>,
    {
        let lease_ttl = Duration::from_millis(self.config.lease_ttl_ms);
        let acquisition = DistributedLease::acquire(
            Arc::clone(self.store.state_store()),
            &lease_key(key),
            lease_ttl,
        )
        .await;

        match acquisition {
            Ok(Some(lease)) => match loader().await {
                Ok(value) => {
                    self.store_value(key, &value, opts).await;
                    if let Err(e) = lease.release().await {
                        tracing::warn!(key = %key, error = %e, "lease release failed");
                    }
                    Ok(value)
                }
                Err(e) => {
                    // Release right away so waiters fall through to their
                    // own loaders instead of burning the full lease TTL.
                    if let Err(release_err) = lease.release().await {
                        tracing::warn!(key = %key, error = %release_err,
                            "lease release failed after loader error");
                    }
                    Err(CacheError::loader(key, e))
                }
            },
            Ok(None) => self.wait_or_degrade(key, opts, loader).await,
            Err(e) => {
                // Coordination itself is unavailable; the only safe move
                // is a direct load.
                tracing::warn!(key = %key, error = %e,
                    "lease store unavailable, loading directly");
                let value = loader().await.map_err(|e| CacheError::loader(key, e))?;
                self.store_value(key, &value, opts).await;
                Ok(value)
            }
        }
    }

    /// Poll for the lease holder's result, degrading to a direct load
    /// once the bounded wait is exceeded.
    async fn wait_or_degrade<T, F, Fut>(
        &self,
        key: &str,
        opts: &CacheOptions,
        loader: F,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BoxError>>,
    {
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let deadline = Instant::now() + Duration::from_millis(self.config.max_wait_ms);

        while Instant::now() < deadline {
            tokio::time::sleep(poll_interval).await;
            match self.store.get(key).await {
                Ok(Some(entry)) => {
                    metrics::record_stampede_prevented();
                    return entry.decode_payload();
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(key = %key, error = %e, "poll read failed");
                }
            }
        }

        metrics::record_stampede_degraded();
        tracing::warn!(key = %key, max_wait_ms = self.config.max_wait_ms,
            "lease wait exceeded, loading directly (degraded path)");
        let value = loader().await.map_err(|e| CacheError::loader(key, e))?;
        self.store_value(key, &value, opts).await;
        Ok(value)
    }

    /// Spawn a background repopulation of `key`, deduplicated so that
    /// repeated reads near expiry trigger exactly one refresh.
    pub fn spawn_refresh<T, F, Fut>(&self, key: &str, opts: &CacheOptions, loader: F)
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        if !self.refreshing.insert(key.to_string()) {
            // A refresh for this key is already in flight.
            return;
        }

        metrics::record_cache_refresh();
        let guard = self.clone();
        let key = key.to_string();
        let opts = opts.clone();
        tokio::spawn(async move {
            if let Err(e) = guard.load_through::<T, _, _>(&key, &opts, loader).await {
                tracing::warn!(key = %key, error = %e, "background refresh failed");
            }
            guard.refreshing.remove(&key);
        });
    }

    /// Best-effort cache write: a store failure here costs the next
    /// reader a reload, never the current caller its value.
    async fn store_value<T: Serialize>(&self, key: &str, value: &T, opts: &CacheOptions) {
        let entry = match CacheEntry::new(value, opts) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to encode cache entry");
                return;
            }
        };
        if let Err(e) = self.store.set(key, entry, opts.ttl).await {
            tracing::warn!(key = %key, error = %e, "cache write failed after load");
        }
    }
}
