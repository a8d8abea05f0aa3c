//! Cache-aside strategy: reads populate the cache on demand.

use serde::{Serialize, de::DeserializeOwned};
use std::future::Future;

use crate::backend::CacheStore;
use crate::entry::{CacheEntry, CacheOptions};
use crate::error::{BoxError, CacheError};
use crate::stampede::StampedeGuard;

/// Cache-aside with single-flight miss handling.
///
/// `get` returns the cached value when present; on a miss the loader
/// runs under stampede protection and its result is stored with the
/// requested TTL and tags. `set` and `delete` bypass the loader.
///
/// A store outage never fails a read: the loader is invoked directly
/// (coordination included in the outage) and the miss is absorbed as
/// extra latency.
#[derive(Clone)]
pub struct CacheAside {
    store: CacheStore,
    stampede: StampedeGuard,
}

impl CacheAside {
    pub fn new(store: CacheStore, stampede: StampedeGuard) -> Self {
        Self { store, stampede }
    }

    /// Read `key`, loading and caching it on a miss.
    pub async fn get<T, F, Fut>(
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
        match self.store.get(key).await {
            Ok(Some(entry)) => entry.decode_payload(),
            Ok(None) => self.stampede.load_through(key, opts, loader).await,
            Err(e) => {
                // The store (and with it the coordination layer) is out;
                // fall through to the loader directly.
                tracing::warn!(key = %key, error = %e,
                    "cache read failed, falling through to loader");
                loader().await.map_err(|e| CacheError::loader(key, e))
            }
        }
    }

    /// Read `key` like [`get`](Self::get), additionally kicking off one
    /// background refresh when the entry's remaining TTL fraction drops
    /// below `refresh_threshold` — the current read still returns the
    /// soon-to-expire value immediately.
    pub async fn get_with_refresh<T, F, Fut>(
        &self,
        key: &str,
        opts: &CacheOptions,
        refresh_threshold: f64,
        loader: F,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        match self.store.get(key).await {
            Ok(Some(entry)) => {
                let remaining = self.store.remaining_ttl(key).await.unwrap_or(None);
                if let Some(remaining) = remaining {
                    let fraction = remaining.as_secs_f64() / opts.ttl.as_secs_f64().max(f64::MIN_POSITIVE);
                    if fraction < refresh_threshold {
                        self.stampede.spawn_refresh(key, opts, loader);
                    }
                }
                entry.decode_payload()
            }
            Ok(None) => self.stampede.load_through(key, opts, loader).await,
            Err(e) => {
                tracing::warn!(key = %key, error = %e,
                    "cache read failed, falling through to loader");
                loader().await.map_err(|e| CacheError::loader(key, e))
            }
        }
    }

    /// Store a value directly, bypassing any loader.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        opts: &CacheOptions,
    ) -> Result<(), CacheError> {
        let entry = CacheEntry::new(value, opts)?;
        self.store.set(key, entry, opts.ttl).await
    }

    /// Remove a key. Returns `true` if a live entry was removed.
    pub async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.store.delete(key).await
    }
}
