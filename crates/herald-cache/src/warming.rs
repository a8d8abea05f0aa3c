//! Cache warming: bulk pre-population with per-entry failure isolation.

use futures_util::future::{BoxFuture, join_all};
use serde::{Serialize, de::DeserializeOwned};

use crate::backend::CacheStore;
use crate::entry::{CacheEntry, CacheOptions};
use crate::error::BoxError;

/// One key to warm: where to put it and how to load it.
pub struct WarmEntry<T> {
    pub key: String,
    pub opts: CacheOptions,
    pub loader: BoxFuture<'static, Result<T, BoxError>>,
}

impl<T> WarmEntry<T> {
    pub fn new(
        key: impl Into<String>,
        opts: CacheOptions,
        loader: BoxFuture<'static, Result<T, BoxError>>,
    ) -> Self {
        Self {
            key: key.into(),
            opts,
            loader,
        }
    }
}

/// Outcome of a warming run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmReport {
    /// Entries loaded and cached.
    pub loaded: usize,
    /// Entries whose loader or cache write failed.
    pub failed: usize,
}

/// Pre-populates the cache from a list of loaders.
#[derive(Clone)]
pub struct CacheWarmer {
    store: CacheStore,
}

impl CacheWarmer {
    pub fn new(store: CacheStore) -> Self {
        Self { store }
    }

    /// Warm every entry concurrently. One entry's failure is logged and
    /// counted; it never aborts the rest.
    pub async fn warm<T>(&self, entries: Vec<WarmEntry<T>>) -> WarmReport
    where
        T: Serialize + DeserializeOwned + Send,
    {
        let results = join_all(entries.into_iter().map(|entry| self.warm_one(entry))).await;

        let mut report = WarmReport::default();
        for ok in results {
            if ok {
                report.loaded += 1;
            } else {
                report.failed += 1;
            }
        }
        tracing::info!(loaded = report.loaded, failed = report.failed, "cache warming finished");
        report
    }

    async fn warm_one<T: Serialize>(&self, entry: WarmEntry<T>) -> bool {
        let value = match entry.loader.await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key = %entry.key, error = %e, "warm loader failed");
                return false;
            }
        };

        let encoded = match CacheEntry::new(&value, &entry.opts) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(key = %entry.key, error = %e, "warm encoding failed");
                return false;
            }
        };

        match self.store.set(&entry.key, encoded, entry.opts.ttl).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key = %entry.key, error = %e, "warm cache write failed");
                false
            }
        }
    }
}
