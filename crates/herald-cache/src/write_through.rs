//! Write-through strategy: persist first, cache on success.

use serde::{Serialize, de::DeserializeOwned};
use std::future::Future;

use crate::backend::CacheStore;
use crate::entry::{CacheEntry, CacheOptions};
use crate::error::{BoxError, CacheError};

/// Write-through cache.
///
/// `set` awaits the caller's persister before touching the cache: on
/// persister failure the error propagates and the cache is left exactly
/// as it was — a reader can never observe a cached value the source of
/// truth rejected.
#[derive(Clone)]
pub struct WriteThrough {
    store: CacheStore,
}

impl WriteThrough {
    pub fn new(store: CacheStore) -> Self {
        Self { store }
    }

    /// Persist `value` through `persister`, then cache it.
    pub async fn set<T, P, Fut>(
        &self,
        key: &str,
        value: &T,
        opts: &CacheOptions,
        persister: P,
    ) -> Result<(), CacheError>
    where
        T: Serialize,
        P: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), BoxError>>,
    {
        persister()
            .await
            .map_err(|e| CacheError::persister(key, e))?;

        let entry = CacheEntry::new(value, opts)?;
        self.store.set(key, entry, opts.ttl).await
    }

    /// Read a cached value, if present.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.store.get(key).await? {
            Some(entry) => Ok(Some(entry.decode_payload()?)),
            None => Ok(None),
        }
    }

    /// Remove a key. Returns `true` if a live entry was removed.
    pub async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.store.delete(key).await
    }
}
