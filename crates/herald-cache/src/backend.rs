//! Two-tier cache substrate: optional L1 (DashMap) over the shared
//! state store (L2).
//!
//! ## Lookup order
//!
//! 1. L1 (process-local DashMap), microsecond latency
//! 2. L2 (shared store), network latency; hits are promoted to L1 with
//!    the remaining shared TTL
//!
//! Entries are wrapped in `Arc` so cache hits clone a pointer, not a
//! payload.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use herald_core::metrics;
use herald_store::StateStore;

use crate::entry::CacheEntry;
use crate::error::CacheError;
use crate::invalidation::tag_key;

/// L1 TTL used when the shared store reports no expiry for a promoted
/// entry.
const DEFAULT_PROMOTION_TTL: Duration = Duration::from_secs(60);

#[derive(Clone)]
struct LocalEntry {
    entry: Arc<CacheEntry>,
    expires_at: Instant,
}

impl LocalEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// The cache substrate every strategy operates on.
///
/// Cloning is cheap; clones share the same tiers.
#[derive(Clone)]
pub struct CacheStore {
    shared: Arc<dyn StateStore>,
    local: Option<Arc<DashMap<String, LocalEntry>>>,
}

impl CacheStore {
    /// Tiered substrate: L1 in front of the shared store. Pair it with
    /// an [`InvalidationListener`](crate::InvalidationListener) so other
    /// instances' invalidations evict the L1 copies.
    pub fn new(shared: Arc<dyn StateStore>) -> Self {
        Self {
            shared,
            local: Some(Arc::new(DashMap::new())),
        }
    }

    /// Shared-store-only substrate: no L1, strict read-your-writes
    /// across instances, invalidation broadcast becomes a no-op.
    pub fn shared_only(shared: Arc<dyn StateStore>) -> Self {
        Self {
            shared,
            local: None,
        }
    }

    /// The underlying shared state store.
    pub fn state_store(&self) -> &Arc<dyn StateStore> {
        &self.shared
    }

    /// Read an entry, trying L1 first, then L2 with promotion.
    pub async fn get(&self, key: &str) -> Result<Option<Arc<CacheEntry>>, CacheError> {
        if let Some(local) = &self.local {
            if let Some(cached) = local.get(key) {
                if !cached.is_expired() {
                    tracing::debug!(key = %key, "cache hit (L1)");
                    metrics::record_cache_hit("L1");
                    return Ok(Some(Arc::clone(&cached.entry)));
                }
                drop(cached);
                local.remove(key);
            }
        }

        let Some(raw) = self.shared.get(key).await? else {
            tracing::debug!(key = %key, "cache miss");
            metrics::record_cache_miss();
            return Ok(None);
        };

        let entry = match CacheEntry::from_bytes(&raw) {
            Ok(entry) => Arc::new(entry),
            Err(e) => {
                // A corrupt envelope is unusable; drop it and report a miss.
                tracing::warn!(key = %key, error = %e, "dropping undecodable cache entry");
                let _ = self.shared.delete(key).await;
                metrics::record_cache_miss();
                return Ok(None);
            }
        };

        tracing::debug!(key = %key, "cache hit (L2)");
        metrics::record_cache_hit("L2");

        if let Some(local) = &self.local {
            let promotion_ttl = self
                .shared
                .ttl(key)
                .await
                .ok()
                .flatten()
                .unwrap_or(DEFAULT_PROMOTION_TTL);
            local.insert(
                key.to_string(),
                LocalEntry {
                    entry: Arc::clone(&entry),
                    expires_at: Instant::now() + promotion_ttl,
                },
            );
            metrics::set_cache_entries("L1", local.len());
        }

        Ok(Some(entry))
    }

    /// Write an entry to both tiers and register its tags in the tag
    /// index. The shared write is awaited so callers observe success
    /// only after the entry is durable in L2.
    ///
    /// The tag index inherits the entry's TTL (extend-only), so a tag
    /// that is never invalidated still expires with its longest-lived
    /// member instead of accumulating dangling keys forever.
    pub async fn set(&self, key: &str, entry: CacheEntry, ttl: Duration) -> Result<(), CacheError> {
        for tag in &entry.tags {
            self.shared.set_add(&tag_key(tag), key, Some(ttl)).await?;
        }

        let raw = entry.to_bytes()?;
        self.shared.set(key, raw, Some(ttl)).await?;

        if let Some(local) = &self.local {
            local.insert(
                key.to_string(),
                LocalEntry {
                    entry: Arc::new(entry),
                    expires_at: Instant::now() + ttl,
                },
            );
            metrics::set_cache_entries("L1", local.len());
        }

        tracing::debug!(key = %key, ttl_ms = ttl.as_millis() as u64, "cache set");
        Ok(())
    }

    /// Delete an entry from both tiers. Returns `true` if the shared
    /// store held a live entry.
    pub async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.evict_local(key);
        let removed = self.shared.delete(key).await?;
        if removed {
            metrics::record_cache_eviction("L2");
        }
        Ok(removed)
    }

    /// Remaining shared-store TTL for an entry.
    pub async fn remaining_ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        Ok(self.shared.ttl(key).await?)
    }

    /// Evict a key from the local tier only. Used by the invalidation
    /// listener when another instance broadcasts an eviction.
    pub fn evict_local(&self, key: &str) -> bool {
        let Some(local) = &self.local else {
            return false;
        };
        let removed = local.remove(key).is_some();
        if removed {
            metrics::record_cache_eviction("L1");
            metrics::set_cache_entries("L1", local.len());
        }
        removed
    }

    /// Evict every local key matching a glob pattern.
    pub fn evict_local_pattern(&self, pattern: &str) -> usize {
        let Some(local) = &self.local else {
            return 0;
        };
        let keys: Vec<String> = local
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| herald_store::key_pattern_matches(pattern, k))
            .collect();
        let mut evicted = 0;
        for key in keys {
            if local.remove(&key).is_some() {
                evicted += 1;
                metrics::record_cache_eviction("L1");
            }
        }
        metrics::set_cache_entries("L1", local.len());
        evicted
    }

    /// Number of entries in the local tier (0 without one).
    pub fn local_len(&self) -> usize {
        self.local.as_ref().map(|l| l.len()).unwrap_or(0)
    }

    /// Whether this substrate keeps a process-local tier.
    pub fn has_local_tier(&self) -> bool {
        self.local.is_some()
    }
}
