//! Adaptive TTLs: per-category base TTLs scaled by the observed
//! read/write mix.
//!
//! A key that is read far more often than it is written earns a longer
//! TTL (stale risk is low, hit value is high); a write-heavy key gets a
//! shorter one. Scaling only kicks in once a key has enough samples to
//! make the ratio meaningful, and is clamped so a pathological ratio
//! cannot pin an entry forever or thrash it.

use dashmap::DashMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Adaptive TTL tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct AdaptiveTtlConfig {
    /// Base TTL per category prefix (the part of the key before the
    /// first `:`), e.g. `"template" => 3600s`.
    #[serde(default)]
    pub categories: HashMap<String, Duration>,
    /// Base TTL for keys with no category match.
    #[serde(default = "default_ttl")]
    pub default_ttl: Duration,
    /// Lower clamp on the scaling factor.
    #[serde(default = "default_min_factor")]
    pub min_factor: f64,
    /// Upper clamp on the scaling factor.
    #[serde(default = "default_max_factor")]
    pub max_factor: f64,
    /// Read/write ratio that maps to a scaling factor of 1.0.
    #[serde(default = "default_reference_ratio")]
    pub reference_ratio: f64,
    /// Accesses required before scaling applies; below this the base
    /// TTL is used unchanged.
    #[serde(default = "default_min_samples")]
    pub min_samples: u64,
}

fn default_ttl() -> Duration {
    Duration::from_secs(300)
}

fn default_min_factor() -> f64 {
    0.5
}

fn default_max_factor() -> f64 {
    3.0
}

fn default_reference_ratio() -> f64 {
    10.0
}

fn default_min_samples() -> u64 {
    20
}

impl Default for AdaptiveTtlConfig {
    fn default() -> Self {
        Self {
            categories: HashMap::new(),
            default_ttl: default_ttl(),
            min_factor: default_min_factor(),
            max_factor: default_max_factor(),
            reference_ratio: default_reference_ratio(),
            min_samples: default_min_samples(),
        }
    }
}

#[derive(Default)]
struct KeyStats {
    reads: AtomicU64,
    writes: AtomicU64,
}

/// Computes TTLs from per-key access statistics.
///
/// Cloneable is not needed here; wrap in `Arc` to share across tasks.
pub struct AdaptiveTtl {
    config: AdaptiveTtlConfig,
    stats: DashMap<String, KeyStats>,
}

impl AdaptiveTtl {
    pub fn new(config: AdaptiveTtlConfig) -> Self {
        Self {
            config,
            stats: DashMap::new(),
        }
    }

    /// Record one read of `key`.
    pub fn record_read(&self, key: &str) {
        self.stats
            .entry(key.to_string())
            .or_default()
            .reads
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record one write of `key`.
    pub fn record_write(&self, key: &str) {
        self.stats
            .entry(key.to_string())
            .or_default()
            .writes
            .fetch_add(1, Ordering::Relaxed);
    }

    /// The TTL to use for the next write of `key`.
    pub fn ttl_for(&self, key: &str) -> Duration {
        let base = self.base_ttl(key);
        let Some(stats) = self.stats.get(key) else {
            return base;
        };

        let reads = stats.reads.load(Ordering::Relaxed);
        let writes = stats.writes.load(Ordering::Relaxed);
        if reads + writes < self.config.min_samples {
            return base;
        }

        // writes+1 keeps never-written keys finite.
        let ratio = reads as f64 / (writes + 1) as f64;
        let factor = (ratio / self.config.reference_ratio)
            .clamp(self.config.min_factor, self.config.max_factor);
        base.mul_f64(factor)
    }

    /// Drop accumulated statistics for `key`, e.g. after invalidation.
    pub fn forget(&self, key: &str) {
        self.stats.remove(key);
    }

    fn base_ttl(&self, key: &str) -> Duration {
        let category = key.split(':').next().unwrap_or(key);
        self.config
            .categories
            .get(category)
            .copied()
            .unwrap_or(self.config.default_ttl)
    }
}
