//! Token bucket state and the atomic consume capability.
//!
//! The limiter's read-refill-decrement-write sequence must execute as a
//! single indivisible operation against the shared store, otherwise two
//! concurrent checks for the same identifier can both observe the
//! pre-decrement state and both be admitted. [`AtomicBucketStore`]
//! captures exactly that primitive; how indivisibility is achieved is
//! backend-specific (server-side script, CAS retry loop, or an
//! in-process lock).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use time::OffsetDateTime;

use crate::error::StoreError;

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// Bucket refill math is done on shared wall-clock timestamps so that
/// all instances agree on elapsed time for a given identifier.
pub fn now_unix_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Static token bucket parameters for one identifier class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketParams {
    /// Steady-state capacity in tokens.
    pub capacity: f64,
    /// Refill rate in tokens per second.
    pub refill_rate: f64,
    /// Burst headroom factor (>= 1.0). The bucket holds at most
    /// `capacity * burst_multiplier` tokens.
    pub burst_multiplier: f64,
}

impl BucketParams {
    /// Maximum fill level: `capacity * burst_multiplier`.
    pub fn max_tokens(&self) -> f64 {
        self.capacity * self.burst_multiplier
    }

    /// Time for a completely empty bucket to refill to the maximum.
    ///
    /// Used as the bucket key's TTL so idle identifiers self-expire
    /// instead of accumulating unbounded storage.
    pub fn full_refill_ttl(&self) -> Duration {
        Duration::from_secs_f64((self.max_tokens() / self.refill_rate).max(1.0))
    }
}

/// Persisted bucket state, shared across instances.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketState {
    /// Current fill level.
    pub tokens: f64,
    /// When the fill level was last recomputed (Unix ms).
    pub refreshed_at_ms: i64,
}

impl BucketState {
    /// A brand-new bucket starts full: a never-seen identifier is
    /// granted its configured burst before throttling kicks in.
    pub fn full(params: &BucketParams, now_ms: i64) -> Self {
        Self {
            tokens: params.max_tokens(),
            refreshed_at_ms: now_ms,
        }
    }

    /// Lazily refills the bucket for the elapsed time, clamped to the
    /// maximum fill level. Negative elapsed time (clock skew between
    /// instances) refills nothing.
    pub fn refill(&mut self, params: &BucketParams, now_ms: i64) {
        let elapsed_ms = (now_ms - self.refreshed_at_ms).max(0);
        let refilled = self.tokens + (elapsed_ms as f64 / 1000.0) * params.refill_rate;
        self.tokens = refilled.min(params.max_tokens());
        self.refreshed_at_ms = now_ms;
    }

    /// Consumes `cost` tokens if available. Returns whether the request
    /// is admitted.
    pub fn try_consume(&mut self, cost: f64) -> bool {
        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        rmp_serde::to_vec(self).map_err(|e| StoreError::serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| StoreError::serialization(e.to_string()))
    }
}

/// Outcome of one atomic check-and-consume against a bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketSnapshot {
    /// Whether the request was admitted.
    pub allowed: bool,
    /// Fill level after the operation (post-decrement when admitted).
    pub tokens: f64,
}

/// Atomic refill-and-consume capability.
///
/// The whole read-refill-decrement-write sequence for one key executes
/// indivisibly; concurrent calls for the same key are strictly ordered
/// relative to each other. Calls for different keys carry no relative
/// ordering guarantee.
#[async_trait]
pub trait AtomicBucketStore: Send + Sync {
    /// Refills the bucket at `key` for elapsed wall-clock time, then
    /// consumes `cost` tokens if available.
    ///
    /// A missing bucket is materialized full (initial-burst semantics).
    /// The bucket is stored with a TTL of
    /// [`BucketParams::full_refill_ttl`].
    async fn check_and_consume(
        &self,
        key: &str,
        params: &BucketParams,
        now_ms: i64,
        cost: f64,
    ) -> Result<BucketSnapshot, StoreError>;
}
