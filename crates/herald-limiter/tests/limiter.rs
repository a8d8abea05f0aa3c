//! Behavior tests for the distributed token bucket limiter, running
//! against the in-memory state store.

use async_trait::async_trait;
use herald_limiter::{RateLimiter, RateLimiterConfig};
use herald_store::{
    AtomicBucketStore, BucketParams, BucketSnapshot, MemoryStateStore, StoreError,
};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

fn limiter(capacity: f64, refill_rate: f64, burst_multiplier: f64) -> RateLimiter {
    RateLimiter::new(
        Arc::new(MemoryStateStore::new()),
        RateLimiterConfig {
            capacity,
            refill_rate,
            burst_multiplier,
            ..Default::default()
        },
    )
    .expect("valid config")
}

/// capacity=10, refill=1/s: ten back-to-back checks pass, the eleventh
/// is denied with retry_after of about one second.
#[tokio::test]
async fn test_scenario_burst_of_ten_then_deny() {
    let limiter = limiter(10.0, 1.0, 1.0);

    for i in 0..10 {
        let decision = limiter.check("user:1").await;
        assert!(decision.allowed, "check {i} should be admitted");
    }

    let decision = limiter.check("user:1").await;
    assert!(!decision.allowed);
    let retry = decision.retry_after.expect("denied checks carry retry_after");
    assert!(
        retry > Duration::from_millis(850) && retry <= Duration::from_millis(1050),
        "retry_after was {retry:?}, expected ~1s"
    );
}

/// capacity=5, refill=5 per minute: five checks inside a second pass,
/// the sixth is denied with remaining=0 and reset roughly 60s out.
#[tokio::test]
async fn test_scenario_five_per_minute() {
    let limiter = limiter(5.0, 5.0 / 60.0, 1.0);

    for _ in 0..5 {
        assert!(limiter.check("user:2").await.allowed);
    }

    let decision = limiter.check("user:2").await;
    assert!(!decision.allowed);
    assert_eq!(decision.remaining, 0);

    let until_reset = decision.reset_at - OffsetDateTime::now_utc();
    let secs = until_reset.as_seconds_f64();
    assert!(
        (54.0..=61.0).contains(&secs),
        "reset_at should be ~60s out, was {secs}s"
    );
}

/// Remaining tokens never exceed capacity * burst_multiplier and never
/// go negative, regardless of call timing.
#[tokio::test]
async fn test_fill_level_invariant() {
    let limiter = limiter(4.0, 50.0, 2.0);

    for round in 0..6 {
        for _ in 0..12 {
            let decision = limiter.check("user:3").await;
            assert!(decision.remaining <= 8, "fill level above burst ceiling");
        }
        if round % 2 == 0 {
            tokio::time::sleep(Duration::from_millis(40)).await;
        }
    }
}

/// A fresh identifier starts with a full bucket, including burst headroom.
#[tokio::test]
async fn test_first_sight_grants_full_burst() {
    let limiter = limiter(5.0, 0.01, 2.0);

    for i in 0..10 {
        let decision = limiter.check("user:4").await;
        assert!(decision.allowed, "burst check {i} should be admitted");
    }
    assert!(!limiter.check("user:4").await.allowed);
}

/// Tokens come back at the configured refill rate.
#[tokio::test]
async fn test_refill_after_drain() {
    let limiter = limiter(2.0, 20.0, 1.0);

    assert!(limiter.check("user:5").await.allowed);
    assert!(limiter.check("user:5").await.allowed);
    assert!(!limiter.check("user:5").await.allowed);

    // 20 tokens/s: 120ms is at least two tokens.
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(limiter.check("user:5").await.allowed);
}

/// Identifiers do not share buckets.
#[tokio::test]
async fn test_identifiers_are_isolated() {
    let limiter = limiter(1.0, 0.01, 1.0);

    assert!(limiter.check("user:a").await.allowed);
    assert!(!limiter.check("user:a").await.allowed);
    assert!(limiter.check("user:b").await.allowed);
}

struct FailingBucketStore;

#[async_trait]
impl AtomicBucketStore for FailingBucketStore {
    async fn check_and_consume(
        &self,
        _key: &str,
        _params: &BucketParams,
        _now_ms: i64,
        _cost: f64,
    ) -> Result<BucketSnapshot, StoreError> {
        Err(StoreError::connection("store down"))
    }
}

struct HangingBucketStore;

#[async_trait]
impl AtomicBucketStore for HangingBucketStore {
    async fn check_and_consume(
        &self,
        _key: &str,
        _params: &BucketParams,
        _now_ms: i64,
        _cost: f64,
    ) -> Result<BucketSnapshot, StoreError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        unreachable!("sleep outlives every test timeout")
    }
}

/// An unreachable store fails open: the request is admitted.
#[tokio::test]
async fn test_fail_open_on_store_error() {
    let limiter =
        RateLimiter::new(Arc::new(FailingBucketStore), RateLimiterConfig::default()).unwrap();

    let decision = limiter.check("user:6").await;
    assert!(decision.allowed);
    assert!(decision.retry_after.is_none());
}

/// A hung store is cut off at the configured timeout and fails open;
/// the caller is never blocked indefinitely.
#[tokio::test]
async fn test_fail_open_on_store_timeout() {
    let limiter = RateLimiter::new(
        Arc::new(HangingBucketStore),
        RateLimiterConfig {
            store_timeout_ms: 50,
            ..Default::default()
        },
    )
    .unwrap();

    let start = std::time::Instant::now();
    let decision = limiter.check("user:7").await;
    assert!(decision.allowed);
    assert!(start.elapsed() < Duration::from_secs(1));
}

/// Invalid configuration is rejected at construction.
#[tokio::test]
async fn test_invalid_config_rejected() {
    let result = RateLimiter::new(
        Arc::new(MemoryStateStore::new()),
        RateLimiterConfig {
            burst_multiplier: 0.0,
            ..Default::default()
        },
    );
    assert!(result.is_err());
}
