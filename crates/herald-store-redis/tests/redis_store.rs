//! Integration tests for the Redis-backed state store.
//!
//! These use testcontainers to spin up a real Redis instance and are
//! ignored by default; run with `cargo test -- --ignored` on a machine
//! with a Docker daemon.

use futures_util::StreamExt;
use herald_store::{AtomicBucketStore, BucketParams, StateStore, now_unix_ms};
use herald_store_redis::{RedisBucketStore, RedisConfig, RedisStateStore, create_pool};
use std::time::Duration;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

/// Get or create the shared Redis container
async fn get_redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");

            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            let url = format!("redis://127.0.0.1:{}", host_port);

            (container, url)
        })
        .await;

    url.clone()
}

async fn connect() -> RedisStateStore {
    let config = RedisConfig {
        url: get_redis_url().await,
        pool_size: 5,
        timeout_ms: 5000,
    };
    RedisStateStore::connect(&config).expect("create store")
}

#[tokio::test]
#[ignore = "requires a local Docker daemon"]
async fn test_get_set_delete_with_ttl() {
    let store = connect().await;

    store
        .set("it:kv", b"value".to_vec(), Some(Duration::from_secs(60)))
        .await
        .unwrap();
    assert_eq!(store.get("it:kv").await.unwrap(), Some(b"value".to_vec()));

    let remaining = store.ttl("it:kv").await.unwrap().expect("ttl set");
    assert!(remaining <= Duration::from_secs(60));
    assert!(remaining > Duration::from_secs(50));

    assert!(store.delete("it:kv").await.unwrap());
    assert_eq!(store.get("it:kv").await.unwrap(), None);
}

#[tokio::test]
#[ignore = "requires a local Docker daemon"]
async fn test_lease_primitives() {
    let store = connect().await;

    assert!(
        store
            .set_nx("it:lease", b"owner-1".to_vec(), Duration::from_secs(30))
            .await
            .unwrap()
    );
    assert!(
        !store
            .set_nx("it:lease", b"owner-2".to_vec(), Duration::from_secs(30))
            .await
            .unwrap()
    );

    // Only the matching owner token releases.
    assert!(!store.delete_if_match("it:lease", b"owner-2").await.unwrap());
    assert!(store.delete_if_match("it:lease", b"owner-1").await.unwrap());
}

#[tokio::test]
#[ignore = "requires a local Docker daemon"]
async fn test_compare_and_swap() {
    let store = connect().await;

    assert!(
        store
            .compare_and_swap("it:cas", None, b"v1".to_vec(), None)
            .await
            .unwrap()
    );
    assert!(
        !store
            .compare_and_swap("it:cas", Some(b"stale"), b"v2".to_vec(), None)
            .await
            .unwrap()
    );
    assert!(
        store
            .compare_and_swap("it:cas", Some(b"v1"), b"v2".to_vec(), None)
            .await
            .unwrap()
    );
    assert_eq!(store.get("it:cas").await.unwrap(), Some(b"v2".to_vec()));
}

#[tokio::test]
#[ignore = "requires a local Docker daemon"]
async fn test_scan_and_sets() {
    let store = connect().await;

    store.set("it:scan:a", b"1".to_vec(), None).await.unwrap();
    store.set("it:scan:b", b"2".to_vec(), None).await.unwrap();

    let mut keys = store.scan("it:scan:*").await.unwrap();
    keys.sort();
    assert_eq!(keys, vec!["it:scan:a".to_string(), "it:scan:b".to_string()]);

    store.set_add("it:tag", "it:scan:a", None).await.unwrap();
    store.set_add("it:tag", "it:scan:b", None).await.unwrap();
    store.set_remove("it:tag", "it:scan:a").await.unwrap();
    assert_eq!(store.set_members("it:tag").await.unwrap(), vec!["it:scan:b"]);

    // A TTL'd set expires, and a later longer TTL extends it.
    store
        .set_add("it:tag:ttl", "m1", Some(Duration::from_millis(100)))
        .await
        .unwrap();
    store
        .set_add("it:tag:ttl", "m2", Some(Duration::from_millis(500)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(store.set_members("it:tag:ttl").await.unwrap().len(), 2);
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(store.set_members("it:tag:ttl").await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires a local Docker daemon"]
async fn test_pubsub_round_trip() {
    let store = connect().await;

    let mut sub = store.subscribe("it:events").await.unwrap();
    // Give the subscription a beat to register server-side.
    tokio::time::sleep(Duration::from_millis(100)).await;

    store.publish("it:events", b"ping".to_vec()).await.unwrap();

    let msg = tokio::time::timeout(Duration::from_secs(2), sub.next())
        .await
        .expect("message within deadline");
    assert_eq!(msg, Some(b"ping".to_vec()));
}

#[tokio::test]
#[ignore = "requires a local Docker daemon"]
async fn test_scripted_bucket_admission() {
    let config = RedisConfig {
        url: get_redis_url().await,
        pool_size: 5,
        timeout_ms: 5000,
    };
    let pool = create_pool(&config).unwrap();
    let buckets = RedisBucketStore::new(pool, &config);

    let params = BucketParams {
        capacity: 3.0,
        refill_rate: 0.001,
        burst_multiplier: 1.0,
    };

    for _ in 0..3 {
        let snapshot = buckets
            .check_and_consume("it:bucket", &params, now_unix_ms(), 1.0)
            .await
            .unwrap();
        assert!(snapshot.allowed);
    }

    let snapshot = buckets
        .check_and_consume("it:bucket", &params, now_unix_ms(), 1.0)
        .await
        .unwrap();
    assert!(!snapshot.allowed);
    assert!(snapshot.tokens < 1.0);
    assert!(snapshot.tokens >= 0.0);
}
