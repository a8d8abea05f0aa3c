//! In-process state store implementation.
//!
//! Backs single-instance deployments and the test suite. Expiry is lazy:
//! an expired entry is dropped on the next read that touches it, which
//! mirrors the externally observable behavior of a TTL-native store.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::StreamExt;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::bucket::{AtomicBucketStore, BucketParams, BucketSnapshot, BucketState};
use crate::error::StoreError;
use crate::pattern::key_pattern_matches;
use crate::traits::{MessageStream, StateStore};

/// Per-channel broadcast buffer; slow subscribers drop the oldest events.
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct StoredValue {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn new(data: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self {
            data,
            expires_at: ttl.map(|t| Instant::now() + t),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-memory implementation of [`StateStore`] and [`AtomicBucketStore`].
///
/// Key/value entries live in a `DashMap`; per-key atomicity for
/// `set_nx`, `compare_and_swap` and bucket updates comes from the map's
/// exclusive entry guard. Pub/sub is a `tokio::sync::broadcast` channel
/// per topic.
#[derive(Debug, Default)]
struct StoredSet {
    members: HashSet<String>,
    expires_at: Option<Instant>,
}

impl StoredSet {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

#[derive(Default)]
pub struct MemoryStateStore {
    data: DashMap<String, StoredValue>,
    sets: DashMap<String, StoredSet>,
    channels: DashMap<String, broadcast::Sender<Vec<u8>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-expired) entries. Test/diagnostic helper.
    pub fn len(&self) -> usize {
        self.data.iter().filter(|e| !e.value().is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(entry) = self.data.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.data.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.data.clone()));
        }
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        self.data.insert(key.to_string(), StoredValue::new(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        // A key is deletable whatever its type, value or set.
        let value_removed = match self.data.remove(key) {
            Some((_, value)) => !value.is_expired(),
            None => false,
        };
        let set_removed = match self.sets.remove(key) {
            Some((_, set)) => !set.is_expired(),
            None => false,
        };
        Ok(value_removed || set_removed)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        if let Some(entry) = self.data.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.data.remove(key);
                return Ok(None);
            }
            return Ok(entry
                .expires_at
                .map(|at| at.saturating_duration_since(Instant::now())));
        }
        Ok(None)
    }

    async fn set_nx(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        match self.data.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(StoredValue::new(value, Some(ttl)));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue::new(value, Some(ttl)));
                Ok(true)
            }
        }
    }

    async fn delete_if_match(&self, key: &str, expected: &[u8]) -> Result<bool, StoreError> {
        match self.data.entry(key.to_string()) {
            Entry::Occupied(occupied) => {
                if !occupied.get().is_expired() && occupied.get().data == expected {
                    occupied.remove();
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(_) => Ok(false),
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        match self.data.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                let matches = if current.is_expired() {
                    expected.is_none()
                } else {
                    expected.is_some_and(|e| e == current.data.as_slice())
                };
                if matches {
                    occupied.insert(StoredValue::new(new, ttl));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                if expected.is_none() {
                    vacant.insert(StoredValue::new(new, ttl));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .data
            .iter()
            .filter(|entry| !entry.value().is_expired())
            .map(|entry| entry.key().clone())
            .filter(|key| key_pattern_matches(pattern, key))
            .collect())
    }

    async fn set_add(
        &self,
        key: &str,
        member: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let now = Instant::now();
        match self.sets.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let set = occupied.get_mut();
                if set.is_expired() {
                    // Expired set: this add recreates it.
                    set.members.clear();
                    set.members.insert(member.to_string());
                    set.expires_at = ttl.map(|t| now + t);
                } else {
                    set.members.insert(member.to_string());
                    // Extend-only: never shorten an existing expiry, and
                    // never put one on a set created persistent.
                    if let (Some(t), Some(existing)) = (ttl, set.expires_at) {
                        set.expires_at = Some(existing.max(now + t));
                    }
                }
            }
            Entry::Vacant(vacant) => {
                let mut members = HashSet::new();
                members.insert(member.to_string());
                vacant.insert(StoredSet {
                    members,
                    expires_at: ttl.map(|t| now + t),
                });
            }
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        if let Some(set) = self.sets.get(key) {
            if set.is_expired() {
                drop(set);
                self.sets.remove(key);
                return Ok(Vec::new());
            }
            return Ok(set.members.iter().cloned().collect());
        }
        Ok(Vec::new())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        if let Some(mut set) = self.sets.get_mut(key) {
            if set.is_expired() {
                set.members.clear();
            } else {
                set.members.remove(member);
            }
            let now_empty = set.members.is_empty();
            drop(set);
            if now_empty {
                self.sets.remove_if(key, |_, s| s.members.is_empty());
            }
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), StoreError> {
        if let Some(sender) = self.channels.get(channel) {
            // No subscribers is not an error.
            let _ = sender.send(payload);
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, StoreError> {
        let receiver = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();

        // Lagged subscribers skip dropped messages instead of erroring out.
        let stream = BroadcastStream::new(receiver).filter_map(|msg| async { msg.ok() });
        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl AtomicBucketStore for MemoryStateStore {
    async fn check_and_consume(
        &self,
        key: &str,
        params: &BucketParams,
        now_ms: i64,
        cost: f64,
    ) -> Result<BucketSnapshot, StoreError> {
        let ttl = params.full_refill_ttl();

        // The entry guard serializes concurrent checks for the same key.
        let mut entry = self.data.entry(key.to_string()).or_insert_with(|| {
            StoredValue::new(Vec::new(), Some(ttl))
        });

        let mut state = if entry.data.is_empty() || entry.is_expired() {
            BucketState::full(params, now_ms)
        } else {
            BucketState::decode(&entry.data)?
        };

        state.refill(params, now_ms);
        let allowed = state.try_consume(cost);

        *entry = StoredValue::new(state.encode()?, Some(ttl));

        Ok(BucketSnapshot {
            allowed,
            tokens: state.tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_get_set_delete() {
        let store = MemoryStateStore::new();
        store.set("k", b"v".to_vec(), None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert!(store.delete("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let store = MemoryStateStore::new();
        store
            .set("k", b"v".to_vec(), Some(Duration::from_millis(30)))
            .await
            .unwrap();
        assert!(store.ttl("k").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.ttl("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_nx_respects_live_entry() {
        let store = MemoryStateStore::new();
        assert!(
            store
                .set_nx("lease", b"a".to_vec(), Duration::from_secs(10))
                .await
                .unwrap()
        );
        assert!(
            !store
                .set_nx("lease", b"b".to_vec(), Duration::from_secs(10))
                .await
                .unwrap()
        );
        assert_eq!(store.get("lease").await.unwrap(), Some(b"a".to_vec()));
    }

    #[tokio::test]
    async fn test_set_nx_claims_expired_entry() {
        let store = MemoryStateStore::new();
        store
            .set_nx("lease", b"a".to_vec(), Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(
            store
                .set_nx("lease", b"b".to_vec(), Duration::from_secs(10))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_delete_if_match() {
        let store = MemoryStateStore::new();
        store.set("lease", b"owner-1".to_vec(), None).await.unwrap();
        assert!(!store.delete_if_match("lease", b"owner-2").await.unwrap());
        assert!(store.delete_if_match("lease", b"owner-1").await.unwrap());
        assert_eq!(store.get("lease").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let store = MemoryStateStore::new();

        // Absent key: only expected=None succeeds.
        assert!(
            !store
                .compare_and_swap("k", Some(b"x"), b"v1".to_vec(), None)
                .await
                .unwrap()
        );
        assert!(
            store
                .compare_and_swap("k", None, b"v1".to_vec(), None)
                .await
                .unwrap()
        );

        // Present key: expected must match the current value.
        assert!(
            !store
                .compare_and_swap("k", Some(b"nope"), b"v2".to_vec(), None)
                .await
                .unwrap()
        );
        assert!(
            store
                .compare_and_swap("k", Some(b"v1"), b"v2".to_vec(), None)
                .await
                .unwrap()
        );
        assert_eq!(store.get("k").await.unwrap(), Some(b"v2".to_vec()));
    }

    #[tokio::test]
    async fn test_scan_skips_expired() {
        let store = MemoryStateStore::new();
        store.set("tmpl:a", b"1".to_vec(), None).await.unwrap();
        store
            .set("tmpl:b", b"2".to_vec(), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        store.set("other", b"3".to_vec(), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut keys = store.scan("tmpl:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["tmpl:a".to_string()]);
    }

    #[tokio::test]
    async fn test_set_operations() {
        let store = MemoryStateStore::new();
        store.set_add("tag:x", "k1", None).await.unwrap();
        store.set_add("tag:x", "k2", None).await.unwrap();
        store.set_add("tag:x", "k1", None).await.unwrap();

        let mut members = store.set_members("tag:x").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["k1".to_string(), "k2".to_string()]);

        store.set_remove("tag:x", "k1").await.unwrap();
        assert_eq!(store.set_members("tag:x").await.unwrap(), vec!["k2"]);
    }

    #[tokio::test]
    async fn test_set_expires_with_its_ttl() {
        let store = MemoryStateStore::new();
        store
            .set_add("tag:short", "k1", Some(Duration::from_millis(30)))
            .await
            .unwrap();
        assert_eq!(store.set_members("tag:short").await.unwrap(), vec!["k1"]);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.set_members("tag:short").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_ttl_extends_never_shortens() {
        let store = MemoryStateStore::new();
        store
            .set_add("tag:mixed", "long", Some(Duration::from_millis(200)))
            .await
            .unwrap();
        // A shorter ttl on a later add must not clip the earlier expiry.
        store
            .set_add("tag:mixed", "short", Some(Duration::from_millis(10)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        let mut members = store.set_members("tag:mixed").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["long".to_string(), "short".to_string()]);
    }

    #[tokio::test]
    async fn test_persistent_set_ignores_later_ttl() {
        let store = MemoryStateStore::new();
        store.set_add("tag:forever", "k1", None).await.unwrap();
        store
            .set_add("tag:forever", "k2", Some(Duration::from_millis(20)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.set_members("tag:forever").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_pubsub_delivers_to_subscribers() {
        let store = Arc::new(MemoryStateStore::new());
        let mut sub = store.subscribe("events").await.unwrap();

        store.publish("events", b"hello".to_vec()).await.unwrap();
        let msg = tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .unwrap();
        assert_eq!(msg, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn test_bucket_never_over_admits_concurrently() {
        let store = Arc::new(MemoryStateStore::new());
        let params = BucketParams {
            capacity: 10.0,
            refill_rate: 0.001,
            burst_multiplier: 1.0,
        };

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let now = crate::bucket::now_unix_ms();
                store
                    .check_and_consume("bucket:x", &params, now, 1.0)
                    .await
                    .unwrap()
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            let snapshot = handle.await.unwrap();
            assert!(snapshot.tokens >= 0.0);
            assert!(snapshot.tokens <= params.max_tokens());
            if snapshot.allowed {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
    }
}
