//! Invalidation engine: key, pattern and tag invalidation with a
//! cross-instance eviction broadcast.
//!
//! Invalidation is two-phase. The [`InvalidationManager`] deletes the
//! affected entries from the shared store (the authoritative step),
//! then broadcasts an [`InvalidationEvent`] over the store's pub/sub so
//! every other instance evicts its L1 copies. The broadcast is
//! best-effort: if it is lost, remote L1 copies serve stale data for at
//! most their promotion TTL, while the shared store is already clean.
//!
//! Tag events carry the resolved member keys, because by the time a
//! listener receives the event the tag index has already been deleted
//! and could not be resolved remotely.

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use uuid::Uuid;

use herald_core::metrics;
use herald_store::StoreError;

use crate::backend::CacheStore;
use crate::error::CacheError;

/// Pub/sub channel carrying invalidation events.
pub const INVALIDATION_CHANNEL: &str = "herald:cache:invalidate";

/// Initial delay before re-subscribing after a lost connection.
const INITIAL_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);
/// Cap on the re-subscribe backoff.
const MAX_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(300);

/// Shared-store key for the set of cache keys carrying `tag`.
pub(crate) fn tag_key(tag: &str) -> String {
    format!("herald:tag:{tag}")
}

/// What an invalidation event targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationKind {
    Key,
    Pattern,
    Tag,
}

impl InvalidationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Key => "key",
            Self::Pattern => "pattern",
            Self::Tag => "tag",
        }
    }
}

/// Broadcast payload telling other instances what to evict locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidationEvent {
    pub kind: InvalidationKind,
    /// The key, glob pattern, or tag that was invalidated.
    pub target: String,
    /// For tag events: the member keys resolved before the tag index
    /// was deleted. Empty for key and pattern events.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
    /// Instance that performed the invalidation; listeners skip their
    /// own events (the local eviction already happened synchronously).
    pub origin_instance: String,
    pub timestamp_ms: i64,
}

impl InvalidationEvent {
    fn new(kind: InvalidationKind, target: &str, keys: Vec<String>, origin: &str) -> Self {
        Self {
            kind,
            target: target.to_string(),
            keys,
            origin_instance: origin.to_string(),
            timestamp_ms: (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64,
        }
    }
}

/// Performs invalidations against the shared store and broadcasts them.
#[derive(Clone)]
pub struct InvalidationManager {
    store: CacheStore,
    instance_id: String,
}

impl InvalidationManager {
    pub fn new(store: CacheStore) -> Self {
        Self {
            store,
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// This instance's identity as stamped on broadcast events.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Invalidate a single key. Returns `true` if a live shared entry
    /// was removed.
    pub async fn invalidate_key(&self, key: &str) -> Result<bool, CacheError> {
        let removed = self.store.delete(key).await?;
        metrics::record_invalidation("key");
        tracing::info!(key = %key, removed, "key invalidated");

        self.broadcast(InvalidationEvent::new(
            InvalidationKind::Key,
            key,
            Vec::new(),
            &self.instance_id,
        ))
        .await;
        Ok(removed)
    }

    /// Invalidate every key matching a glob pattern. Returns the number
    /// of shared entries removed.
    ///
    /// A store failure mid-sweep surfaces as
    /// [`CacheError::InvalidationIncomplete`]: deletions already applied
    /// stay applied, and no broadcast is sent for a partial sweep.
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<usize, CacheError> {
        let keys = self.store.state_store().scan(pattern).await?;

        let mut applied = 0usize;
        for key in &keys {
            match self.store.state_store().delete(key).await {
                Ok(true) => applied += 1,
                Ok(false) => {}
                Err(source) => {
                    return Err(self.incomplete(pattern, applied, source));
                }
            }
        }

        self.store.evict_local_pattern(pattern);
        metrics::record_invalidation("pattern");
        tracing::info!(pattern = %pattern, removed = applied, "pattern invalidated");

        self.broadcast(InvalidationEvent::new(
            InvalidationKind::Pattern,
            pattern,
            Vec::new(),
            &self.instance_id,
        ))
        .await;
        Ok(applied)
    }

    /// Invalidate every key carrying `tag` and drop the tag index.
    /// Returns the number of shared entries removed.
    ///
    /// Index members whose entry already expired are skipped silently;
    /// the index is an overapproximation by design of TTLs.
    pub async fn invalidate_tag(&self, tag: &str) -> Result<usize, CacheError> {
        let index = tag_key(tag);
        let members = self.store.state_store().set_members(&index).await?;

        let mut applied = 0usize;
        for key in &members {
            match self.store.state_store().delete(key).await {
                Ok(true) => applied += 1,
                Ok(false) => {}
                Err(source) => {
                    return Err(self.incomplete(tag, applied, source));
                }
            }
            self.store.evict_local(key);
        }

        if let Err(source) = self.store.state_store().delete(&index).await {
            return Err(self.incomplete(tag, applied, source));
        }

        metrics::record_invalidation("tag");
        tracing::info!(tag = %tag, removed = applied, "tag invalidated");

        self.broadcast(InvalidationEvent::new(
            InvalidationKind::Tag,
            tag,
            members,
            &self.instance_id,
        ))
        .await;
        Ok(applied)
    }

    fn incomplete(&self, target: &str, applied: usize, source: StoreError) -> CacheError {
        tracing::warn!(target = %target, applied, error = %source,
            "invalidation interrupted by store failure");
        CacheError::InvalidationIncomplete { applied, source }
    }

    /// Best-effort broadcast: a publish failure only delays remote L1
    /// eviction until those copies expire.
    async fn broadcast(&self, event: InvalidationEvent) {
        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode invalidation event");
                return;
            }
        };
        if let Err(e) = self
            .store
            .state_store()
            .publish(INVALIDATION_CHANNEL, payload)
            .await
        {
            tracing::warn!(kind = event.kind.as_str(), target = %event.target, error = %e,
                "invalidation broadcast failed");
        }
    }
}

/// Subscribes to the invalidation channel and applies remote evictions
/// to the local tier.
///
/// Runs until aborted; a lost subscription is re-established with
/// exponential backoff.
pub struct InvalidationListener {
    store: CacheStore,
    instance_id: String,
}

impl InvalidationListener {
    /// `instance_id` must match the manager of the same process so its
    /// own broadcasts are skipped.
    pub fn new(store: CacheStore, instance_id: impl Into<String>) -> Self {
        Self {
            store,
            instance_id: instance_id.into(),
        }
    }

    /// Spawn the listener task. Abort the handle to stop it.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut delay = INITIAL_RESUBSCRIBE_DELAY;
            loop {
                match self.run().await {
                    Ok(()) => {
                        tracing::warn!("invalidation subscription ended, re-subscribing");
                        delay = INITIAL_RESUBSCRIBE_DELAY;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, delay_s = delay.as_secs(),
                            "invalidation subscription failed, backing off");
                    }
                }
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_RESUBSCRIBE_DELAY);
            }
        })
    }

    /// Consume one subscription until the stream ends.
    async fn run(&self) -> Result<(), StoreError> {
        let mut stream = self
            .store
            .state_store()
            .subscribe(INVALIDATION_CHANNEL)
            .await?;
        tracing::info!(channel = INVALIDATION_CHANNEL, "invalidation listener subscribed");

        while let Some(payload) = stream.next().await {
            match serde_json::from_slice::<InvalidationEvent>(&payload) {
                Ok(event) => self.apply(event),
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring malformed invalidation event");
                }
            }
        }
        Ok(())
    }

    fn apply(&self, event: InvalidationEvent) {
        if event.origin_instance == self.instance_id {
            // Our own broadcast; the local eviction already happened.
            return;
        }

        match event.kind {
            InvalidationKind::Key => {
                self.store.evict_local(&event.target);
            }
            InvalidationKind::Pattern => {
                self.store.evict_local_pattern(&event.target);
            }
            InvalidationKind::Tag => {
                for key in &event.keys {
                    self.store.evict_local(key);
                }
            }
        }
        tracing::debug!(kind = event.kind.as_str(), target = %event.target,
            origin = %event.origin_instance, "applied remote invalidation");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_round_trip() {
        let event = InvalidationEvent::new(
            InvalidationKind::Tag,
            "templates",
            vec!["tmpl:a".into(), "tmpl:b".into()],
            "instance-1",
        );
        let json = serde_json::to_vec(&event).unwrap();
        let restored: InvalidationEvent = serde_json::from_slice(&json).unwrap();
        assert_eq!(restored, event);
    }

    #[test]
    fn test_key_event_omits_empty_keys() {
        let event =
            InvalidationEvent::new(InvalidationKind::Key, "user:42", Vec::new(), "instance-1");
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("\"keys\""));

        let restored: InvalidationEvent = serde_json::from_str(&json).unwrap();
        assert!(restored.keys.is_empty());
    }

    #[test]
    fn test_kind_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&InvalidationKind::Pattern).unwrap(),
            "\"pattern\""
        );
        assert_eq!(InvalidationKind::Tag.as_str(), "tag");
    }
}
