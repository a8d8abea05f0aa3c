//! Cache entry envelope and per-write options.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::time::Duration;
use time::OffsetDateTime;

use crate::error::CacheError;

/// The envelope stored for every cached value.
///
/// The payload is the MessagePack encoding of whatever the loader
/// returned; an entry is only ever replaced wholesale, never patched,
/// so a present entry is exactly one successful load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Opaque serialized payload.
    pub payload: Vec<u8>,
    /// Tags this key is indexed under, for group invalidation.
    pub tags: Vec<String>,
    /// Optional caller-managed version.
    pub version: Option<u64>,
    /// When this entry was written (Unix ms).
    pub stored_at_ms: i64,
}

impl CacheEntry {
    /// Build an entry from a serializable value and write options.
    pub fn new<T: Serialize>(value: &T, opts: &CacheOptions) -> Result<Self, CacheError> {
        let payload =
            rmp_serde::to_vec(value).map_err(|e| CacheError::encode(e.to_string()))?;
        Ok(Self {
            payload,
            tags: opts.tags.clone(),
            version: opts.version,
            stored_at_ms: (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64,
        })
    }

    /// Decode the payload back into the caller's type.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, CacheError> {
        rmp_serde::from_slice(&self.payload).map_err(|e| CacheError::decode(e.to_string()))
    }

    /// Encode the whole envelope for the shared store.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CacheError> {
        rmp_serde::to_vec(self).map_err(|e| CacheError::encode(e.to_string()))
    }

    /// Decode an envelope read from the shared store.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CacheError> {
        rmp_serde::from_slice(bytes).map_err(|e| CacheError::decode(e.to_string()))
    }
}

/// Per-write cache options.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Time-to-live for the entry in the shared store (and the L1 copy).
    pub ttl: Duration,
    /// Tags to index the key under.
    pub tags: Vec<String>,
    /// Optional caller-managed version.
    pub version: Option<u64>,
}

impl CacheOptions {
    /// Options with the given TTL and no tags.
    pub fn ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            tags: Vec::new(),
            version: None,
        }
    }

    /// Add tags for group invalidation.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Attach a caller-managed version.
    #[must_use]
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self::ttl(Duration::from_secs(300))
    }
}
