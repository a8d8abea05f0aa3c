//! Cache error types.

use herald_store::StoreError;

/// Boxed error type for caller-supplied loaders and persisters.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by the cache layer.
///
/// Infrastructure failures (`Store`) are mostly absorbed internally —
/// a read path falls through to the loader instead of failing — while
/// `Loader` and `Persister` always propagate, since only the caller can
/// decide how to react to its own business logic failing.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The shared state store failed or timed out.
    #[error("State store failure: {0}")]
    Store(#[from] StoreError),

    /// The caller-supplied loader failed; no cache entry was written.
    #[error("Loader failed for key {key}: {source}")]
    Loader {
        key: String,
        #[source]
        source: BoxError,
    },

    /// The caller-supplied persister failed; the cache write was skipped
    /// entirely, leaving any previous entry untouched.
    #[error("Persister failed for key {key}: {source}")]
    Persister {
        key: String,
        #[source]
        source: BoxError,
    },

    /// A value could not be serialized into a cache entry.
    #[error("Cache entry encoding failed: {message}")]
    Encode { message: String },

    /// A stored cache entry could not be deserialized.
    #[error("Cache entry decoding failed: {message}")]
    Decode { message: String },

    /// The write-behind buffer is full; the set was rejected rather
    /// than growing the buffer without bound.
    #[error("Write-behind buffer is full")]
    BufferFull,

    /// A pattern or tag invalidation was interrupted part-way. The
    /// deletions already applied stay applied; the remainder is left
    /// for the next sweep.
    #[error("Invalidation interrupted after {applied} deletions: {source}")]
    InvalidationIncomplete {
        applied: usize,
        #[source]
        source: StoreError,
    },
}

impl CacheError {
    /// Creates a new `Loader` error.
    #[must_use]
    pub fn loader(key: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Loader {
            key: key.into(),
            source: source.into(),
        }
    }

    /// Creates a new `Persister` error.
    #[must_use]
    pub fn persister(key: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Persister {
            key: key.into(),
            source: source.into(),
        }
    }

    /// Creates a new `Encode` error.
    #[must_use]
    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }

    /// Creates a new `Decode` error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Returns `true` if this is an infrastructure (store) failure.
    #[must_use]
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            Self::Store(_) | Self::InvalidationIncomplete { .. }
        )
    }
}
