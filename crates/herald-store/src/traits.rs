//! Capability traits for the shared state store.
//!
//! All cross-instance coordination in Herald (rate limit buckets, cache
//! entries, leases, tag indexes, invalidation broadcast) goes through a
//! single logical store described by [`StateStore`]. Components receive
//! the store by injection so that tests can run against
//! [`MemoryStateStore`](crate::MemoryStateStore) and production against
//! a Redis-backed implementation.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::time::Duration;

use crate::error::StoreError;

/// Stream of raw pub/sub message payloads.
pub type MessageStream = BoxStream<'static, Vec<u8>>;

/// The shared state store every Herald instance coordinates through.
///
/// Implementations must be thread-safe (`Send + Sync`) and must bound
/// every network call with a timeout; an elapsed timeout is reported as
/// [`StoreError::Timeout`], never as an indefinite hang.
///
/// Values are opaque byte payloads. TTL handling is the store's
/// responsibility: a `get` must never return an expired value.
#[async_trait]
pub trait StateStore: Send + Sync {
    // ==================== Key/value with TTL ====================

    /// Reads the value at `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Writes `value` at `key`. A `ttl` of `None` stores without expiry.
    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;

    /// Deletes `key`. Returns `true` if a live entry was removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Remaining TTL of `key`: `None` when the key is absent or persistent.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    // ==================== Atomic primitives ====================

    /// Sets `key` to `value` with `ttl` only if the key is absent.
    ///
    /// Returns `true` if the write happened. This is the lease-acquire
    /// primitive (`SETNX`-with-TTL).
    async fn set_nx(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Deletes `key` only if its current value equals `expected`.
    ///
    /// Returns `true` if the delete happened. This is the lease-release
    /// primitive: a holder can only release its own lease.
    async fn delete_if_match(&self, key: &str, expected: &[u8]) -> Result<bool, StoreError>;

    /// Atomically replaces the value at `key` with `new` if the current
    /// value equals `expected` (`None` meaning "key must be absent").
    ///
    /// Returns `true` if the swap happened.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError>;

    // ==================== Scan ====================

    /// Returns all live keys matching a glob-style `pattern`.
    ///
    /// Implementations must use a cursor-based scan with bounded batch
    /// sizes, never a blocking full-keyspace sweep.
    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    // ==================== Sets (tag index) ====================

    /// Adds `member` to the set at `key`, creating the set if needed.
    ///
    /// When `ttl` is `Some`, a newly created set expires after `ttl` and
    /// an existing expiry is extended to at least `ttl` from now — never
    /// shortened, so the set outlives its longest-lived member. A set
    /// created without expiry stays persistent.
    async fn set_add(
        &self,
        key: &str,
        member: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;

    /// Returns all members of the set at `key` (empty if absent).
    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Removes `member` from the set at `key`.
    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError>;

    // ==================== Publish/subscribe ====================

    /// Publishes `payload` on `channel` to all subscribed instances.
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), StoreError>;

    /// Subscribes to `channel`, returning a stream of raw payloads.
    ///
    /// The stream ends when the underlying connection is lost; callers
    /// that need a durable subscription re-subscribe with backoff.
    async fn subscribe(&self, channel: &str) -> Result<MessageStream, StoreError>;
}
