//! # herald-store
//!
//! Shared state store abstraction for the Herald rate-limiting and
//! caching core.
//!
//! This crate defines the capability traits that every state store
//! backend must implement, plus the portable pieces that work over any
//! backend:
//!
//! - [`StateStore`]: get/set/delete with TTL, SETNX leases, atomic
//!   compare-and-swap, cursor-based pattern scan, set operations for the
//!   tag index, and publish/subscribe for invalidation broadcast.
//! - [`AtomicBucketStore`]: the one-shot refill-and-consume primitive the
//!   token bucket limiter requires to be indivisible.
//! - [`CasBucketStore`]: a portable [`AtomicBucketStore`] built from any
//!   [`StateStore`] via a bounded compare-and-swap retry loop, for
//!   backends without server-side scripting.
//! - [`MemoryStateStore`]: an in-process implementation used for
//!   single-instance deployments and tests.
//!
//! Network-backed implementations live in separate crates
//! (`herald-store-redis`).
//!
//! ## Example
//!
//! ```ignore
//! use herald_store::{StateStore, StoreError};
//! use std::time::Duration;
//!
//! async fn remember(store: &dyn StateStore) -> Result<(), StoreError> {
//!     store
//!         .set("greeting", b"hello".to_vec(), Some(Duration::from_secs(60)))
//!         .await
//! }
//! ```

mod bucket;
mod cas;
mod error;
mod memory;
mod pattern;
mod traits;

pub use bucket::{AtomicBucketStore, BucketParams, BucketSnapshot, BucketState, now_unix_ms};
pub use cas::CasBucketStore;
pub use error::StoreError;
pub use memory::MemoryStateStore;
pub use pattern::key_pattern_matches;
pub use traits::{MessageStream, StateStore};
