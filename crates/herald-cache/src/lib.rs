//! # herald-cache
//!
//! Caching strategies, invalidation and stampede prevention for the
//! Herald notification gateway.
//!
//! ## Architecture
//!
//! All strategies share one substrate, [`CacheStore`]: an optional
//! process-local L1 tier (`DashMap`) in front of the shared state store
//! (L2) that every instance coordinates through. On top of it sit:
//!
//! - [`CacheAside`]: read-through loading with single-flight protection
//!   and optional proactive refresh ahead of expiry
//! - [`WriteThrough`]: persist first, cache only on success
//! - [`WriteBehind`]: optimistic cache write plus batched asynchronous
//!   persistence with bounded-buffer backpressure
//! - [`CacheWarmer`]: bulk pre-population with per-entry failure isolation
//! - [`AdaptiveTtl`]: per-category TTLs scaled by observed read/write mix
//! - [`InvalidationManager`] / [`InvalidationListener`]: key, pattern and
//!   tag invalidation with cross-instance eviction broadcast over the
//!   store's pub/sub
//!
//! ## Topology
//!
//! This crate targets the tiered topology: each process keeps an L1 copy
//! of hot entries, so the invalidation broadcast is load-bearing — every
//! instance subscribes and evicts its local copies when another instance
//! invalidates. Construct the substrate with [`CacheStore::shared_only`]
//! to disable L1 and get strict read-your-writes through the shared
//! store alone (the broadcast then degrades to a harmless no-op).
//!
//! ## Failure model
//!
//! Store failures are absorbed: reads fall through to the caller's
//! loader (a cache outage costs latency, never correctness), and the
//! degradation is logged and counted. Loader and persister failures are
//! business failures and always propagate to the immediate caller.

mod adaptive;
mod aside;
mod backend;
mod entry;
mod error;
mod invalidation;
mod lease;
mod stampede;
mod warming;
mod write_behind;
mod write_through;

pub use adaptive::{AdaptiveTtl, AdaptiveTtlConfig};
pub use aside::CacheAside;
pub use backend::CacheStore;
pub use entry::{CacheEntry, CacheOptions};
pub use error::{BoxError, CacheError};
pub use invalidation::{
    INVALIDATION_CHANNEL, InvalidationEvent, InvalidationKind, InvalidationListener,
    InvalidationManager,
};
pub use lease::DistributedLease;
pub use stampede::{StampedeConfig, StampedeGuard};
pub use warming::{CacheWarmer, WarmEntry, WarmReport};
pub use write_behind::{Persister, WriteBehind, WriteBehindConfig};
pub use write_through::WriteThrough;
