//! # herald-limiter
//!
//! Token bucket admission control shared across all Herald instances.
//!
//! The limiter holds no state of its own: every bucket lives in the
//! shared state store behind an
//! [`AtomicBucketStore`](herald_store::AtomicBucketStore), so any number
//! of stateless instances agree on the same admission decisions. The
//! read-refill-decrement-write sequence is indivisible at the store, and
//! a store failure fails *open* — admission control degrades to "allow"
//! rather than taking the request path down with it.
//!
//! ## Example
//!
//! ```ignore
//! use herald_limiter::{RateLimiter, RateLimiterConfig};
//! use herald_store::MemoryStateStore;
//! use std::sync::Arc;
//!
//! let limiter = RateLimiter::new(
//!     Arc::new(MemoryStateStore::new()),
//!     RateLimiterConfig {
//!         capacity: 100.0,
//!         refill_rate: 10.0,
//!         ..Default::default()
//!     },
//! )?;
//!
//! let decision = limiter.check("user:42").await;
//! if !decision.allowed {
//!     // translate into a 429 with Retry-After upstream
//! }
//! ```

mod config;
mod error;
mod limiter;

pub use config::RateLimiterConfig;
pub use error::LimitError;
pub use limiter::{RateLimitDecision, RateLimiter};
