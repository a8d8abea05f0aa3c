//! # herald-core
//!
//! Shared observability surface for the Herald rate-limiting and caching
//! core: Prometheus metric recording helpers and tracing initialization.
//!
//! Every other Herald crate emits its counters and gauges through the
//! functions in [`metrics`] so that metric names and label sets stay
//! consistent across the admission controller, the cache strategies and
//! the invalidation manager.

pub mod metrics;
pub mod observability;

pub use observability::init_tracing;
