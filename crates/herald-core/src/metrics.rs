//! Prometheus metrics for the Herald core.
//!
//! This module provides:
//! - Rate limiter metrics (allow/deny counts, tokens remaining, fail-open events)
//! - Cache metrics (hit/miss rates per tier, evictions, entries)
//! - Stampede prevention metrics (collapsed loads, degraded-path loads)
//! - Invalidation metrics (by kind)
//! - Write-behind metrics (flushes, rejections, buffer depth)

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency.
pub mod names {
    // Rate limiter metrics
    pub const RATELIMIT_ALLOWED_TOTAL: &str = "ratelimit_allowed_total";
    pub const RATELIMIT_DENIED_TOTAL: &str = "ratelimit_denied_total";
    pub const RATELIMIT_FAIL_OPEN_TOTAL: &str = "ratelimit_fail_open_total";
    pub const RATELIMIT_TOKENS_REMAINING: &str = "ratelimit_tokens_remaining";

    // Cache metrics
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_EVICTIONS_TOTAL: &str = "cache_evictions_total";
    pub const CACHE_ENTRIES: &str = "cache_entries";
    pub const CACHE_REFRESH_TOTAL: &str = "cache_refresh_total";

    // Stampede prevention metrics
    pub const STAMPEDE_PREVENTED_TOTAL: &str = "stampede_prevented_total";
    pub const STAMPEDE_DEGRADED_TOTAL: &str = "stampede_degraded_total";

    // Invalidation metrics
    pub const INVALIDATIONS_TOTAL: &str = "invalidations_total";

    // Write-behind metrics
    pub const WRITE_BEHIND_FLUSH_TOTAL: &str = "write_behind_flush_total";
    pub const WRITE_BEHIND_REJECTED_TOTAL: &str = "write_behind_rejected_total";
    pub const WRITE_BEHIND_BUFFER_ENTRIES: &str = "write_behind_buffer_entries";
}

/// Initialize the Prometheus metrics exporter.
///
/// This should be called once at process startup.
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    // Use install_recorder() for pull-based metrics (the host serves /metrics itself)
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }

            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

// =============================================================================
// Rate Limiter Metrics
// =============================================================================

/// Record an admitted request for the given identifier class.
pub fn record_ratelimit_allowed(class: &str) {
    counter!(names::RATELIMIT_ALLOWED_TOTAL, "class" => class.to_string()).increment(1);
}

/// Record a rejected request for the given identifier class.
pub fn record_ratelimit_denied(class: &str) {
    counter!(names::RATELIMIT_DENIED_TOTAL, "class" => class.to_string()).increment(1);
}

/// Record a fail-open admission caused by a state store failure.
pub fn record_ratelimit_fail_open(class: &str) {
    counter!(names::RATELIMIT_FAIL_OPEN_TOTAL, "class" => class.to_string()).increment(1);
}

/// Set the tokens-remaining gauge for an identifier class.
///
/// Labeled by class, not by full identifier, to keep cardinality bounded.
pub fn set_tokens_remaining(class: &str, tokens: f64) {
    gauge!(names::RATELIMIT_TOKENS_REMAINING, "class" => class.to_string()).set(tokens);
}

/// Derive the identifier class used as a metric label.
///
/// Identifiers follow the `class:member` convention (`user:42`, `ip:10.0.0.1`);
/// only the class segment is used as a label to avoid unbounded cardinality.
pub fn identifier_class(identifier: &str) -> &str {
    match identifier.split_once(':') {
        Some((class, _)) if !class.is_empty() => class,
        _ => "default",
    }
}

// =============================================================================
// Cache Metrics
// =============================================================================

/// Record a cache hit.
pub fn record_cache_hit(tier: &str) {
    counter!(names::CACHE_HITS_TOTAL, "tier" => tier.to_string()).increment(1);
}

/// Record a cache miss.
pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

/// Record a cache eviction.
pub fn record_cache_eviction(tier: &str) {
    counter!(names::CACHE_EVICTIONS_TOTAL, "tier" => tier.to_string()).increment(1);
}

/// Set the number of cache entries held in a tier.
pub fn set_cache_entries(tier: &str, count: usize) {
    gauge!(names::CACHE_ENTRIES, "tier" => tier.to_string()).set(count as f64);
}

/// Record a proactive background refresh of a cache entry.
pub fn record_cache_refresh() {
    counter!(names::CACHE_REFRESH_TOTAL).increment(1);
}

// =============================================================================
// Stampede Prevention Metrics
// =============================================================================

/// Record a load collapsed by stampede prevention (a waiter got the
/// lease holder's value instead of invoking its own loader).
pub fn record_stampede_prevented() {
    counter!(names::STAMPEDE_PREVENTED_TOTAL).increment(1);
}

/// Record a degraded-path load (lease wait exceeded, loader invoked directly).
pub fn record_stampede_degraded() {
    counter!(names::STAMPEDE_DEGRADED_TOTAL).increment(1);
}

// =============================================================================
// Invalidation Metrics
// =============================================================================

/// Record an invalidation by kind (`key`, `pattern`, `tag`).
pub fn record_invalidation(kind: &str) {
    counter!(names::INVALIDATIONS_TOTAL, "kind" => kind.to_string()).increment(1);
}

// =============================================================================
// Write-Behind Metrics
// =============================================================================

/// Record a write-behind flush of `batch_size` buffered entries.
pub fn record_write_behind_flush(batch_size: usize) {
    counter!(names::WRITE_BEHIND_FLUSH_TOTAL).increment(batch_size as u64);
}

/// Record a write-behind set rejected due to a full buffer.
pub fn record_write_behind_rejected() {
    counter!(names::WRITE_BEHIND_REJECTED_TOTAL).increment(1);
}

/// Set the write-behind buffer depth gauge.
pub fn set_write_behind_buffer(entries: usize) {
    gauge!(names::WRITE_BEHIND_BUFFER_ENTRIES).set(entries as f64);
}
