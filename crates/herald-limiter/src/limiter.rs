//! Token bucket admission controller.

use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

use herald_core::metrics;
use herald_store::{AtomicBucketStore, BucketParams, now_unix_ms};

use crate::config::RateLimiterConfig;
use crate::error::LimitError;

/// Outcome of one admission check.
///
/// The HTTP middleware translates this into `X-RateLimit-*` headers and
/// a `429` with `Retry-After` on rejection; that translation lives
/// outside this crate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitDecision {
    /// Whether the request is admitted.
    pub allowed: bool,
    /// Whole tokens left after this check.
    pub remaining: u64,
    /// When the bucket will be back at steady-state capacity.
    pub reset_at: OffsetDateTime,
    /// How long to wait before one token is available. Set on denial.
    pub retry_after: Option<Duration>,
}

/// Distributed token bucket limiter.
///
/// Each identifier gets one bucket in the shared store, refilled lazily
/// on every check. A never-seen identifier starts with a **full**
/// bucket: the conventional choice, granting the configured burst on
/// first contact rather than making new clients earn tokens.
///
/// ## Failure semantics
///
/// Any store failure (timeout, connection loss, CAS exhaustion) fails
/// open: the request is admitted, the degradation is logged and counted,
/// and the caller is never blocked past the configured store timeout.
pub struct RateLimiter {
    buckets: Arc<dyn AtomicBucketStore>,
    params: BucketParams,
    key_prefix: String,
    store_timeout: Duration,
}

impl RateLimiter {
    /// Create a limiter over an atomic bucket store.
    ///
    /// # Errors
    ///
    /// Returns `LimitError::InvalidConfig` for non-positive rates or a
    /// burst multiplier below 1.
    pub fn new(
        buckets: Arc<dyn AtomicBucketStore>,
        config: RateLimiterConfig,
    ) -> Result<Self, LimitError> {
        config.validate()?;
        Ok(Self {
            buckets,
            params: BucketParams {
                capacity: config.capacity,
                refill_rate: config.refill_rate,
                burst_multiplier: config.burst_multiplier,
            },
            key_prefix: config.key_prefix,
            store_timeout: Duration::from_millis(config.store_timeout_ms),
        })
    }

    /// Check whether one request for `identifier` is admitted, consuming
    /// a token if so.
    ///
    /// Identifiers follow the `class:member` convention (`user:42`,
    /// `ip:10.0.0.1`); the class segment labels the emitted metrics.
    pub async fn check(&self, identifier: &str) -> RateLimitDecision {
        let key = format!("{}:{}", self.key_prefix, identifier);
        let class = metrics::identifier_class(identifier);
        let now_ms = now_unix_ms();

        let outcome = tokio::time::timeout(
            self.store_timeout,
            self.buckets.check_and_consume(&key, &self.params, now_ms, 1.0),
        )
        .await;

        let snapshot = match outcome {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => {
                tracing::warn!(identifier = %identifier, error = %e,
                    "bucket store failed, admitting request (fail open)");
                metrics::record_ratelimit_fail_open(class);
                return self.fail_open_decision();
            }
            Err(_) => {
                tracing::warn!(identifier = %identifier,
                    timeout_ms = self.store_timeout.as_millis() as u64,
                    "bucket store timed out, admitting request (fail open)");
                metrics::record_ratelimit_fail_open(class);
                return self.fail_open_decision();
            }
        };

        metrics::set_tokens_remaining(class, snapshot.tokens);
        if snapshot.allowed {
            metrics::record_ratelimit_allowed(class);
        } else {
            metrics::record_ratelimit_denied(class);
            tracing::debug!(identifier = %identifier, tokens = snapshot.tokens,
                "request rate limited");
        }

        let now = OffsetDateTime::now_utc();
        let deficit = (self.params.capacity - snapshot.tokens).max(0.0);
        let reset_at = now + Duration::from_secs_f64(deficit / self.params.refill_rate);

        let retry_after = if snapshot.allowed {
            None
        } else {
            Some(Duration::from_secs_f64(
                (1.0 - snapshot.tokens).max(0.0) / self.params.refill_rate,
            ))
        };

        RateLimitDecision {
            allowed: snapshot.allowed,
            remaining: snapshot.tokens.floor().max(0.0) as u64,
            reset_at,
            retry_after,
        }
    }

    fn fail_open_decision(&self) -> RateLimitDecision {
        RateLimitDecision {
            allowed: true,
            remaining: self.params.max_tokens().floor() as u64,
            reset_at: OffsetDateTime::now_utc(),
            retry_after: None,
        }
    }
}
