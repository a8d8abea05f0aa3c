//! Limiter error types.

/// Errors surfaced by the rate limiter.
///
/// Store failures never appear here: `check` absorbs them by failing
/// open, so the only failure mode visible to callers is invalid
/// configuration at construction time.
#[derive(Debug, thiserror::Error)]
pub enum LimitError {
    /// The limiter configuration is invalid.
    #[error("Invalid rate limiter configuration: {message}")]
    InvalidConfig {
        /// Description of the invalid setting.
        message: String,
    },
}

impl LimitError {
    /// Creates a new `InvalidConfig` error.
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}
