//! Error types for state store operations.

/// Errors that can occur while talking to the shared state store.
///
/// All variants are infrastructure failures: the components built on top
/// of the store absorb them at their boundary (the limiter fails open,
/// the cache falls through to the loader) and surface them only through
/// logs and metrics.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store call exceeded its bounded timeout.
    #[error("Store operation timed out: {operation}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
    },

    /// Failed to reach the store at all.
    #[error("Store connection error: {message}")]
    Connection {
        /// Description of the connection failure.
        message: String,
    },

    /// Failed to obtain a pooled connection.
    #[error("Store pool error: {message}")]
    Pool {
        /// Description of the pool failure.
        message: String,
    },

    /// The store returned an unexpected or malformed response.
    #[error("Store response error: {message}")]
    Response {
        /// Description of the unexpected response.
        message: String,
    },

    /// A stored value could not be encoded or decoded.
    #[error("Store serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// A compare-and-swap loop exhausted its retry budget.
    #[error("Store contention: {operation} exhausted {attempts} attempts")]
    Contention {
        /// The contended operation.
        operation: String,
        /// Number of attempts made before giving up.
        attempts: u32,
    },
}

impl StoreError {
    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Creates a new `Connection` error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a new `Pool` error.
    #[must_use]
    pub fn pool(message: impl Into<String>) -> Self {
        Self::Pool {
            message: message.into(),
        }
    }

    /// Creates a new `Response` error.
    #[must_use]
    pub fn response(message: impl Into<String>) -> Self {
        Self::Response {
            message: message.into(),
        }
    }

    /// Creates a new `Serialization` error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a new `Contention` error.
    #[must_use]
    pub fn contention(operation: impl Into<String>, attempts: u32) -> Self {
        Self::Contention {
            operation: operation.into(),
            attempts,
        }
    }

    /// Returns `true` if this is a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if this is a contention exhaustion.
    #[must_use]
    pub fn is_contention(&self) -> bool {
        matches!(self, Self::Contention { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::timeout("GET");
        assert_eq!(err.to_string(), "Store operation timed out: GET");
        assert!(err.is_timeout());

        let err = StoreError::contention("bucket", 8);
        assert_eq!(err.to_string(), "Store contention: bucket exhausted 8 attempts");
        assert!(err.is_contention());
    }
}
