//! Error types for the delivery pipeline.

use courier_core::CoreError;
use thiserror::Error;

/// Convenient result alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Errors raised while discovering or dispatching deliveries.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Transport-level failure: connection refused, DNS, TLS, reset.
    #[error("network error: {message}")]
    Network {
        /// Human-readable transport failure description.
        message: String,
    },

    /// The destination did not respond within its configured timeout.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout {
        /// The per-attempt timeout that elapsed.
        timeout_ms: u64,
    },

    /// Destination configuration prevents the request being built at all.
    #[error("invalid destination configuration: {0}")]
    Configuration(String),

    /// The backing store failed.
    #[error("store error: {0}")]
    Store(#[from] CoreError),

    /// Envelope serialization failed.
    #[error("failed to serialize event envelope: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DeliveryError {
    /// Classifies a reqwest failure into the transport error taxonomy.
    pub fn from_reqwest(err: &reqwest::Error, timeout_ms: u64) -> Self {
        if err.is_timeout() {
            Self::Timeout { timeout_ms }
        } else if err.is_builder() {
            Self::Configuration(err.to_string())
        } else {
            Self::Network { message: err.to_string() }
        }
    }

    /// True when retrying the same request later could plausibly succeed.
    ///
    /// Transport failures and timeouts are retryable; configuration and
    /// serialization problems will fail identically every time.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. } | Self::Store(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_retryable() {
        assert!(DeliveryError::Network { message: "connection refused".into() }.is_retryable());
        assert!(DeliveryError::Timeout { timeout_ms: 5000 }.is_retryable());
    }

    #[test]
    fn configuration_errors_are_not_retryable() {
        assert!(!DeliveryError::Configuration("bad url".into()).is_retryable());
    }

    #[test]
    fn display_includes_timeout_budget() {
        let err = DeliveryError::Timeout { timeout_ms: 30_000 };
        assert_eq!(err.to_string(), "request timed out after 30000ms");
    }
}
