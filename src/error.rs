//! Engine Error Types
//!
//! Error types for the synchronization engine. Failures are split between
//! local concerns (`SyncError`: storage, serialization, malformed calls) and
//! transport concerns (`ApiError`: network, timeout, unusable response).
//!
//! # Propagation Policy
//!
//! Most failures never cross the engine's public boundary as errors: the
//! snapshot store degrades to `false`/`None` returns, the queue keeps
//! operations in memory when the durable write fails, and the coordinator
//! absorbs transport errors into connectivity state. These types exist for
//! the internal seams and for the few calls (malformed mutations, engine
//! construction) where a hard failure is the correct answer.
use thiserror::Error;

/// Errors raised by the engine's local components
#[derive(Debug, Error)]
pub enum SyncError {
    /// Local database failure
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// JSON serialization or deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A caller asked for something structurally impossible
    #[error("Invalid operation: {message}")]
    InvalidOperation {
        /// Human-readable error message
        message: String,
    },

    /// Transport construction failure
    #[error("Transport error: {0}")]
    Transport(#[from] ApiError),
}

impl SyncError {
    /// Create a new invalid-operation error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}

/// Errors raised by the remote API transport
///
/// `Network` and `Timeout` are transient: the operation stays queued and is
/// retried on the next trigger. A server that answers but rejects the
/// operation is not an `ApiError`; that comes back as a normal response
/// with `ok == false`.
#[derive(Debug, Error, Clone)]
pub enum ApiError {
    /// Transport-level failure (connection refused, DNS, non-2xx status)
    #[error("Network error: {message}")]
    Network {
        /// Human-readable error message
        message: String,
    },

    /// The send did not resolve within the client-side bound
    #[error("Request timed out")]
    Timeout,

    /// The server answered with something that is not a response envelope
    #[error("Invalid response: {message}")]
    InvalidResponse {
        /// Human-readable error message
        message: String,
    },
}

impl ApiError {
    /// Create a new network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a new invalid-response error
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    /// Whether a retry on the next connectivity trigger makes sense
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_operation() {
        let error = SyncError::invalid("update without target id");
        match error {
            SyncError::InvalidOperation { message } => {
                assert_eq!(message, "update without target id");
            }
            _ => panic!("Expected InvalidOperation"),
        }
    }

    #[test]
    fn test_transient_classification() {
        assert!(ApiError::network("connection refused").is_transient());
        assert!(ApiError::Timeout.is_transient());
        assert!(!ApiError::invalid_response("not json").is_transient());
    }

    #[test]
    fn test_error_display() {
        let error = ApiError::network("connection refused");
        let display = format!("{}", error);
        assert!(display.contains("Network error"));
        assert!(display.contains("connection refused"));
    }

    #[test]
    fn test_from_serde_error() {
        let result: Result<serde_json::Value, _> = serde_json::from_str("{ not json }");
        let sync_error: SyncError = result.unwrap_err().into();
        match sync_error {
            SyncError::Serialization(_) => {}
            _ => panic!("Expected Serialization error"),
        }
    }
}
