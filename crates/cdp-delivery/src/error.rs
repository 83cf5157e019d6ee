//! Error types for authentication and beacon delivery.
//!
//! Transport failures carry the HTTP status when one was received so the
//! retry loop can react to 401s, and exhausted retries report the last
//! status seen. Readiness failures are a distinct variant: callers that
//! dispatch telemetry turn them into dropped events instead of errors.

use std::fmt;

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Errors raised while talking to the auth or beacon endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Network-level failure before any HTTP status was received.
    #[error("network request failed: {message}")]
    Network {
        /// Error message describing the network failure
        message: String,
    },

    /// Request exceeded the transport timeout.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Number of seconds before the request timed out
        timeout_seconds: u64,
    },

    /// Server answered with a non-2xx status.
    #[error("unexpected HTTP status {status_code}")]
    HttpStatus {
        /// HTTP status code
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// All attempts failed.
    #[error("request failed after {attempts} attempts (last status: {})", DisplayStatus(.last_status))]
    RetriesExhausted {
        /// Number of attempts made, including the first
        attempts: u32,
        /// Status of the final attempt; `None` for pure transport errors
        last_status: Option<u16>,
    },

    /// Client never became ready within its readiness budget.
    #[error("event client is not ready after {attempts} checks (probably an authentication problem)")]
    NotReady {
        /// Number of readiness checks performed
        attempts: u32,
    },

    /// Payload could not be serialized.
    #[error("failed to serialize payload: {message}")]
    Serialization {
        /// Serializer error message
        message: String,
    },

    /// Transport could not be configured.
    #[error("invalid transport configuration: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates an HTTP status error.
    pub fn http_status(status_code: u16, body: impl Into<String>) -> Self {
        Self::HttpStatus { status_code, body: body.into() }
    }

    /// Creates a retries exhausted error.
    pub fn retries_exhausted(attempts: u32, last_status: Option<u16>) -> Self {
        Self::RetriesExhausted { attempts, last_status }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// HTTP status associated with this failure, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status_code, .. } => Some(*status_code),
            Self::RetriesExhausted { last_status, .. } => *last_status,
            _ => None,
        }
    }

    /// Whether the server rejected the request as unauthenticated.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::HttpStatus { status_code: 401, .. })
    }
}

impl From<serde_json::Error> for DeliveryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization { message: err.to_string() }
    }
}

struct DisplayStatus<'a>(&'a Option<u16>);

impl fmt::Display for DisplayStatus<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(status) => write!(f, "{status}"),
            None => write!(f, "none"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_extracted() {
        assert_eq!(DeliveryError::http_status(500, "boom").status_code(), Some(500));
        assert_eq!(DeliveryError::retries_exhausted(4, Some(503)).status_code(), Some(503));
        assert_eq!(DeliveryError::retries_exhausted(4, None).status_code(), None);
        assert_eq!(DeliveryError::network("refused").status_code(), None);
    }

    #[test]
    fn unauthorized_identified() {
        assert!(DeliveryError::http_status(401, "").is_unauthorized());
        assert!(!DeliveryError::http_status(403, "").is_unauthorized());
        assert!(!DeliveryError::retries_exhausted(2, Some(401)).is_unauthorized());
    }

    #[test]
    fn error_display_format() {
        assert_eq!(
            DeliveryError::retries_exhausted(4, Some(500)).to_string(),
            "request failed after 4 attempts (last status: 500)"
        );
        assert_eq!(
            DeliveryError::retries_exhausted(2, None).to_string(),
            "request failed after 2 attempts (last status: none)"
        );
        assert_eq!(DeliveryError::timeout(30).to_string(), "request timeout after 30s");
    }
}
