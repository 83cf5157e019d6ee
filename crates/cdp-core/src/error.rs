//! Error types for configuration, storage and consent operations.
//!
//! Configuration problems are surfaced synchronously at setup time and are
//! never retried. Store and cookie errors carry the offending key so the
//! host page can tell which record failed.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for configuration and persistence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Configuration sources could not be merged or deserialized.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(String),

    /// Cookie record rejected before it was written.
    #[error("invalid cookie: {0}")]
    InvalidCookie(String),

    /// Backing store rejected an operation.
    #[error("store error for key {key}: {message}")]
    Store {
        /// Key that was being read or written
        key: String,
        /// Store-specific failure description
        message: String,
    },
}

impl CoreError {
    /// Creates a configuration validation error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    /// Creates a store error for the given key.
    pub fn store(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store { key: key.into(), message: message.into() }
    }
}

impl From<figment::Error> for CoreError {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(err.to_string())
    }
}
