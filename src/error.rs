//! SDK-level errors.

use cdp_core::CoreError;
use cdp_delivery::DeliveryError;
use thiserror::Error;

/// Result type alias for SDK operations.
pub type Result<T> = std::result::Result<T, SdkError>;

/// Errors surfaced to the host application.
///
/// Event dispatch never produces these; only setup and telemetry can fail.
#[derive(Debug, Error)]
pub enum SdkError {
    /// Configuration was rejected or could not be loaded.
    #[error(transparent)]
    Config(#[from] CoreError),

    /// Transport could not be constructed.
    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    /// `configure` was called outside a tokio runtime.
    #[error("no tokio runtime available to run the authentication handshake")]
    NoRuntime,

    /// Logging could not be installed or reconfigured.
    #[error("telemetry error: {0}")]
    Telemetry(String),
}

impl SdkError {
    /// Creates a telemetry error.
    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }
}
