//! Authentication handshake against the auth endpoint.
//!
//! The handshake POSTs the app source and device ids; the server answers by
//! setting the session cookie that later beacons rely on. Failures are
//! retried sequentially with the configured fixed delay.

use std::sync::Arc;

use cdp_core::{Clock, ClientConfig};
use tracing::{debug, info_span, warn, Instrument};

use crate::{
    error::{DeliveryError, Result},
    payload::auth_body,
    retry::{RetryDecision, RetryPolicy},
    transport::{BeaconTransport, HttpRequest},
};

/// Successful handshake response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResponse {
    /// HTTP status of the successful attempt.
    pub status_code: u16,
    /// Raw response body.
    pub body: String,
    /// Attempts it took, including the successful one.
    pub attempts: u32,
}

/// Exchanges device identity for server-side session state.
#[derive(Debug, Clone)]
pub struct Authenticator {
    config: Arc<ClientConfig>,
    transport: Arc<dyn BeaconTransport>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl Authenticator {
    /// Creates an authenticator using the configured retry budget.
    pub fn new(
        config: Arc<ClientConfig>,
        transport: Arc<dyn BeaconTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let policy = RetryPolicy::from_config(&config);
        Self { config, transport, clock, policy }
    }

    /// Runs the handshake, retrying failed attempts.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::RetriesExhausted` carrying the last HTTP status
    /// (or `None` after a transport failure) once every attempt has failed,
    /// and `DeliveryError::Serialization` if the credentials cannot be
    /// encoded.
    pub async fn authenticate(&self) -> Result<AuthResponse> {
        let body = auth_body(&self.config.app_source_id, &self.config.device_id)?;
        let request = HttpRequest::post_form(self.config.auth_endpoint.clone(), body);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let span = info_span!("authenticate", attempt, url = %self.config.auth_endpoint);

            let last_status = match self.transport.execute(request.clone()).instrument(span).await
            {
                Ok(response) if response.is_success() => {
                    debug!(attempt, status = response.status_code, "authentication succeeded");
                    return Ok(AuthResponse {
                        status_code: response.status_code,
                        body: response.body,
                        attempts: attempt,
                    });
                },
                Ok(response) => {
                    warn!(attempt, status = response.status_code, "authentication rejected");
                    Some(response.status_code)
                },
                Err(e) => {
                    warn!(attempt, error = %e, "authentication request failed");
                    None
                },
            };

            match self.policy.decide(attempt) {
                RetryDecision::Retry { delay } => self.clock.sleep(delay).await,
                RetryDecision::GiveUp { reason } => {
                    warn!(attempt, %reason, "giving up on authentication");
                    return Err(DeliveryError::retries_exhausted(attempt, last_status));
                },
            }
        }
    }

    /// Retry policy applied to the handshake.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }
}
