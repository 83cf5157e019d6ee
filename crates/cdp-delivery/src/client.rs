//! reqwest-backed transport with cookies and configurable timeouts.
//!
//! Handles request construction, response processing, and error
//! categorization for the auth and beacon retry loops.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use http::Method;
use reqwest::Response;
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};

use crate::{
    error::{DeliveryError, Result},
    transport::{BeaconTransport, HttpRequest, HttpResponse},
};

const MAX_RESPONSE_BODY_SIZE: usize = 64 * 1024;
const MAX_LOGGED_BODY_SIZE: usize = 1024;

/// Configuration for the HTTP transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Timeout for each HTTP request.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Maximum number of redirects to follow.
    pub max_redirects: u32,
    /// Whether to verify TLS certificates.
    pub verify_tls: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(crate::DEFAULT_TIMEOUT_SECONDS),
            user_agent: concat!("cdp-sdk/", env!("CARGO_PKG_VERSION")).to_string(),
            max_redirects: 3,
            verify_tls: true,
        }
    }
}

/// HTTP transport sharing one cookie store across auth and beacons.
///
/// The auth handshake sets a session cookie that the beacon endpoint checks,
/// so both must go through the same client instance.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: TransportConfig,
}

impl HttpTransport {
    /// Creates a new transport with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the HTTP client cannot be
    /// configured with the provided settings.
    pub fn new(config: TransportConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a new transport with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(TransportConfig::default())
    }

    async fn parse_response(response: Response, duration: Duration) -> HttpResponse {
        let status_code = response.status().as_u16();

        let body = match response.bytes().await {
            Ok(bytes) if bytes.len() > MAX_RESPONSE_BODY_SIZE => {
                let suffix = "... (truncated)";
                let max_content = MAX_LOGGED_BODY_SIZE - suffix.len();
                let truncated = String::from_utf8_lossy(&bytes[..max_content]);
                format!("{truncated}{suffix}")
            },
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                tracing::warn!("failed to read response body: {}", e);
                format!("[failed to read response body: {e}]")
            },
        };

        HttpResponse { status_code, body, duration }
    }
}

#[async_trait]
impl BeaconTransport for HttpTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let start_time = Instant::now();
        let span = info_span!("beacon_request", method = %request.method, url = %request.url);

        async move {
            tracing::debug!("sending request");

            let mut http_request = if request.method == Method::POST {
                self.client.post(&request.url)
            } else {
                self.client.get(&request.url)
            };
            if let Some(content_type) = &request.content_type {
                http_request = http_request.header(reqwest::header::CONTENT_TYPE, content_type);
            }
            if let Some(body) = request.body {
                http_request = http_request.body(body);
            }

            let response = match http_request.send().await {
                Ok(response) => response,
                Err(e) => {
                    let duration = start_time.elapsed();
                    tracing::warn!(duration_ms = duration.as_millis(), "request failed: {}", e);

                    if e.is_timeout() {
                        return Err(DeliveryError::timeout(self.config.timeout.as_secs()));
                    }
                    if e.is_connect() {
                        return Err(DeliveryError::network(format!("connection failed: {e}")));
                    }
                    return Err(DeliveryError::network(e.to_string()));
                },
            };

            let duration = start_time.elapsed();
            let response = Self::parse_response(response, duration).await;

            match response.status_code {
                200..=299 => {
                    tracing::debug!(
                        status = response.status_code,
                        duration_ms = duration.as_millis(),
                        "request succeeded"
                    );
                },
                status => {
                    tracing::warn!(status, duration_ms = duration.as_millis(), "error response");
                },
            }

            Ok(response)
        }
        .instrument(span)
        .await
    }
}
