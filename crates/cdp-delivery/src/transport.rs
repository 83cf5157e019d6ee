//! Transport seam between the delivery loop and the network.
//!
//! The retry loop only ever sees [`HttpRequest`] and [`HttpResponse`]; a
//! non-2xx answer is a successful transport call carrying that status, and
//! only failures to get any answer surface as errors.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::Method;

use crate::error::Result;

/// Content type of the auth handshake and of POSTed beacons.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// A single request to the auth or beacon endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// HTTP method (GET or POST).
    pub method: Method,
    /// Fully assembled URL, including any query string.
    pub url: String,
    /// Request body, if any.
    pub body: Option<Bytes>,
    /// Content type of the body.
    pub content_type: Option<String>,
}

impl HttpRequest {
    /// GET request for `url`.
    pub fn get(url: impl Into<String>) -> Self {
        Self { method: Method::GET, url: url.into(), body: None, content_type: None }
    }

    /// POST request with a form-encoded body.
    pub fn post_form(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            body: Some(body.into()),
            content_type: Some(FORM_CONTENT_TYPE.to_string()),
        }
    }

    /// Body as UTF-8 text, for logging and assertions.
    pub fn body_text(&self) -> Option<String> {
        self.body.as_ref().map(|body| String::from_utf8_lossy(body).into_owned())
    }
}

/// Response from one transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response body (limited size).
    pub body: String,
    /// Total duration of the request.
    pub duration: Duration,
}

impl HttpResponse {
    /// Creates a response with zero duration.
    pub fn new(status_code: u16, body: impl Into<String>) -> Self {
        Self { status_code, body: body.into(), duration: Duration::ZERO }
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Executes requests against the auth and beacon endpoints.
///
/// Implementations must attach persisted credentials (cookies) to every
/// request and apply their own per-attempt timeout.
#[async_trait]
pub trait BeaconTransport: Send + Sync + std::fmt::Debug {
    /// Executes `request` once.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Network` or `DeliveryError::Timeout` when no
    /// HTTP response was received.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_range() {
        assert!(HttpResponse::new(200, "").is_success());
        assert!(HttpResponse::new(204, "").is_success());
        assert!(!HttpResponse::new(199, "").is_success());
        assert!(!HttpResponse::new(401, "").is_success());
        assert!(!HttpResponse::new(500, "").is_success());
    }

    #[test]
    fn form_post_carries_content_type() {
        let request = HttpRequest::post_form("https://cdp.test/event", "event=abc");
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.content_type.as_deref(), Some(FORM_CONTENT_TYPE));
        assert_eq!(request.body_text().as_deref(), Some("event=abc"));

        let request = HttpRequest::get("https://cdp.test/event?event=abc");
        assert!(request.body.is_none());
        assert!(request.content_type.is_none());
    }
}
