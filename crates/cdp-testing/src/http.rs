//! wiremock-backed auth and beacon endpoints.

use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use cdp_core::ClientSettings;
use serde_json::Value;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, Request, ResponseTemplate,
};

/// Path of the mocked auth endpoint.
pub const AUTH_PATH: &str = "/auth";

/// Path of the mocked beacon endpoint.
pub const BEACON_PATH: &str = "/event";

/// Session cookie issued by a successful mocked handshake.
pub const SESSION_COOKIE: &str = "cdp_session=test-session";

/// Mock CDP server exposing auth and beacon endpoints.
pub struct MockBeacon {
    server: MockServer,
}

impl MockBeacon {
    /// Starts a new mock server on a random port.
    pub async fn start() -> Self {
        Self { server: MockServer::start().await }
    }

    /// Base URL of the mock server.
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Full auth endpoint URL.
    pub fn auth_url(&self) -> String {
        format!("{}{AUTH_PATH}", self.server.uri())
    }

    /// Full beacon endpoint URL.
    pub fn beacon_url(&self) -> String {
        format!("{}{BEACON_PATH}", self.server.uri())
    }

    /// Client settings pointing at this server with a short retry delay.
    pub fn settings(&self) -> ClientSettings {
        crate::fixtures::settings(&self.auth_url(), &self.beacon_url())
    }

    /// Handshake succeeds and sets the session cookie.
    pub async fn mock_auth_ok(&self) {
        Mock::given(method("POST"))
            .and(path(AUTH_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .append_header("Set-Cookie", format!("{SESSION_COOKIE}; Path=/").as_str()),
            )
            .mount(&self.server)
            .await;
    }

    /// Handshake always answers `status`.
    pub async fn mock_auth_status(&self, status: u16) {
        Mock::given(method("POST"))
            .and(path(AUTH_PATH))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Beacons succeed only when the session cookie is replayed; all others
    /// get 401.
    pub async fn mock_beacon_requires_session(&self) {
        Mock::given(path(BEACON_PATH))
            .and(header("cookie", SESSION_COOKIE))
            .respond_with(ResponseTemplate::new(200))
            .with_priority(1)
            .mount(&self.server)
            .await;
        Mock::given(path(BEACON_PATH))
            .respond_with(ResponseTemplate::new(401))
            .with_priority(10)
            .mount(&self.server)
            .await;
    }

    /// Beacons always answer `status`.
    pub async fn mock_beacon_status(&self, status: u16) {
        Mock::given(path(BEACON_PATH))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Every request received so far.
    pub async fn received_requests(&self) -> Vec<Request> {
        self.server.received_requests().await.unwrap_or_default()
    }

    /// Number of handshake requests received.
    pub async fn auth_request_count(&self) -> usize {
        self.received_requests().await.iter().filter(|r| r.url.path() == AUTH_PATH).count()
    }

    /// Beacon requests received, excluding compatibility probes.
    pub async fn beacon_requests(&self) -> Vec<Request> {
        self.received_requests()
            .await
            .into_iter()
            .filter(|r| r.url.path() == BEACON_PATH)
            .filter(|r| decode_request_events(r).is_some_and(|events| !events.is_empty()))
            .collect()
    }

    /// Events carried by every non-probe beacon, in arrival order.
    pub async fn received_events(&self) -> Vec<Value> {
        self.beacon_requests()
            .await
            .iter()
            .filter_map(decode_request_events)
            .flatten()
            .collect()
    }
}

/// Decodes the events array from a GET query string or a POST form body.
pub fn decode_request_events(request: &Request) -> Option<Vec<Value>> {
    let param = match request.url.query() {
        Some(query) => query.to_string(),
        None => String::from_utf8(request.body.clone()).ok()?,
    };
    decode_event_param(&param)
}

/// Decodes an `event=<base64>` parameter string into its events array.
pub fn decode_event_param(param: &str) -> Option<Vec<Value>> {
    let encoded = param.strip_prefix("event=")?;
    let json = URL_SAFE.decode(encoded).ok()?;
    let batch: Value = serde_json::from_slice(&json).ok()?;
    batch.get("events")?.as_array().cloned()
}
