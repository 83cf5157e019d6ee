//! Beacon payload encoding and transport selection.
//!
//! A batch is serialized to JSON, base64 encoded and carried in the `event`
//! parameter. The parameter goes into the query string unless the resulting
//! URL would exceed [`MAX_URL_LENGTH`], in which case the same parameter
//! string is POSTed as a form body.

use std::fmt;

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE},
    Engine as _,
};
use cdp_core::{models::EnvelopeHeader, ClientConfig, EventBatch, EventCategory, EventEnvelope};
use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::{error::Result, transport::HttpRequest};

/// Name of the beacon query/form parameter.
pub const EVENT_PARAM_NAME: &str = "event";

/// Longest URL sent as a GET; anything longer is POSTed.
pub const MAX_URL_LENGTH: usize = 8192;

/// Length of generated event ids, in hex characters.
pub const EVENT_ID_LENGTH: usize = 16;

/// HTTP method chosen for a beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BeaconMethod {
    /// Payload in the query string.
    Get,
    /// Payload in a form-encoded body.
    Post,
}

impl fmt::Display for BeaconMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
        }
    }
}

/// Encodes `batch` as the `event=<base64 json>` parameter string.
///
/// # Errors
///
/// Returns `DeliveryError::Serialization` if the batch cannot be serialized.
pub fn encode_batch(batch: &EventBatch) -> Result<String> {
    let json = serde_json::to_vec(batch)?;
    Ok(format!("{EVENT_PARAM_NAME}={}", URL_SAFE.encode(json)))
}

/// Builds the beacon request for an encoded `event=` parameter.
pub fn beacon_request(beacon_endpoint: &str, event_param: &str) -> (BeaconMethod, HttpRequest) {
    let full_url = format!("{beacon_endpoint}?{event_param}");
    if full_url.len() > MAX_URL_LENGTH {
        (BeaconMethod::Post, HttpRequest::post_form(beacon_endpoint, event_param.to_string()))
    } else {
        (BeaconMethod::Get, HttpRequest::get(full_url))
    }
}

/// Request for the compatibility probe: a GET carrying an empty batch.
///
/// # Errors
///
/// Returns `DeliveryError::Serialization` if the empty batch cannot be
/// serialized.
pub fn probe_request(beacon_endpoint: &str) -> Result<HttpRequest> {
    let param = encode_batch(&EventBatch::default())?;
    Ok(HttpRequest::get(format!("{beacon_endpoint}?{param}")))
}

/// Form body of the auth handshake: `auth=<base64 json credentials>`.
///
/// # Errors
///
/// Returns `DeliveryError::Serialization` if the credentials cannot be
/// serialized.
pub fn auth_body(app_source_id: &str, device_id: &str) -> Result<String> {
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Credentials<'a> {
        app_source_id: &'a str,
        device_id: &'a str,
    }

    let json = serde_json::to_vec(&Credentials { app_source_id, device_id })?;
    Ok(format!("auth={}", STANDARD.encode(json)))
}

/// Generates a 16-character lowercase hex event id.
///
/// The id is a truncated SHA-256 over the envelope's identifying fields, its
/// timestamp and a random salt, so ids differ even for identical events.
pub fn generate_event_id(
    device_id: &str,
    category: &EventCategory,
    event_type: &str,
    date_time: DateTime<Utc>,
) -> String {
    let salt: u64 = rand::rng().random();

    let mut hasher = Sha256::new();
    hasher.update(device_id.as_bytes());
    hasher.update(category.as_str().as_bytes());
    hasher.update(event_type.as_bytes());
    hasher.update(date_time.to_rfc3339_opts(SecondsFormat::Millis, true).as_bytes());
    hasher.update(salt.to_be_bytes());

    let mut id = hex::encode(hasher.finalize());
    id.truncate(EVENT_ID_LENGTH);
    id
}

/// Builds a fresh envelope for one dispatch.
pub fn build_envelope(
    config: &ClientConfig,
    category: EventCategory,
    event_type: &str,
    fields: Map<String, Value>,
    customer_identity: &str,
    now: DateTime<Utc>,
) -> EventEnvelope {
    let event_id = generate_event_id(&config.device_id, &category, event_type, now);
    let header = EnvelopeHeader {
        device_id: config.device_id.clone(),
        session_id: config.session_id.clone(),
        category,
        event_type: event_type.to_string(),
        event_id,
        date_time: now,
    };

    EventEnvelope::new(header, fields, customer_identity)
}
