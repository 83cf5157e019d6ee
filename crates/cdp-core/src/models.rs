//! Core domain models for beacon events and consent.
//!
//! Defines the consent tri-state, event categories and the event envelope
//! that is serialized into beacon payloads. Envelopes are assembled once per
//! dispatch and are read-only afterwards.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Store key holding the customer identity record.
pub const IDENTITY_RECORD: &str = "CustomerCookieID";

/// Store key holding the consent record.
pub const CONSENT_RECORD: &str = "CustomerConsentCookie";

/// Lifetime of persisted consent and identity records, in days.
pub const RECORD_TTL_DAYS: i64 = 180;

/// Persisted value meaning consent was granted.
pub const CONSENT_OPT_IN: &str = "opt_in";

/// Persisted value meaning consent was refused.
pub const CONSENT_OPT_OUT: &str = "opt_out";

/// Consent status as read from the store.
///
/// `Denied` and `Unknown` gate identically; only `Granted` lets events out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentState {
    /// Customer opted in.
    Granted,
    /// Customer explicitly opted out.
    Denied,
    /// No consent record present.
    Unknown,
}

impl ConsentState {
    /// Maps a stored record value onto a consent state.
    pub fn from_record(value: Option<&str>) -> Self {
        match value {
            Some(CONSENT_OPT_IN) => Self::Granted,
            Some(CONSENT_OPT_OUT) => Self::Denied,
            _ => Self::Unknown,
        }
    }

    /// Whether events may be sent under this state.
    pub fn allows_sending(self) -> bool {
        matches!(self, Self::Granted)
    }
}

impl fmt::Display for ConsentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Granted => write!(f, "granted"),
            Self::Denied => write!(f, "denied"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Well-known event categories understood by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventCategory {
    /// Page and content engagement.
    Engagement,
    /// Customer profile updates.
    Profile,
    /// Consent log events.
    Consent,
    /// Behavioral signals.
    Behavioral,
    /// Any category the platform does not predefine.
    Custom(String),
}

impl EventCategory {
    /// Wire name of the category.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Engagement => "Engagement",
            Self::Profile => "Profile",
            Self::Consent => "Consent",
            Self::Behavioral => "Behavioral",
            Self::Custom(name) => name,
        }
    }
}

impl From<String> for EventCategory {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Engagement" => Self::Engagement,
            "Profile" => Self::Profile,
            "Consent" => Self::Consent,
            "Behavioral" => Self::Behavioral,
            _ => Self::Custom(value),
        }
    }
}

impl From<&str> for EventCategory {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<EventCategory> for String {
    fn from(category: EventCategory) -> Self {
        category.as_str().to_string()
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed envelope fields filled in by the delivery client.
#[derive(Debug, Clone)]
pub struct EnvelopeHeader {
    /// Device the event originated from.
    pub device_id: String,
    /// Session the event belongs to.
    pub session_id: String,
    /// Event category.
    pub category: EventCategory,
    /// Event type, typically a schema name.
    pub event_type: String,
    /// 16-character lowercase hex event id.
    pub event_id: String,
    /// Time the event was created.
    pub date_time: DateTime<Utc>,
}

/// A single event record as sent to the beacon endpoint.
///
/// Caller fields override header fields on key collision, except for the
/// customer identity field which is always written last.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct EventEnvelope {
    fields: Map<String, Value>,
}

impl EventEnvelope {
    /// Assembles an envelope from its header, caller fields and identity.
    pub fn new(
        header: EnvelopeHeader,
        caller_fields: Map<String, Value>,
        customer_identity: &str,
    ) -> Self {
        let mut fields = Map::new();
        fields.insert("deviceId".into(), Value::String(header.device_id));
        fields.insert("category".into(), Value::String(header.category.into()));
        fields.insert("eventType".into(), Value::String(header.event_type));
        fields.insert(
            "dateTime".into(),
            Value::String(header.date_time.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        fields.insert("eventId".into(), Value::String(header.event_id));
        fields.insert("sessionId".into(), Value::String(header.session_id));

        fields.extend(caller_fields);
        fields.insert(IDENTITY_RECORD.into(), Value::String(customer_identity.to_string()));

        Self { fields }
    }

    /// Returns a string field of the envelope.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Returns any field of the envelope.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Event id of this envelope.
    pub fn event_id(&self) -> Option<&str> {
        self.get_str("eventId")
    }

    /// Borrow the complete field map.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

/// Batch wrapper serialized into the `event` parameter.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventBatch {
    /// Events in this batch; empty for the compatibility probe.
    pub events: Vec<EventEnvelope>,
}

impl EventBatch {
    /// A batch containing exactly one envelope.
    pub fn single(envelope: EventEnvelope) -> Self {
        Self { events: vec![envelope] }
    }
}
