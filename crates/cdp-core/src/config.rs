//! Client configuration: loading, defaults and validation.
//!
//! Settings are loaded in priority order:
//! 1. Environment variables prefixed with `CDP_` (highest priority)
//! 2. Configuration file (`cdp.toml`)
//! 3. Built-in defaults (lowest priority)
//!
//! Settings are then resolved against the customer identity into an
//! immutable [`ClientConfig`]. Resolution validates everything up front so a
//! malformed configuration fails at setup instead of on the first event.

use std::{path::Path, time::Duration};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    error::{CoreError, Result},
    identity::IdentityProvider,
};

const CONFIG_FILE: &str = "cdp.toml";

/// Default number of retries after a failed request.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default fixed delay between retries, in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 3000;

/// Default event type of consent log events.
pub const DEFAULT_CONSENT_EVENT_TYPE: &str = "consentLog";

/// Default category of consent log events.
pub const DEFAULT_CONSENT_EVENT_CATEGORY: &str = "Consent";

/// Client settings as supplied by the host.
///
/// Field aliases accept the camelCase names used by page-side configuration
/// objects (`appSourceId`, `beaconEndpoint`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Application source registered with the platform.
    ///
    /// Environment variable: `CDP_APP_SOURCE_ID`
    #[serde(default, alias = "appSourceId")]
    pub app_source_id: String,

    /// Explicit device id; overrides the customer identity for both the
    /// device and session id.
    ///
    /// Environment variable: `CDP_DEVICE_ID`
    #[serde(default, alias = "deviceId")]
    pub device_id: Option<String>,

    /// Authentication endpoint URL.
    ///
    /// Environment variable: `CDP_AUTH_ENDPOINT`
    #[serde(default, alias = "authEndpoint")]
    pub auth_endpoint: String,

    /// Beacon endpoint URL.
    ///
    /// Environment variable: `CDP_BEACON_ENDPOINT`
    #[serde(default, alias = "beaconEndpoint")]
    pub beacon_endpoint: String,

    /// Retries after the first failed attempt.
    ///
    /// Environment variable: `CDP_RETRY_ATTEMPTS`
    #[serde(default = "default_retry_attempts", alias = "retryAttempts")]
    pub retry_attempts: u32,

    /// Fixed delay between retries in milliseconds.
    ///
    /// Environment variable: `CDP_RETRY_DELAY_MS`
    #[serde(default = "default_retry_delay_ms", alias = "retryDelayMS")]
    pub retry_delay_ms: u64,

    /// Event type used for consent log events.
    #[serde(default = "default_consent_event_type", alias = "consentEventTypeName")]
    pub consent_event_type_name: String,

    /// Category used for consent log events.
    #[serde(default = "default_consent_event_category", alias = "consentEventCategoryName")]
    pub consent_event_category_name: String,

    /// Whether navigation events are tracked automatically.
    #[serde(default, alias = "automaticallyTrackNavigationEvents")]
    pub track_navigation_events: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            app_source_id: String::new(),
            device_id: None,
            auth_endpoint: String::new(),
            beacon_endpoint: String::new(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            consent_event_type_name: default_consent_event_type(),
            consent_event_category_name: default_consent_event_category(),
            track_navigation_events: false,
        }
    }
}

impl ClientSettings {
    /// Loads settings from defaults, `cdp.toml` and `CDP_*` variables.
    pub fn load() -> Result<Self> {
        Self::load_from(CONFIG_FILE)
    }

    /// Loads settings using `path` as the configuration file.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::figment(path).extract()?)
    }

    /// Layered configuration sources, for callers composing their own.
    pub fn figment(path: impl AsRef<Path>) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("CDP_"))
    }
}

/// Immutable per-session client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Application source registered with the platform.
    pub app_source_id: String,
    /// Device id sent with every event and the auth handshake.
    pub device_id: String,
    /// Session id sent with every event.
    pub session_id: String,
    /// Authentication endpoint URL.
    pub auth_endpoint: String,
    /// Beacon endpoint URL.
    pub beacon_endpoint: String,
    /// Retries after the first failed attempt.
    pub retry_attempts: u32,
    /// Fixed delay between retries.
    pub retry_delay: Duration,
    /// Event type used for consent log events.
    pub consent_event_type_name: String,
    /// Category used for consent log events.
    pub consent_event_category_name: String,
    /// Whether navigation events are tracked automatically.
    pub track_navigation_events: bool,
}

impl ClientConfig {
    /// Validates `settings` and resolves device and session ids.
    ///
    /// Both ids default to the customer identity; an explicit device id
    /// replaces both.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidConfiguration` if a required field is
    /// missing or an endpoint is not an absolute http(s) URL.
    pub fn resolve(settings: ClientSettings, identity: &IdentityProvider) -> Result<Self> {
        validate(&settings)?;

        let device_id = match settings.device_id.filter(|id| !id.trim().is_empty()) {
            Some(device_id) => device_id,
            None => identity.customer_identity(),
        };

        let config = Self {
            app_source_id: settings.app_source_id,
            session_id: device_id.clone(),
            device_id,
            auth_endpoint: settings.auth_endpoint,
            beacon_endpoint: settings.beacon_endpoint,
            retry_attempts: settings.retry_attempts,
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
            consent_event_type_name: non_empty_or(
                settings.consent_event_type_name,
                DEFAULT_CONSENT_EVENT_TYPE,
            ),
            consent_event_category_name: non_empty_or(
                settings.consent_event_category_name,
                DEFAULT_CONSENT_EVENT_CATEGORY,
            ),
            track_navigation_events: settings.track_navigation_events,
        };

        info!(
            app_source_id = %config.app_source_id,
            beacon_endpoint = %config.beacon_endpoint,
            retry_attempts = config.retry_attempts,
            "client configuration resolved"
        );
        Ok(config)
    }
}

fn validate(settings: &ClientSettings) -> Result<()> {
    if settings.app_source_id.trim().is_empty() {
        return Err(CoreError::invalid_configuration("app_source_id is required"));
    }
    validate_endpoint("auth_endpoint", &settings.auth_endpoint)?;
    validate_endpoint("beacon_endpoint", &settings.beacon_endpoint)?;
    Ok(())
}

fn validate_endpoint(field: &str, value: &str) -> Result<()> {
    let rest = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"))
        .ok_or_else(|| {
            CoreError::invalid_configuration(format!("{field} must be an http(s) URL"))
        })?;

    if rest.is_empty() || rest.starts_with('/') || rest.chars().any(char::is_whitespace) {
        return Err(CoreError::invalid_configuration(format!("{field} has no valid host")));
    }
    Ok(())
}

fn non_empty_or(value: String, default: &str) -> String {
    if value.trim().is_empty() {
        default.to_string()
    } else {
        value
    }
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

fn default_consent_event_type() -> String {
    DEFAULT_CONSENT_EVENT_TYPE.to_string()
}

fn default_consent_event_category() -> String {
    DEFAULT_CONSENT_EVENT_CATEGORY.to_string()
}
