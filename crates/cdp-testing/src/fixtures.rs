//! Configuration fixtures with test-friendly defaults.

use std::time::Duration;

use cdp_core::{ClientConfig, ClientSettings};

/// App source id used by fixtures.
pub const TEST_APP_SOURCE_ID: &str = "test123";

/// Device id used by fixtures.
pub const TEST_DEVICE_ID: &str = "testdevice";

/// Auth endpoint of the scripted transport.
pub const TEST_AUTH_ENDPOINT: &str = "https://cdp.test/auth";

/// Beacon endpoint of the scripted transport.
pub const TEST_BEACON_ENDPOINT: &str = "https://cdp.test/event";

/// Retry delay used by fixtures, in milliseconds.
pub const TEST_RETRY_DELAY_MS: u64 = 10;

/// Settings for the given endpoints with a short retry delay.
pub fn settings(auth_endpoint: &str, beacon_endpoint: &str) -> ClientSettings {
    ClientSettings {
        app_source_id: TEST_APP_SOURCE_ID.to_string(),
        device_id: Some(TEST_DEVICE_ID.to_string()),
        auth_endpoint: auth_endpoint.to_string(),
        beacon_endpoint: beacon_endpoint.to_string(),
        retry_delay_ms: TEST_RETRY_DELAY_MS,
        ..ClientSettings::default()
    }
}

/// Settings for the scripted transport endpoints.
pub fn test_settings() -> ClientSettings {
    settings(TEST_AUTH_ENDPOINT, TEST_BEACON_ENDPOINT)
}

/// Builder for resolved client configurations.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: ClientConfig,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            config: ClientConfig {
                app_source_id: TEST_APP_SOURCE_ID.to_string(),
                device_id: TEST_DEVICE_ID.to_string(),
                session_id: TEST_DEVICE_ID.to_string(),
                auth_endpoint: TEST_AUTH_ENDPOINT.to_string(),
                beacon_endpoint: TEST_BEACON_ENDPOINT.to_string(),
                retry_attempts: cdp_core::config::DEFAULT_RETRY_ATTEMPTS,
                retry_delay: Duration::from_millis(TEST_RETRY_DELAY_MS),
                consent_event_type_name: cdp_core::config::DEFAULT_CONSENT_EVENT_TYPE.to_string(),
                consent_event_category_name: cdp_core::config::DEFAULT_CONSENT_EVENT_CATEGORY
                    .to_string(),
                track_navigation_events: false,
            },
        }
    }
}

impl ConfigBuilder {
    /// Creates a builder with fixture defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn retry_attempts(mut self, retry_attempts: u32) -> Self {
        self.config.retry_attempts = retry_attempts;
        self
    }

    /// Sets the retry delay.
    #[must_use]
    pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.config.retry_delay = retry_delay;
        self
    }

    /// Sets the beacon endpoint.
    #[must_use]
    pub fn beacon_endpoint(mut self, beacon_endpoint: impl Into<String>) -> Self {
        self.config.beacon_endpoint = beacon_endpoint.into();
        self
    }

    /// Sets the auth endpoint.
    #[must_use]
    pub fn auth_endpoint(mut self, auth_endpoint: impl Into<String>) -> Self {
        self.config.auth_endpoint = auth_endpoint.into();
        self
    }

    /// Finishes the configuration.
    pub fn build(self) -> ClientConfig {
        self.config
    }
}
