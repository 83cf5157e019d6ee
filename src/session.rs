//! The host-facing session: one configured SDK instance.
//!
//! A [`Session`] owns the delivery client, the signal registry and the
//! background readiness handshake. Configuration is validated before
//! anything is spawned, so a bad configuration never leaves a half-built
//! session behind.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use cdp_core::{
    ClientConfig, ClientSettings, Clock, ConsentGate, CoreError, EventCategory, IdentityProvider,
    RealClock, Store,
};
use cdp_delivery::{
    Authenticator, BeaconTransport, DeliveryClient, HttpTransport, SendOutcome, StatsSnapshot,
};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::{runtime::Handle, task::JoinHandle};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    error::{Result, SdkError},
    signals::{
        DataProvider, Selector, Signal, SignalBinding, SignalContext, SignalDispatcher,
        SignalError, SignalRegistry,
    },
    telemetry::LogLevel,
};

/// Event type of automatically tracked navigation events.
pub const NAVIGATION_EVENT_TYPE: &str = "navigation";

/// Full session configuration as supplied to [`Session::configure`].
///
/// Unknown attributes are rejected when deserializing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SessionConfig {
    /// Delivery client settings.
    pub client: ClientSettings,
    /// Declared signals.
    #[serde(default)]
    pub signals: Vec<Signal>,
    /// Named selectors referenced by signals.
    #[serde(default)]
    pub selectors: BTreeMap<String, Selector>,
    /// Requested log level, applied by the host through
    /// [`init_tracing`](crate::telemetry::init_tracing).
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Configuration merged into a running session by [`Session::register`].
///
/// Unknown attributes are rejected when deserializing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PartialConfig {
    /// Client settings; only accepted so they can be refused with a clear
    /// error, since a running session's client is fixed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientSettings>,
    /// Replaces every configured signal when present.
    #[serde(default)]
    pub signals: Option<Vec<Signal>>,
    /// Merged into the configured selectors by name.
    #[serde(default)]
    pub selectors: BTreeMap<String, Selector>,
}

/// Snapshot of a session's effective configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationSnapshot {
    /// Resolved client configuration.
    pub client: ClientConfig,
    /// Configured signals.
    pub signals: Vec<Signal>,
    /// Configured selectors.
    pub selectors: BTreeMap<String, Selector>,
}

/// A configured SDK instance.
#[derive(Debug)]
pub struct Session {
    client: DeliveryClient,
    registry: Arc<RwLock<SignalRegistry>>,
    dispatcher: SignalDispatcher,
    signal_errors: Mutex<Vec<SignalError>>,
    handshake: Mutex<Option<JoinHandle<cdp_delivery::Result<()>>>>,
}

impl Session {
    /// Configures a session over a real clock.
    ///
    /// # Errors
    ///
    /// See [`configure_with_clock`](Self::configure_with_clock).
    pub fn configure(
        config: SessionConfig,
        store: Arc<dyn Store>,
        transport: Arc<dyn BeaconTransport>,
    ) -> Result<Self> {
        Self::configure_with_clock(config, store, transport, Arc::new(RealClock::new()))
    }

    /// Configures a session delivering over HTTP with the default transport.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::Delivery` if the HTTP client cannot be built, and
    /// otherwise fails as [`configure_with_clock`](Self::configure_with_clock).
    pub fn configure_http(config: SessionConfig, store: Arc<dyn Store>) -> Result<Self> {
        let transport = Arc::new(HttpTransport::with_defaults()?);
        Self::configure(config, store, transport)
    }

    /// Validates `config`, builds the delivery stack and starts the
    /// readiness handshake on the current tokio runtime.
    ///
    /// Signal configuration problems do not fail setup; they are available
    /// from [`signal_errors`](Self::signal_errors).
    ///
    /// # Errors
    ///
    /// Returns `SdkError::Config` if the client settings are invalid, or
    /// `SdkError::NoRuntime` outside a tokio runtime.
    pub fn configure_with_clock(
        config: SessionConfig,
        store: Arc<dyn Store>,
        transport: Arc<dyn BeaconTransport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let identity = IdentityProvider::new(store.clone());
        let client_config = Arc::new(ClientConfig::resolve(config.client, &identity)?);
        let runtime = Handle::try_current().map_err(|_| SdkError::NoRuntime)?;

        let authenticator =
            Authenticator::new(client_config.clone(), transport.clone(), clock.clone());
        let consent = ConsentGate::new(store, identity, clock.clone());
        let client = DeliveryClient::new(client_config, authenticator, consent, transport, clock);

        let registry = SignalRegistry::new(config.signals, config.selectors);
        let signal_errors = registry.validate();
        for e in &signal_errors {
            warn!(error = %e, "signal configuration error");
        }
        let registry = Arc::new(RwLock::new(registry));
        let dispatcher = SignalDispatcher::new(client.clone(), registry.clone());

        let handshake = {
            let client = client.clone();
            let span = info_span!(
                "readiness_handshake",
                app_source_id = %client.config().app_source_id
            );
            runtime.spawn(async move { client.establish_readiness().await }.instrument(span))
        };

        info!(
            app_source_id = %client.config().app_source_id,
            signals = registry.read().unwrap_or_else(PoisonError::into_inner).signals().len(),
            "session configured"
        );

        Ok(Self {
            client,
            registry,
            dispatcher,
            signal_errors: Mutex::new(signal_errors),
            handshake: Mutex::new(Some(handshake)),
        })
    }

    /// Merges `partial` into the signal configuration.
    ///
    /// Signals are replaced wholesale when given; selectors are merged by
    /// name.
    ///
    /// Returns the signal errors of the merged configuration.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::Config` if `partial` carries client settings;
    /// nothing is merged in that case.
    pub fn register(&self, partial: PartialConfig) -> Result<Vec<SignalError>> {
        if partial.client.is_some() {
            return Err(CoreError::invalid_configuration(
                "client settings cannot change on a configured session; configure a new session",
            )
            .into());
        }

        let errors = {
            let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(signals) = partial.signals {
                registry.replace_signals(signals);
            }
            registry.merge_selectors(partial.selectors);
            registry.validate()
        };
        for e in &errors {
            warn!(error = %e, "signal configuration error");
        }
        debug!(errors = errors.len(), "signal configuration registered");

        *self.signal_errors.lock().unwrap_or_else(PoisonError::into_inner) = errors.clone();
        Ok(errors)
    }

    /// Registers a data provider that signal mappings can read from.
    pub fn register_data_provider(
        &self,
        name: impl Into<String>,
        provider: Arc<dyn DataProvider>,
    ) {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register_provider(name, provider);
    }

    /// Signal errors of the current configuration.
    pub fn signal_errors(&self) -> Vec<SignalError> {
        self.signal_errors.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Listeners the host should attach.
    pub fn bindings(&self) -> Vec<SignalBinding> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner).bindings()
    }

    /// Handles a fired signal.
    ///
    /// # Errors
    ///
    /// Returns `SignalError::UnknownSignal` if `signal` is not configured.
    pub async fn dispatch(
        &self,
        signal: &str,
        ctx: SignalContext<'_>,
    ) -> std::result::Result<Option<SendOutcome>, SignalError> {
        self.dispatcher.dispatch(signal, ctx).await
    }

    /// Sends an event if ready and consented.
    pub async fn send_event(
        &self,
        category: impl Into<EventCategory>,
        event_type: &str,
        fields: Map<String, Value>,
    ) -> SendOutcome {
        self.client.send_event(category, event_type, fields).await
    }

    /// Records consent and grants it.
    pub async fn consent_opt_in(&self) -> SendOutcome {
        self.client.consent_opt_in().await
    }

    /// Records the opt-out and revokes consent.
    pub async fn consent_opt_out(&self) -> SendOutcome {
        self.client.consent_opt_out().await
    }

    /// Reports a page navigation.
    ///
    /// Returns `None` when navigation tracking is disabled.
    pub async fn navigated(&self, url: &str) -> Option<SendOutcome> {
        if !self.client.config().track_navigation_events {
            return None;
        }

        let fields = match json!({ "url": url }) {
            Value::Object(fields) => fields,
            _ => Map::new(),
        };
        Some(self.client.send_event(EventCategory::Behavioral, NAVIGATION_EVENT_TYPE, fields).await)
    }

    /// Effective configuration.
    pub fn configuration(&self) -> ConfigurationSnapshot {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        ConfigurationSnapshot {
            client: self.client.config().clone(),
            signals: registry.signals().to_vec(),
            selectors: registry.selectors().clone(),
        }
    }

    /// Dispatch totals so far.
    pub fn stats(&self) -> StatsSnapshot {
        self.client.stats()
    }

    /// Whether events can currently be sent.
    pub fn is_ready(&self) -> bool {
        self.client.is_ready()
    }

    /// Waits for the initial readiness handshake to finish.
    ///
    /// Returns whether the session is ready afterwards.
    pub async fn wait_ready(&self) -> bool {
        let handshake = self.handshake.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handshake) = handshake {
            match handshake.await {
                Ok(Ok(())) => {},
                Ok(Err(e)) => debug!(error = %e, "readiness handshake failed"),
                Err(e) => warn!(error = %e, "readiness handshake task failed"),
            }
        }
        self.client.is_ready()
    }

    /// Underlying delivery client.
    pub fn client(&self) -> &DeliveryClient {
        &self.client
    }
}

/// First value of query parameter `name` in `url`, decoded the way HTML
/// forms encode it (`+` for space, percent escapes).
///
/// Returns `None` when the parameter is absent; a parameter without `=`
/// yields an empty string.
pub fn url_param(url: &str, name: &str) -> Option<String> {
    let query = match url.split_once('?') {
        Some((_, query)) => query,
        None => url,
    };
    let query = query.split_once('#').map_or(query, |(query, _)| query);

    query.split('&').filter(|pair| !pair.is_empty()).find_map(|pair| {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        (decode_form_component(key) == name).then(|| decode_form_component(value))
    })
}

fn decode_form_component(component: &str) -> String {
    let spaced = component.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(handshake) = self.handshake.get_mut().ok().and_then(Option::take) {
            handshake.abort();
        }
    }
}
