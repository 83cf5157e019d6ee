//! Declarative signals: value extraction and routing to the delivery client.
//!
//! A [`Signal`] names the page element whose events trigger it, the event
//! category and schema it is sent under, and a mapping from payload fields
//! to value sources. Values come either from the host page through a
//! [`PageReader`] or from a named [`DataProvider`]. Binding DOM listeners is
//! the host's job; it asks [`SignalRegistry::bindings`] what to bind and calls
//! back into [`SignalDispatcher::dispatch`] when an element fires.
//!
//! Extraction never fails a dispatch: a value that cannot be read becomes
//! `null` and is logged.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use cdp_core::EventCategory;
use cdp_delivery::{
    event_client::{CONSENT_OPT_IN_STATUS, CONSENT_OPT_OUT_STATUS},
    DeliveryClient, SendOutcome,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

/// Where a page value is looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Under the element that fired the event.
    Event,
    /// Anywhere in the document.
    #[default]
    Document,
}

/// Source of one payload field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "lowercase")]
pub enum FieldMapping {
    /// Text content (or form value) of a page element.
    Page {
        /// CSS selector, or the name of a configured selector
        selector: String,
        /// Root of the lookup
        #[serde(default)]
        scope: Scope,
    },
    /// Attribute of the object returned by a data provider.
    Data {
        /// Registered provider name
        provider: String,
        /// Key read from the provider's result
        attribute: String,
    },
}

/// Element and DOM event type that trigger a signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalTrigger {
    /// Name of a configured selector.
    pub selector: String,
    /// DOM event type, e.g. `click`.
    #[serde(rename = "type")]
    pub event_type: String,
}

/// A declared signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    /// Signal name; `opt-in` / `opt-out` for consent signals.
    pub name: String,
    /// Category the event is sent under.
    pub category: EventCategory,
    /// Schema name, sent as the event type.
    pub schema: String,
    /// What triggers the signal.
    pub event: SignalTrigger,
    /// Payload field sources.
    #[serde(default)]
    pub mapping: BTreeMap<String, FieldMapping>,
}

/// Named element selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    /// CSS selector, or `document` for the document itself.
    pub selector: String,
    /// Only elements whose text contains this, case-insensitively.
    #[serde(default, alias = "containsText", skip_serializing_if = "Option::is_none")]
    pub contains_text: Option<String>,
}

/// Element found by a [`PageReader`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageElement {
    /// Text content.
    pub text: Option<String>,
    /// Form value, for inputs.
    pub value: Option<String>,
}

impl PageElement {
    fn into_value(self) -> Option<String> {
        match self.text {
            Some(text) if !text.is_empty() => Some(text),
            _ => self.value,
        }
    }
}

/// Failure reading a value from the page or a provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ExtractionError {
    message: String,
}

impl ExtractionError {
    /// Creates an extraction error.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Read access to the host page for one event.
pub trait PageReader: Send + Sync {
    /// First element matching `selector` under `scope`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the selector cannot be evaluated.
    fn query(&self, scope: Scope, selector: &str) -> Result<Option<PageElement>, ExtractionError>;
}

/// Named source of event data.
pub trait DataProvider: Send + Sync {
    /// Produces the provider's data for the host event `event`.
    ///
    /// # Errors
    ///
    /// Returns an error if the data cannot be produced.
    fn provide(&self, event: &Value) -> Result<Option<Value>, ExtractionError>;
}

impl<F> DataProvider for F
where
    F: Fn(&Value) -> Result<Option<Value>, ExtractionError> + Send + Sync,
{
    fn provide(&self, event: &Value) -> Result<Option<Value>, ExtractionError> {
        self(event)
    }
}

/// Problems found in the signal configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalError {
    /// Signal refers to a selector that is not configured.
    #[error("signal {signal:?}: the implementation of selector {selector:?} was not found in selectors")]
    UnknownSelector {
        /// Signal name
        signal: String,
        /// Missing selector name
        selector: String,
    },

    /// Dispatch requested for a signal that is not configured.
    #[error("no signal named {name:?} is configured")]
    UnknownSignal {
        /// Requested signal name
        name: String,
    },
}

/// Listener the host should attach for a signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalBinding {
    /// Signal to dispatch when the listener fires.
    pub signal: String,
    /// Elements to listen on.
    pub selector: Selector,
    /// DOM event type to listen for.
    pub event_type: String,
}

impl SignalBinding {
    /// Whether the host should also fire the signal immediately when the
    /// document has already finished loading.
    pub fn fires_on_load(&self) -> bool {
        self.event_type == "readystatechange" && self.selector.selector == "document"
    }
}

/// Host state passed along with one DOM event.
#[derive(Clone, Copy)]
pub struct SignalContext<'a> {
    /// Page access for this event.
    pub page: &'a dyn PageReader,
    /// Host event data, handed to data providers.
    pub event: &'a Value,
}

impl fmt::Debug for SignalContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalContext").field("event", self.event).finish_non_exhaustive()
    }
}

/// Configured signals, selectors and data providers.
#[derive(Default)]
pub struct SignalRegistry {
    signals: Vec<Signal>,
    selectors: BTreeMap<String, Selector>,
    providers: HashMap<String, Arc<dyn DataProvider>>,
}

impl fmt::Debug for SignalRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalRegistry")
            .field("signals", &self.signals)
            .field("selectors", &self.selectors)
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SignalRegistry {
    /// Creates a registry.
    pub fn new(signals: Vec<Signal>, selectors: BTreeMap<String, Selector>) -> Self {
        Self { signals, selectors, providers: HashMap::new() }
    }

    /// Replaces all signals.
    pub fn replace_signals(&mut self, signals: Vec<Signal>) {
        self.signals = signals;
    }

    /// Adds or overwrites selectors by name.
    pub fn merge_selectors(&mut self, selectors: BTreeMap<String, Selector>) {
        self.selectors.extend(selectors);
    }

    /// Registers `provider` under `name`, replacing any previous one.
    pub fn register_provider(&mut self, name: impl Into<String>, provider: Arc<dyn DataProvider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Configured signals.
    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    /// Configured selectors.
    pub fn selectors(&self) -> &BTreeMap<String, Selector> {
        &self.selectors
    }

    /// Signal named `name`.
    pub fn signal(&self, name: &str) -> Option<&Signal> {
        self.signals.iter().find(|signal| signal.name == name)
    }

    /// Reports every signal whose trigger selector is not configured.
    pub fn validate(&self) -> Vec<SignalError> {
        let mut errors: Vec<SignalError> = Vec::new();
        for signal in &self.signals {
            if self.selectors.contains_key(&signal.event.selector) {
                continue;
            }
            let error = SignalError::UnknownSelector {
                signal: signal.name.clone(),
                selector: signal.event.selector.clone(),
            };
            if !errors.contains(&error) {
                errors.push(error);
            }
        }
        errors
    }

    /// Listeners for every signal with a configured trigger selector.
    pub fn bindings(&self) -> Vec<SignalBinding> {
        self.signals
            .iter()
            .filter_map(|signal| {
                let selector = self.selectors.get(&signal.event.selector)?;
                Some(SignalBinding {
                    signal: signal.name.clone(),
                    selector: selector.clone(),
                    event_type: signal.event.event_type.clone(),
                })
            })
            .collect()
    }

    /// Extracts the payload fields of `signal` for one event.
    pub fn extract(&self, signal: &Signal, ctx: SignalContext<'_>) -> Map<String, Value> {
        signal
            .mapping
            .iter()
            .map(|(field, mapping)| {
                let value = match self.extract_field(mapping, ctx) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(signal = %signal.name, field, error = %e, "value extraction failed");
                        Value::Null
                    },
                };
                (field.clone(), value)
            })
            .collect()
    }

    fn extract_field(
        &self,
        mapping: &FieldMapping,
        ctx: SignalContext<'_>,
    ) -> Result<Value, ExtractionError> {
        match mapping {
            FieldMapping::Page { selector, scope } => {
                let element = match ctx.page.query(*scope, selector)? {
                    Some(element) => Some(element),
                    None => {
                        let named = self.selectors.get(selector).ok_or_else(|| {
                            ExtractionError::new(format!("selector {selector:?} matched nothing"))
                        })?;
                        ctx.page.query(*scope, &named.selector)?
                    },
                };
                Ok(element.and_then(PageElement::into_value).map_or(Value::Null, Value::String))
            },
            FieldMapping::Data { provider, attribute } => {
                let provider = self.providers.get(provider).ok_or_else(|| {
                    ExtractionError::new(format!("data provider {provider:?} is not registered"))
                })?;
                let data = provider.provide(ctx.event)?;
                Ok(data.and_then(|data| data.get(attribute).cloned()).unwrap_or(Value::Null))
            },
        }
    }
}

/// What a fired signal turns into.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    /// Consent opt-in.
    ConsentOptIn,
    /// Consent opt-out.
    ConsentOptOut,
    /// Regular event.
    Event {
        /// Event category
        category: EventCategory,
        /// Event type (the signal's schema)
        event_type: String,
        /// Extracted payload fields
        fields: Map<String, Value>,
    },
    /// Consent-schema signal with an unrecognised name; nothing is sent.
    Ignored,
}

/// Decides how a fired signal is delivered.
pub fn route(signal: &Signal, consent_event_type: &str, fields: Map<String, Value>) -> Routed {
    if signal.schema != consent_event_type {
        return Routed::Event {
            category: signal.category.clone(),
            event_type: signal.schema.clone(),
            fields,
        };
    }

    match signal.name.as_str() {
        CONSENT_OPT_IN_STATUS => Routed::ConsentOptIn,
        CONSENT_OPT_OUT_STATUS => Routed::ConsentOptOut,
        _ => Routed::Ignored,
    }
}

/// Runs fired signals through extraction, routing and delivery.
#[derive(Debug, Clone)]
pub struct SignalDispatcher {
    client: DeliveryClient,
    registry: Arc<RwLock<SignalRegistry>>,
}

impl SignalDispatcher {
    /// Creates a dispatcher over a shared registry.
    pub fn new(client: DeliveryClient, registry: Arc<RwLock<SignalRegistry>>) -> Self {
        Self { client, registry }
    }

    /// Dispatches the signal named `name`.
    ///
    /// Returns `Ok(None)` when the signal routes to nothing.
    ///
    /// # Errors
    ///
    /// Returns `SignalError::UnknownSignal` if no such signal is configured.
    pub async fn dispatch(
        &self,
        name: &str,
        ctx: SignalContext<'_>,
    ) -> Result<Option<SendOutcome>, SignalError> {
        let routed = {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            let signal = registry
                .signal(name)
                .ok_or_else(|| SignalError::UnknownSignal { name: name.to_string() })?;
            let fields = registry.extract(signal, ctx);
            route(signal, &self.client.config().consent_event_type_name, fields)
        };
        debug!(signal = name, ?routed, "signal fired");

        let outcome = match routed {
            Routed::ConsentOptIn => Some(self.client.consent_opt_in().await),
            Routed::ConsentOptOut => Some(self.client.consent_opt_out().await),
            Routed::Event { category, event_type, fields } => {
                Some(self.client.send_event(category, &event_type, fields).await)
            },
            Routed::Ignored => None,
        };
        Ok(outcome)
    }
}
