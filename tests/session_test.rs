//! Session lifecycle over a scripted transport and virtual time.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use std::{collections::HashMap, sync::Arc};

use cdp_core::{
    models::{CONSENT_OPT_IN, CONSENT_RECORD},
    ConsentState, MemoryStore, Store, TestClock,
};
use cdp_delivery::{BeaconMethod, HttpRequest, SendOutcome};
use cdp_sdk::{
    session::NAVIGATION_EVENT_TYPE, ExtractionError, PageElement, PageReader, PartialConfig,
    Scope, SdkError, Session, SessionConfig, SignalContext, SignalError,
};
use cdp_testing::{
    decode_event_param,
    fixtures::{TEST_AUTH_ENDPOINT, TEST_BEACON_ENDPOINT},
    test_settings, ScriptedTransport,
};
use serde_json::{json, Map, Value};

struct StaticPage {
    text: HashMap<String, String>,
}

impl StaticPage {
    fn new(entries: &[(&str, &str)]) -> Self {
        Self { text: entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect() }
    }
}

impl PageReader for StaticPage {
    fn query(&self, _scope: Scope, selector: &str) -> Result<Option<PageElement>, ExtractionError> {
        Ok(self
            .text
            .get(selector)
            .map(|text| PageElement { text: Some(text.clone()), value: None }))
    }
}

fn session_config(extra: Value) -> SessionConfig {
    let mut config = json!({
        "client": serde_json::to_value(test_settings()).unwrap(),
        "signals": [
            {
                "name": "opt-in",
                "category": "Consent",
                "schema": "consentLog",
                "event": { "selector": "acceptButton", "type": "click" }
            },
            {
                "name": "opt-out",
                "category": "Consent",
                "schema": "consentLog",
                "event": { "selector": "rejectButton", "type": "click" }
            },
            {
                "name": "addToCart",
                "category": "Engagement",
                "schema": "cartAdd",
                "event": { "selector": "addButton", "type": "click" },
                "mapping": {
                    "sku": { "from": "page", "selector": ".sku" },
                    "user": { "from": "data", "provider": "account", "attribute": "id" }
                }
            }
        ],
        "selectors": {
            "acceptButton": { "selector": "#accept" },
            "rejectButton": { "selector": "#reject" },
            "addButton": { "selector": "button.add" }
        }
    });
    if let (Value::Object(config), Value::Object(extra)) = (&mut config, extra) {
        config.extend(extra);
    }
    serde_json::from_value(config).unwrap()
}

struct Fixture {
    session: Session,
    transport: Arc<ScriptedTransport>,
    store: Arc<MemoryStore>,
}

fn fixture(config: SessionConfig) -> Fixture {
    let transport = Arc::new(ScriptedTransport::new());
    let store = Arc::new(MemoryStore::new());
    let session = Session::configure_with_clock(
        config,
        store.clone(),
        transport.clone(),
        Arc::new(TestClock::new()),
    )
    .expect("valid configuration");
    Fixture { session, transport, store }
}

fn sent_events(requests: &[HttpRequest]) -> Vec<Value> {
    requests
        .iter()
        .filter_map(|request| match request.url.split_once('?') {
            Some((_, query)) => decode_event_param(query),
            None => request.body_text().and_then(|body| decode_event_param(&body)),
        })
        .flatten()
        .collect()
}

#[test]
fn configure_outside_runtime_fails() {
    let result = Session::configure(
        session_config(json!({})),
        Arc::new(MemoryStore::new()),
        Arc::new(ScriptedTransport::new()),
    );

    assert!(matches!(result, Err(SdkError::NoRuntime)));
}

#[tokio::test]
async fn invalid_settings_fail_before_any_request() {
    let transport = Arc::new(ScriptedTransport::new());
    let mut config = session_config(json!({}));
    config.client.app_source_id.clear();

    let result = Session::configure(config, Arc::new(MemoryStore::new()), transport.clone());

    assert!(matches!(result, Err(SdkError::Config(_))));
    tokio::task::yield_now().await;
    assert_eq!(transport.request_count(), 0);
}

#[tokio::test]
async fn configure_runs_handshake_in_background() {
    let f = fixture(session_config(json!({})));

    assert!(f.session.wait_ready().await);
    assert_eq!(f.transport.count_to(TEST_AUTH_ENDPOINT), 1);
    assert_eq!(f.transport.count_to(TEST_BEACON_ENDPOINT), 1);
    assert!(f.session.signal_errors().is_empty());
    assert_eq!(f.session.bindings().len(), 3);
}

#[tokio::test]
async fn failed_handshake_leaves_session_not_ready() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond(TEST_AUTH_ENDPOINT, 500);
    let session = Session::configure_with_clock(
        session_config(json!({})),
        Arc::new(MemoryStore::new()),
        transport.clone(),
        Arc::new(TestClock::new()),
    )
    .unwrap();

    assert!(!session.wait_ready().await);
    assert_eq!(transport.count_to(TEST_BEACON_ENDPOINT), 0);

    let outcome = session.send_event("Engagement", "click", Map::new()).await;
    assert_eq!(outcome, SendOutcome::DroppedNotReady);
    assert_eq!(transport.count_to(TEST_BEACON_ENDPOINT), 0);
}

#[tokio::test]
async fn events_wait_for_consent() {
    let f = fixture(session_config(json!({})));
    f.session.wait_ready().await;
    f.transport.clear_requests();

    let dropped = f.session.send_event("Engagement", "click", Map::new()).await;
    assert_eq!(dropped, SendOutcome::DroppedNoConsent);
    assert_eq!(f.transport.request_count(), 0);

    f.store.set(CONSENT_RECORD, CONSENT_OPT_IN, None).unwrap();
    let delivered = f.session.send_event("Engagement", "click", Map::new()).await;
    assert_eq!(delivered, SendOutcome::Delivered { method: BeaconMethod::Get });

    let stats = f.session.stats();
    assert_eq!(stats.dropped_no_consent, 1);
    assert_eq!(stats.delivered, 1);
}

#[tokio::test]
async fn consent_signals_drive_the_gate() {
    let f = fixture(session_config(json!({})));
    f.session.wait_ready().await;
    f.transport.clear_requests();
    let page = StaticPage::new(&[]);
    let event = json!({});
    let ctx = SignalContext { page: &page, event: &event };

    let opt_in = f.session.dispatch("opt-in", ctx).await.unwrap();
    assert!(opt_in.is_some_and(|outcome| outcome.is_delivered()));
    assert_eq!(f.session.client().consent().state(), ConsentState::Granted);

    let opt_out = f.session.dispatch("opt-out", ctx).await.unwrap();
    assert!(opt_out.is_some_and(|outcome| outcome.is_delivered()));
    assert_eq!(f.session.client().consent().state(), ConsentState::Unknown);

    let events = sent_events(&f.transport.requests_to(TEST_BEACON_ENDPOINT));
    let statuses: Vec<_> = events.iter().map(|event| event["status"].clone()).collect();
    assert_eq!(statuses, vec![json!("opt-in"), json!("opt-out")]);
    assert!(events.iter().all(|event| event["eventType"] == "consentLog"));
    assert!(events.iter().all(|event| event["category"] == "Consent"));
}

#[tokio::test]
async fn mapped_signal_sends_extracted_fields() {
    let f = fixture(session_config(json!({})));
    f.session.wait_ready().await;
    f.store.set(CONSENT_RECORD, CONSENT_OPT_IN, None).unwrap();
    f.session.register_data_provider(
        "account",
        Arc::new(|_: &Value| Ok::<_, ExtractionError>(Some(json!({ "id": "u-7" })))),
    );
    f.transport.clear_requests();

    let page = StaticPage::new(&[(".sku", "3040131BF0")]);
    let event = json!({});
    let outcome = f
        .session
        .dispatch("addToCart", SignalContext { page: &page, event: &event })
        .await
        .unwrap();

    assert_eq!(outcome, Some(SendOutcome::Delivered { method: BeaconMethod::Get }));
    let events = sent_events(&f.transport.requests_to(TEST_BEACON_ENDPOINT));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["eventType"], "cartAdd");
    assert_eq!(events[0]["category"], "Engagement");
    assert_eq!(events[0]["sku"], "3040131BF0");
    assert_eq!(events[0]["user"], "u-7");
}

#[tokio::test]
async fn unknown_signal_is_an_error() {
    let f = fixture(session_config(json!({})));
    let page = StaticPage::new(&[]);
    let event = json!({});

    let result = f.session.dispatch("nope", SignalContext { page: &page, event: &event }).await;

    assert_eq!(result, Err(SignalError::UnknownSignal { name: "nope".into() }));
}

#[tokio::test]
async fn register_replaces_signals_and_merges_selectors() {
    let f = fixture(session_config(json!({})));
    let partial: PartialConfig = serde_json::from_value(json!({
        "signals": [{
            "name": "scrolled",
            "category": "Behavioral",
            "schema": "scroll",
            "event": { "selector": "pageBody", "type": "scroll" }
        }],
        "selectors": { "addButton": { "selector": "button.add-v2" } }
    }))
    .unwrap();

    let errors = f.session.register(partial).unwrap();

    assert_eq!(
        errors,
        vec![SignalError::UnknownSelector { signal: "scrolled".into(), selector: "pageBody".into() }]
    );
    assert_eq!(f.session.signal_errors(), errors);
    let configuration = f.session.configuration();
    assert_eq!(configuration.signals.len(), 1);
    assert_eq!(configuration.selectors["addButton"].selector, "button.add-v2");
    assert!(configuration.selectors.contains_key("acceptButton"));
    assert!(f.session.bindings().is_empty());
}

#[tokio::test]
async fn navigation_tracking_follows_settings() {
    let disabled = fixture(session_config(json!({})));
    disabled.session.wait_ready().await;
    assert_eq!(disabled.session.navigated("https://shop.test/cart").await, None);

    let mut config = session_config(json!({}));
    config.client.track_navigation_events = true;
    let enabled = fixture(config);
    enabled.session.wait_ready().await;
    enabled.store.set(CONSENT_RECORD, CONSENT_OPT_IN, None).unwrap();
    enabled.transport.clear_requests();

    let outcome = enabled.session.navigated("https://shop.test/cart").await;

    assert_eq!(outcome, Some(SendOutcome::Delivered { method: BeaconMethod::Get }));
    let events = sent_events(&enabled.transport.requests_to(TEST_BEACON_ENDPOINT));
    assert_eq!(events[0]["eventType"], NAVIGATION_EVENT_TYPE);
    assert_eq!(events[0]["url"], "https://shop.test/cart");
}

#[tokio::test]
async fn configuration_snapshot_reflects_resolved_settings() {
    let f = fixture(session_config(json!({})));

    let configuration = f.session.configuration();

    assert_eq!(configuration.client.app_source_id, "test123");
    assert_eq!(configuration.client.device_id, "testdevice");
    assert_eq!(configuration.client.session_id, "testdevice");
    assert_eq!(configuration.signals.len(), 3);
}

#[tokio::test]
async fn register_refuses_client_settings() {
    let f = fixture(session_config(json!({})));
    let partial: PartialConfig = serde_json::from_value(json!({
        "client": { "retryAttempts": 9 },
        "signals": []
    }))
    .unwrap();

    let result = f.session.register(partial);

    assert!(matches!(result, Err(SdkError::Config(_))));
    let configuration = f.session.configuration();
    assert_eq!(configuration.signals.len(), 3);
    assert_ne!(configuration.client.retry_attempts, 9);
}

#[test]
fn misspelled_attribute_is_rejected() {
    let mut config = serde_json::to_value(session_config(json!({}))).unwrap();
    config["signalz"] = json!([]);

    let result = serde_json::from_value::<SessionConfig>(config);

    assert!(result.unwrap_err().to_string().contains("signalz"));
}
