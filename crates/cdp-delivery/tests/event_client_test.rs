//! Integration tests for readiness, consent gating and beacon delivery.
//!
//! Every test runs the real `DeliveryClient` against a scripted transport
//! on virtual time, so retry delays cost nothing and are counted.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use cdp_core::{models::IDENTITY_RECORD, ConsentState, EventCategory, Store};
use cdp_delivery::{BeaconMethod, SendOutcome, StatsSnapshot};
use cdp_testing::{
    decode_event_param,
    fixtures::{TEST_AUTH_ENDPOINT, TEST_BEACON_ENDPOINT, TEST_DEVICE_ID},
    DeliveryHarness, HarnessBuilder, InitialConsent, ScriptedTransport,
};
use http::Method;
use serde_json::{json, Map, Value};

fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

async fn ready_with_consent() -> DeliveryHarness {
    DeliveryHarness::ready(HarnessBuilder::new().consent(InitialConsent::Granted))
        .await
        .expect("handshake should succeed")
}

fn sent_events(harness: &DeliveryHarness) -> Vec<Value> {
    harness
        .transport
        .requests_to(TEST_BEACON_ENDPOINT)
        .iter()
        .filter_map(|request| match request.method {
            Method::GET => request.url.split_once('?').map(|(_, query)| query.to_string()),
            _ => request.body_text(),
        })
        .filter_map(|param| decode_event_param(&param))
        .flatten()
        .collect()
}

#[tokio::test]
async fn readiness_requires_auth_and_probe() {
    let harness = DeliveryHarness::new();
    assert!(!harness.client.is_ready());

    harness.client.establish_readiness().await.expect("readiness");

    assert!(harness.client.is_ready());
    assert_eq!(harness.auth_count(), 1);

    let probes = harness.transport.requests_to(TEST_BEACON_ENDPOINT);
    assert_eq!(probes.len(), 1);
    assert_eq!(probes[0].method, Method::GET);
    let (_, param) = probes[0].url.split_once('?').unwrap();
    assert_eq!(decode_event_param(param), Some(Vec::new()));
}

#[tokio::test]
async fn auth_failure_skips_probe() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond(TEST_AUTH_ENDPOINT, 500);
    let harness = HarnessBuilder::new().transport(transport).build();

    let result = harness.client.establish_readiness().await;

    assert!(result.is_err());
    assert!(!harness.client.is_ready());
    assert_eq!(harness.auth_count(), 4);
    assert_eq!(harness.beacon_count(), 0);
}

#[tokio::test]
async fn rejected_probe_leaves_client_not_ready() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond(TEST_BEACON_ENDPOINT, 401);
    let harness = HarnessBuilder::new().transport(transport).build();

    let result = harness.client.establish_readiness().await;
    harness.settle().await;

    assert!(result.is_err());
    assert!(!harness.client.is_ready());
    // one retry, so two probe attempts
    assert_eq!(cdp_delivery::event_client::PROBE_RETRIES, 1);
    assert_eq!(harness.beacon_count(), 2);
    // handshake plus one re-authentication for the retried 401
    assert_eq!(harness.auth_count(), 2);
}

#[tokio::test]
async fn not_ready_drops_without_network() {
    let harness = HarnessBuilder::new().consent(InitialConsent::Granted).build();

    let outcome = harness.client.send_event("Engagement", "click", Map::new()).await;

    assert_eq!(outcome, SendOutcome::DroppedNotReady);
    assert_eq!(harness.transport.request_count(), 0);
    // one initial check plus retry_attempts re-checks
    assert_eq!(harness.clock.sleep_count(), 3);
    assert_eq!(harness.client.stats().dropped_not_ready, 1);
}

#[tokio::test]
async fn unknown_consent_drops_without_network() {
    let harness = DeliveryHarness::ready(HarnessBuilder::new()).await.unwrap();

    let outcome = harness.client.send_event("Engagement", "click", Map::new()).await;

    assert_eq!(outcome, SendOutcome::DroppedNoConsent);
    assert_eq!(harness.transport.request_count(), 0);
    assert_eq!(harness.client.stats().dropped_no_consent, 1);
}

#[tokio::test]
async fn denied_consent_drops_without_network() {
    let harness =
        DeliveryHarness::ready(HarnessBuilder::new().consent(InitialConsent::Denied)).await.unwrap();
    assert_eq!(harness.client.consent().state(), ConsentState::Denied);

    let outcome = harness.client.send_event("Engagement", "click", Map::new()).await;

    assert_eq!(outcome, SendOutcome::DroppedNoConsent);
    assert_eq!(harness.transport.request_count(), 0);
}

#[tokio::test]
async fn consent_is_read_on_every_send() {
    let harness = DeliveryHarness::ready(HarnessBuilder::new()).await.unwrap();
    let first = harness.client.send_event("Engagement", "click", Map::new()).await;

    harness
        .store
        .set(cdp_core::models::CONSENT_RECORD, cdp_core::models::CONSENT_OPT_IN, None)
        .unwrap();
    let second = harness.client.send_event("Engagement", "click", Map::new()).await;

    assert_eq!(first, SendOutcome::DroppedNoConsent);
    assert_eq!(second, SendOutcome::Delivered { method: BeaconMethod::Get });
}

#[tokio::test]
async fn small_event_is_sent_as_get() {
    let harness = ready_with_consent().await;

    let outcome = harness
        .client
        .send_event(EventCategory::Engagement, "addToCart", fields(json!({ "sku": "3040131BF0" })))
        .await;

    assert_eq!(outcome, SendOutcome::Delivered { method: BeaconMethod::Get });

    let events = sent_events(&harness);
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event["deviceId"], TEST_DEVICE_ID);
    assert_eq!(event["sessionId"], TEST_DEVICE_ID);
    assert_eq!(event["category"], "Engagement");
    assert_eq!(event["eventType"], "addToCart");
    assert_eq!(event["sku"], "3040131BF0");
    assert_eq!(event["eventId"].as_str().map(str::len), Some(16));
    assert!(event["dateTime"].as_str().is_some_and(|t| t.ends_with('Z')));
    assert_eq!(
        event[IDENTITY_RECORD].as_str(),
        Some(harness.client.consent().identity().customer_identity().as_str())
    );
}

#[tokio::test]
async fn oversized_event_is_posted() {
    let harness = ready_with_consent().await;

    let outcome = harness
        .client
        .send_event("Behavioral", "scroll", fields(json!({ "blob": "x".repeat(9000) })))
        .await;

    assert_eq!(outcome, SendOutcome::Delivered { method: BeaconMethod::Post });

    let requests = harness.transport.requests_to(TEST_BEACON_ENDPOINT);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, Method::POST);
    assert_eq!(requests[0].url, TEST_BEACON_ENDPOINT);
    assert_eq!(sent_events(&harness)[0]["blob"].as_str().map(str::len), Some(9000));
}

#[tokio::test]
async fn exhausted_delivery_marks_client_not_ready() {
    let harness = ready_with_consent().await;
    harness.transport.respond(TEST_BEACON_ENDPOINT, 500);

    let outcome = harness.client.send_event("Engagement", "click", Map::new()).await;

    assert_eq!(outcome, SendOutcome::Failed { attempts: 4, last_status: Some(500) });
    assert_eq!(harness.beacon_count(), 4);
    assert!(!harness.client.is_ready());

    harness.transport.clear_requests();
    let next = harness.client.send_event("Engagement", "click", Map::new()).await;
    assert_eq!(next, SendOutcome::DroppedNotReady);
    assert_eq!(harness.transport.request_count(), 0);
}

#[tokio::test]
async fn unauthorized_triggers_single_reauthentication() {
    let harness = ready_with_consent().await;
    harness.transport.respond_sequence(TEST_BEACON_ENDPOINT, [401], 200);

    let outcome = harness.client.send_event("Engagement", "click", Map::new()).await;
    harness.settle().await;

    assert_eq!(outcome, SendOutcome::Delivered { method: BeaconMethod::Get });
    assert_eq!(harness.beacon_count(), 2);
    assert_eq!(harness.auth_count(), 1);
    assert!(harness.client.is_ready());
}

#[tokio::test]
async fn reauthenticates_once_per_retried_unauthorized() {
    let harness = ready_with_consent().await;
    harness.transport.respond(TEST_BEACON_ENDPOINT, 401);

    let outcome = harness.client.send_event("Engagement", "click", Map::new()).await;
    harness.settle().await;

    assert_eq!(outcome, SendOutcome::Failed { attempts: 4, last_status: Some(401) });
    // the final 401 has no budget left and is not followed by re-authentication
    assert_eq!(harness.auth_count(), 3);
}

#[tokio::test]
async fn server_errors_do_not_reauthenticate() {
    let harness = ready_with_consent().await;
    harness.transport.respond_sequence(TEST_BEACON_ENDPOINT, [500, 503], 200);

    let outcome = harness.client.send_event("Engagement", "click", Map::new()).await;
    harness.settle().await;

    assert!(outcome.is_delivered());
    assert_eq!(harness.auth_count(), 0);
}

#[tokio::test]
async fn opt_in_sends_consent_event_then_grants() {
    let harness = DeliveryHarness::ready(HarnessBuilder::new()).await.unwrap();
    let identity = harness.client.consent().identity().customer_identity();

    let outcome = harness.client.consent_opt_in().await;

    assert!(outcome.is_delivered());
    assert_eq!(harness.client.consent().state(), ConsentState::Granted);
    assert_eq!(harness.store.get(IDENTITY_RECORD), Some(identity));

    let events = sent_events(&harness);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["category"], "Consent");
    assert_eq!(events[0]["eventType"], "consentLog");
    assert_eq!(events[0]["status"], "opt-in");
}

#[tokio::test]
async fn opt_out_sends_consent_event_then_revokes() {
    let harness = DeliveryHarness::ready(HarnessBuilder::new()).await.unwrap();
    harness.client.consent_opt_in().await;
    let identity = harness.client.consent().identity().customer_identity();
    harness.transport.clear_requests();

    let outcome = harness.client.consent_opt_out().await;

    assert!(outcome.is_delivered());
    assert_eq!(sent_events(&harness)[0]["status"], "opt-out");
    assert_eq!(harness.client.consent().state(), ConsentState::Unknown);
    assert!(!harness.store.contains(IDENTITY_RECORD));
    assert_ne!(harness.client.consent().identity().customer_identity(), identity);
}

#[tokio::test]
async fn opt_in_without_readiness_changes_nothing() {
    let harness = DeliveryHarness::new();

    let outcome = harness.client.consent_opt_in().await;

    assert_eq!(outcome, SendOutcome::DroppedNotReady);
    assert_eq!(harness.client.consent().state(), ConsentState::Unknown);
    assert_eq!(harness.transport.request_count(), 0);
}

#[tokio::test]
async fn send_waits_for_concurrent_handshake() {
    let harness = HarnessBuilder::new()
        .consent(InitialConsent::Granted)
        .config(|config| config.retry_attempts(10))
        .build();

    let client = harness.client.clone();
    let handshake = tokio::spawn(async move { client.establish_readiness().await });
    let outcome = harness.client.send_event("Engagement", "click", Map::new()).await;

    assert!(handshake.await.unwrap().is_ok());
    assert!(outcome.is_delivered());
}

#[tokio::test]
async fn stats_count_every_outcome() {
    let harness = ready_with_consent().await;
    harness.client.send_event("Engagement", "click", Map::new()).await;
    harness.client.send_event("Engagement", "click", Map::new()).await;
    harness.client.consent().revoke();
    harness.client.send_event("Engagement", "click", Map::new()).await;

    assert_eq!(
        harness.client.stats(),
        StatsSnapshot { delivered: 2, dropped_no_consent: 1, dropped_not_ready: 0, failed: 0 }
    );
}
