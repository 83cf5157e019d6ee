//! Property-based tests for retry budgets and transport selection.
//!
//! Checks the two counting invariants of the delivery core across generated
//! inputs: a budget of `n` retries makes exactly `n + 1` attempts, and the
//! GET/POST choice flips exactly above the URL ceiling.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use cdp_delivery::{
    payload::{beacon_request, encode_batch},
    BeaconMethod, DeliveryError, HttpRequest, SendOutcome, MAX_URL_LENGTH,
};
use cdp_testing::{
    fixtures::{TEST_AUTH_ENDPOINT, TEST_BEACON_ENDPOINT},
    DeliveryHarness, HarnessBuilder, InitialConsent, ScriptedTransport,
};
use proptest::prelude::*;
use serde_json::Map;

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(future)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn failing_request_makes_budget_plus_one_attempts(budget in 0u32..12, status in 400u16..600) {
        let attempts = block_on(async {
            let harness = HarnessBuilder::new().build();
            harness.transport.respond(TEST_BEACON_ENDPOINT, status);

            let result = harness
                .client
                .request(HttpRequest::get(TEST_BEACON_ENDPOINT), budget)
                .await;

            prop_assert_eq!(
                result,
                Err(DeliveryError::retries_exhausted(budget + 1, Some(status)))
            );
            prop_assert_eq!(harness.clock.sleep_count(), u64::from(budget));
            Ok(harness.beacon_count())
        })?;

        prop_assert_eq!(attempts, budget as usize + 1);
    }

    #[test]
    fn failing_auth_makes_budget_plus_one_attempts(budget in 0u32..12) {
        let auth_attempts = block_on(async {
            let transport = Arc::new(ScriptedTransport::new());
            transport.fail_network(TEST_AUTH_ENDPOINT);
            let harness = HarnessBuilder::new()
                .transport(transport)
                .config(|config| config.retry_attempts(budget))
                .build();

            let result = harness.client.establish_readiness().await;

            prop_assert!(result.is_err());
            prop_assert!(!harness.client.is_ready());
            Ok(harness.auth_count())
        })?;

        prop_assert_eq!(auth_attempts, budget as usize + 1);
    }

    #[test]
    fn failing_delivery_reports_every_attempt(budget in 0u32..8) {
        let outcome = block_on(async {
            let harness = DeliveryHarness::ready(
                HarnessBuilder::new()
                    .consent(InitialConsent::Granted)
                    .config(|config| config.retry_attempts(budget)),
            )
            .await
            .unwrap();
            harness.transport.fail_network(TEST_BEACON_ENDPOINT);

            harness.client.send_event("Engagement", "click", Map::new()).await
        });

        prop_assert_eq!(outcome, SendOutcome::Failed { attempts: budget + 1, last_status: None });
    }

    #[test]
    fn method_flips_exactly_above_url_ceiling(extra in 0usize..64, over in any::<bool>()) {
        let base = MAX_URL_LENGTH - TEST_BEACON_ENDPOINT.len() - 1 - "event=".len();
        let payload_len = if over { base + 1 + extra } else { base - extra };
        let param = format!("event={}", "A".repeat(payload_len));

        let (method, request) = beacon_request(TEST_BEACON_ENDPOINT, &param);
        let url_len = TEST_BEACON_ENDPOINT.len() + 1 + param.len();

        if url_len > MAX_URL_LENGTH {
            prop_assert_eq!(method, BeaconMethod::Post);
            prop_assert_eq!(request.body_text(), Some(param));
        } else {
            prop_assert_eq!(method, BeaconMethod::Get);
            prop_assert_eq!(request.url.len(), url_len);
        }
    }

    #[test]
    fn encoded_batches_pick_a_method_by_size(blob_len in 0usize..12_000) {
        let harness = HarnessBuilder::new().build();
        let envelope = cdp_delivery::payload::build_envelope(
            &harness.config,
            "Behavioral".into(),
            "scroll",
            serde_json::json!({ "blob": "x".repeat(blob_len) }).as_object().unwrap().clone(),
            "customer-1",
            chrono::Utc::now(),
        );
        let param = encode_batch(&cdp_core::EventBatch::single(envelope)).unwrap();
        let (method, _) = beacon_request(TEST_BEACON_ENDPOINT, &param);

        let expected = if TEST_BEACON_ENDPOINT.len() + 1 + param.len() > MAX_URL_LENGTH {
            BeaconMethod::Post
        } else {
            BeaconMethod::Get
        };
        prop_assert_eq!(method, expected);
    }
}
