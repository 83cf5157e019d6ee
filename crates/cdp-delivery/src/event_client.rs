//! Readiness-gated, consent-gated beacon delivery.
//!
//! # Readiness
//!
//! ```text
//!   NotReady ──auth ok + probe ok──▶ Ready
//!      ▲                               │
//!      └──── request retries exhausted ┘
//! ```
//!
//! The client starts not ready. [`DeliveryClient::establish_readiness`] runs
//! the auth handshake followed by a compatibility probe (a GET carrying an
//! empty batch) that only succeeds when the session cookie set by the
//! handshake is replayed. Any request that exhausts its retries flips the
//! client back to not ready; a later handshake is the only way back.
//!
//! No network call other than the handshake and the probe is made while not
//! ready.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use cdp_core::{Clock, ClientConfig, ConsentGate, EventBatch, EventCategory};
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    auth::Authenticator,
    error::{DeliveryError, Result},
    outcome::{DispatchStats, SendOutcome, StatsSnapshot},
    payload,
    retry::{RetryDecision, RetryPolicy},
    transport::{BeaconTransport, HttpRequest, HttpResponse},
};

/// Retry budget of the compatibility probe: one retry, so at most two
/// probe attempts.
pub const PROBE_RETRIES: u32 = 1;

/// Status value of the consent opt-in event.
pub const CONSENT_OPT_IN_STATUS: &str = "opt-in";

/// Status value of the consent opt-out event.
pub const CONSENT_OPT_OUT_STATUS: &str = "opt-out";

/// Sends beacon events once authenticated and consented.
///
/// Cheap to clone; clones share readiness, statistics and the transport.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: Arc<ClientConfig>,
    authenticator: Authenticator,
    consent: ConsentGate,
    transport: Arc<dyn BeaconTransport>,
    clock: Arc<dyn Clock>,
    ready: AtomicBool,
    stats: DispatchStats,
}

impl DeliveryClient {
    /// Creates a client in the not-ready state.
    ///
    /// The handshake is not started here; call
    /// [`establish_readiness`](Self::establish_readiness), typically on a
    /// spawned task.
    pub fn new(
        config: Arc<ClientConfig>,
        authenticator: Authenticator,
        consent: ConsentGate,
        transport: Arc<dyn BeaconTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                authenticator,
                consent,
                transport,
                clock,
                ready: AtomicBool::new(false),
                stats: DispatchStats::default(),
            }),
        }
    }

    /// Whether the client may currently send events.
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Consent gate consulted before each send.
    pub fn consent(&self) -> &ConsentGate {
        &self.inner.consent
    }

    /// Dispatch totals so far.
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    fn set_ready(&self, ready: bool) {
        self.inner.ready.store(ready, Ordering::Release);
    }

    /// Authenticates, then probes the beacon endpoint.
    ///
    /// Readiness is set only if both steps succeed.
    ///
    /// # Errors
    ///
    /// Returns the handshake or probe failure; the client stays not ready.
    pub async fn establish_readiness(&self) -> Result<()> {
        if let Err(e) = self.inner.authenticator.authenticate().await {
            self.set_ready(false);
            warn!(error = %e, "there was a problem calling the auth endpoint");
            return Err(e);
        }

        let probe = payload::probe_request(&self.inner.config.beacon_endpoint)?;
        match self.request(probe, PROBE_RETRIES).await {
            Ok(_) => {
                self.set_ready(true);
                info!("event client initialized");
                Ok(())
            },
            Err(e) => {
                self.set_ready(false);
                warn!(error = %e, "beacon endpoint rejected the session; cookies may be blocked");
                Err(e)
            },
        }
    }

    /// Waits for readiness, re-checking up to `retries` more times.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::NotReady` if the client is still not ready
    /// after the last check.
    pub async fn check_ready(&self, retries: u32) -> Result<()> {
        let mut checks = 0;
        loop {
            checks += 1;
            if self.is_ready() {
                return Ok(());
            }
            if checks > retries {
                error!(checks, "event client is not ready (probably an authentication problem)");
                return Err(DeliveryError::NotReady { attempts: checks });
            }
            self.inner.clock.sleep(self.inner.config.retry_delay).await;
        }
    }

    /// Sends one event, gated on readiness and consent.
    ///
    /// Never fails; the returned outcome says what happened and is also
    /// counted in [`stats`](Self::stats).
    pub async fn send_event(
        &self,
        category: impl Into<EventCategory>,
        event_type: &str,
        fields: Map<String, Value>,
    ) -> SendOutcome {
        let category = category.into();
        let span = info_span!("send_event", category = %category, event_type);

        async move {
            if self.check_ready(self.inner.config.retry_attempts).await.is_err() {
                return self.record(SendOutcome::DroppedNotReady);
            }
            if !self.inner.consent.is_granted() {
                debug!(consent = %self.inner.consent.state(), "consent not granted, dropping event");
                return self.record(SendOutcome::DroppedNoConsent);
            }

            let outcome = self.deliver(category, event_type, fields).await;
            self.record(outcome)
        }
        .instrument(span)
        .await
    }

    /// Logs an opt-in consent event, then records consent.
    ///
    /// Nothing is sent or recorded if the client never becomes ready.
    pub async fn consent_opt_in(&self) -> SendOutcome {
        self.consent_event(CONSENT_OPT_IN_STATUS).await
    }

    /// Logs an opt-out consent event, then removes consent and identity.
    ///
    /// Nothing is sent or removed if the client never becomes ready.
    pub async fn consent_opt_out(&self) -> SendOutcome {
        self.consent_event(CONSENT_OPT_OUT_STATUS).await
    }

    async fn consent_event(&self, status: &str) -> SendOutcome {
        let config = &self.inner.config;
        if self.check_ready(config.retry_attempts).await.is_err() {
            return self.record(SendOutcome::DroppedNotReady);
        }
        info!(status, "received consent event");

        let mut fields = Map::new();
        fields.insert("status".into(), json!(status));
        let category = EventCategory::from(config.consent_event_category_name.as_str());
        let outcome = self.deliver(category, &config.consent_event_type_name, fields).await;

        if status == CONSENT_OPT_IN_STATUS {
            if let Err(e) = self.inner.consent.grant() {
                error!(error = %e, "failed to persist consent");
            }
        } else {
            self.inner.consent.revoke();
        }

        self.record(outcome)
    }

    async fn deliver(
        &self,
        category: EventCategory,
        event_type: &str,
        fields: Map<String, Value>,
    ) -> SendOutcome {
        let config = &self.inner.config;
        let customer_identity = self.inner.consent.identity().customer_identity();
        let envelope = payload::build_envelope(
            config,
            category,
            event_type,
            fields,
            &customer_identity,
            self.inner.clock.now_utc(),
        );
        let event_id = envelope.event_id().unwrap_or_default().to_string();

        let param = match payload::encode_batch(&EventBatch::single(envelope)) {
            Ok(param) => param,
            Err(e) => {
                error!(error = %e, "failed to encode event");
                return SendOutcome::Failed { attempts: 0, last_status: None };
            },
        };

        let (method, request) = payload::beacon_request(&config.beacon_endpoint, &param);
        info!(%event_id, %method, "sending event");

        match self.request(request, config.retry_attempts).await {
            Ok(_) => SendOutcome::Delivered { method },
            Err(DeliveryError::RetriesExhausted { attempts, last_status }) => {
                SendOutcome::Failed { attempts, last_status }
            },
            Err(e) => {
                error!(error = %e, "event delivery failed");
                SendOutcome::Failed { attempts: 0, last_status: e.status_code() }
            },
        }
    }

    fn record(&self, outcome: SendOutcome) -> SendOutcome {
        self.inner.stats.record(&outcome);
        outcome
    }

    /// Executes `request`, retrying failed attempts up to `retries` times.
    ///
    /// A 401 with budget left schedules one detached re-authentication
    /// before the retry. The re-authentication is not awaited.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::RetriesExhausted` once every attempt has
    /// failed; the client is marked not ready in that case.
    pub async fn request(&self, request: HttpRequest, retries: u32) -> Result<HttpResponse> {
        let policy = RetryPolicy::new(retries, self.inner.config.retry_delay);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let span = info_span!("beacon_attempt", attempt, method = %request.method);

            let (last_status, error) =
                match self.inner.transport.execute(request.clone()).instrument(span).await {
                    Ok(response) if response.is_success() => return Ok(response),
                    Ok(response) => (
                        Some(response.status_code),
                        DeliveryError::http_status(response.status_code, response.body),
                    ),
                    Err(e) => (None, e),
                };
            debug!(attempt, error = %error, "beacon attempt failed");

            match policy.decide(attempt) {
                RetryDecision::Retry { delay } => {
                    self.inner.clock.sleep(delay).await;
                    if error.is_unauthorized() {
                        self.spawn_reauthentication();
                    }
                },
                RetryDecision::GiveUp { .. } => {
                    self.set_ready(false);
                    error!(attempts = attempt, ?last_status, "unable to send request");
                    return Err(DeliveryError::retries_exhausted(attempt, last_status));
                },
            }
        }
    }

    fn spawn_reauthentication(&self) {
        let authenticator = self.inner.authenticator.clone();
        tokio::spawn(
            async move {
                if let Err(e) = authenticator.authenticate().await {
                    warn!(error = %e, "re-authentication failed");
                }
            }
            .instrument(info_span!("reauthenticate")),
        );
    }
}

