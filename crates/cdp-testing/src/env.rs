//! Fully wired delivery client over a scripted transport and virtual time.

use std::sync::Arc;

use cdp_core::{
    models::{CONSENT_OPT_IN, CONSENT_OPT_OUT, CONSENT_RECORD},
    ClientConfig, ConsentGate, IdentityProvider, MemoryStore, Store, TestClock,
};
use cdp_delivery::{Authenticator, DeliveryClient};

use crate::{fixtures::ConfigBuilder, transport::ScriptedTransport};

/// Consent record present when the harness is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitialConsent {
    /// No record.
    #[default]
    Unknown,
    /// `opt_in` record.
    Granted,
    /// `opt_out` record.
    Denied,
}

/// Delivery client plus handles on everything it talks to.
#[derive(Debug)]
pub struct DeliveryHarness {
    /// Client under test.
    pub client: DeliveryClient,
    /// Scripted transport shared with the client.
    pub transport: Arc<ScriptedTransport>,
    /// Record store backing consent and identity.
    pub store: Arc<MemoryStore>,
    /// Virtual clock driving retry delays.
    pub clock: Arc<TestClock>,
    /// Resolved configuration.
    pub config: Arc<ClientConfig>,
}

impl DeliveryHarness {
    /// Harness with fixture defaults and unknown consent.
    pub fn new() -> Self {
        HarnessBuilder::new().build()
    }

    /// Starts configuring a harness.
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::new()
    }

    /// Harness whose client has completed the handshake.
    ///
    /// # Errors
    ///
    /// Propagates the handshake failure.
    pub async fn ready(builder: HarnessBuilder) -> anyhow::Result<Self> {
        let harness = builder.build();
        harness.client.establish_readiness().await?;
        harness.transport.clear_requests();
        Ok(harness)
    }

    /// Number of beacon requests, including probes.
    pub fn beacon_count(&self) -> usize {
        self.transport.count_to(&self.config.beacon_endpoint)
    }

    /// Number of handshake requests.
    pub fn auth_count(&self) -> usize {
        self.transport.count_to(&self.config.auth_endpoint)
    }

    /// Lets spawned tasks such as re-authentication run to completion.
    pub async fn settle(&self) {
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }
    }
}

impl Default for DeliveryHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`DeliveryHarness`].
#[derive(Debug, Default)]
pub struct HarnessBuilder {
    config: ConfigBuilder,
    consent: InitialConsent,
    transport: Option<Arc<ScriptedTransport>>,
}

impl HarnessBuilder {
    /// Creates a builder with fixture defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adjusts the client configuration.
    #[must_use]
    pub fn config(mut self, f: impl FnOnce(ConfigBuilder) -> ConfigBuilder) -> Self {
        self.config = f(self.config);
        self
    }

    /// Sets the consent record present at start.
    #[must_use]
    pub fn consent(mut self, consent: InitialConsent) -> Self {
        self.consent = consent;
        self
    }

    /// Uses a pre-scripted transport.
    #[must_use]
    pub fn transport(mut self, transport: Arc<ScriptedTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Wires the client.
    pub fn build(self) -> DeliveryHarness {
        let clock = Arc::new(TestClock::new());
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        match self.consent {
            InitialConsent::Unknown => {},
            InitialConsent::Granted => seed_consent(&store, CONSENT_OPT_IN),
            InitialConsent::Denied => seed_consent(&store, CONSENT_OPT_OUT),
        }

        let transport = self.transport.unwrap_or_default();
        let config = Arc::new(self.config.build());
        let identity = IdentityProvider::new(store.clone());
        let authenticator = Authenticator::new(config.clone(), transport.clone(), clock.clone());
        let consent = ConsentGate::new(store.clone(), identity, clock.clone());
        let client = DeliveryClient::new(
            config.clone(),
            authenticator,
            consent,
            transport.clone(),
            clock.clone(),
        );

        DeliveryHarness { client, transport, store, clock, config }
    }
}

fn seed_consent(store: &MemoryStore, value: &str) {
    if let Err(e) = store.set(CONSENT_RECORD, value, None) {
        panic!("failed to seed consent record: {e}");
    }
}
