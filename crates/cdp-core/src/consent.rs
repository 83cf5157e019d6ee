//! Consent gate over the record store.
//!
//! Consent is never cached: page code may flip it while a dispatch is
//! waiting on readiness, so every gating decision re-reads the store.
//!
//! ```text
//!   Unknown ──grant──▶ Granted
//!      ▲                  │
//!      └──────revoke──────┘   (Denied also revokes to Unknown)
//! ```

use std::sync::Arc;

use chrono::Duration;
use tracing::info;

use crate::{
    error::Result,
    identity::IdentityProvider,
    models::{ConsentState, CONSENT_OPT_IN, CONSENT_RECORD, RECORD_TTL_DAYS},
    store::Store,
    time::Clock,
};

/// Tri-state consent flag persisted in a [`Store`].
#[derive(Debug, Clone)]
pub struct ConsentGate {
    store: Arc<dyn Store>,
    identity: IdentityProvider,
    clock: Arc<dyn Clock>,
}

impl ConsentGate {
    /// Creates a gate backed by `store`.
    pub fn new(store: Arc<dyn Store>, identity: IdentityProvider, clock: Arc<dyn Clock>) -> Self {
        Self { store, identity, clock }
    }

    /// Current consent state, read fresh from the store.
    pub fn state(&self) -> ConsentState {
        ConsentState::from_record(self.store.get(CONSENT_RECORD).as_deref())
    }

    /// Whether sending is currently permitted.
    pub fn is_granted(&self) -> bool {
        self.state().allows_sending()
    }

    /// Records opt-in and persists the customer identity alongside it.
    pub fn grant(&self) -> Result<()> {
        let expires_at = self.clock.now_utc() + Duration::days(RECORD_TTL_DAYS);
        self.store.set(CONSENT_RECORD, CONSENT_OPT_IN, Some(expires_at))?;
        let identity = self.identity.persist(expires_at)?;
        info!(customer_id = %identity, "consent granted");
        Ok(())
    }

    /// Clears consent and identity; the next identity read mints a new id.
    pub fn revoke(&self) {
        self.store.remove(CONSENT_RECORD);
        self.identity.forget();
        info!("consent removed");
    }

    /// Identity provider shared with this gate.
    pub fn identity(&self) -> &IdentityProvider {
        &self.identity
    }
}
