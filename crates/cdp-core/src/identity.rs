//! Customer identity: a stable id minted once and persisted on consent.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::{error::Result, models::IDENTITY_RECORD, store::Store};

/// Produces and persists the customer identifier.
///
/// A stored identity always wins. Without one, a UUID v4 is minted and kept
/// in memory until it is persisted or forgotten, so repeated reads within a
/// session agree.
#[derive(Debug, Clone)]
pub struct IdentityProvider {
    store: Arc<dyn Store>,
    cached: Arc<Mutex<Option<String>>>,
}

impl IdentityProvider {
    /// Creates a provider reading from `store`.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store, cached: Arc::new(Mutex::new(None)) }
    }

    /// Returns the current customer identity, minting one if absent.
    pub fn customer_identity(&self) -> String {
        let mut cached = self.cached();
        if let Some(stored) = self.store.get(IDENTITY_RECORD) {
            *cached = Some(stored.clone());
            return stored;
        }

        cached
            .get_or_insert_with(|| {
                let minted = Uuid::new_v4().to_string();
                debug!(customer_id = %minted, "minted customer identity");
                minted
            })
            .clone()
    }

    /// Persists the current identity until `expires_at`.
    pub fn persist(&self, expires_at: DateTime<Utc>) -> Result<String> {
        let identity = self.customer_identity();
        self.store.set(IDENTITY_RECORD, &identity, Some(expires_at))?;
        Ok(identity)
    }

    /// Deletes the stored identity and drops the in-memory one.
    pub fn forget(&self) {
        self.store.remove(IDENTITY_RECORD);
        *self.cached() = None;
    }

    fn cached(&self) -> MutexGuard<'_, Option<String>> {
        self.cached.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
