//! Authentication and beacon delivery for the CDP SDK.
//!
//! This crate turns host events into beacons: it authenticates the device
//! against the auth endpoint, proves the session cookie is usable with a
//! compatibility probe, and then sends consent-gated events with bounded,
//! fixed-delay retries.
//!
//! # Architecture
//!
//! Each `send_event` call runs the complete dispatch lifecycle:
//!
//! 1. **Readiness** - Wait for the handshake, up to the retry budget
//! 2. **Consent** - Re-read the consent record; drop unless granted
//! 3. **Encoding** - Build the envelope and base64 encode the batch
//! 4. **Transport** - GET under the URL ceiling, POST above it
//! 5. **Retry** - Fixed delay, with re-authentication after a 401
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use cdp_core::{ClientConfig, ClientSettings, ConsentGate, IdentityProvider, MemoryStore, RealClock};
//! use cdp_delivery::{Authenticator, DeliveryClient, HttpTransport};
//!
//! # async fn example(settings: ClientSettings) -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::new());
//! let clock = Arc::new(RealClock::new());
//! let identity = IdentityProvider::new(store.clone());
//! let config = Arc::new(ClientConfig::resolve(settings, &identity)?);
//! let transport = Arc::new(HttpTransport::with_defaults()?);
//!
//! let authenticator = Authenticator::new(config.clone(), transport.clone(), clock.clone());
//! let consent = ConsentGate::new(store, identity, clock.clone());
//! let client = DeliveryClient::new(config, authenticator, consent, transport, clock);
//!
//! client.establish_readiness().await?;
//! let outcome = client.send_event("Engagement", "pageView", Default::default()).await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod client;
pub mod error;
pub mod event_client;
pub mod outcome;
pub mod payload;
pub mod retry;
pub mod transport;

// Re-export main public API
pub use auth::{AuthResponse, Authenticator};
pub use client::{HttpTransport, TransportConfig};
pub use error::{DeliveryError, Result};
pub use event_client::DeliveryClient;
pub use outcome::{DispatchStats, SendOutcome, StatsSnapshot};
pub use payload::{BeaconMethod, EVENT_PARAM_NAME, MAX_URL_LENGTH};
pub use retry::{RetryDecision, RetryPolicy};
pub use transport::{BeaconTransport, HttpRequest, HttpResponse};

/// Default HTTP request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
