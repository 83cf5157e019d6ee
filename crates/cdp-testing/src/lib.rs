//! Test infrastructure and utilities for deterministic testing.
//!
//! Provides a scripted in-memory transport, a wiremock-backed CDP server,
//! configuration fixtures and a fully wired delivery harness running on
//! virtual time.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod env;
pub mod fixtures;
pub mod http;
pub mod transport;

pub use cdp_core::{Clock, TestClock};
pub use env::{DeliveryHarness, HarnessBuilder, InitialConsent};
pub use fixtures::{settings, test_settings, ConfigBuilder};
pub use http::{decode_event_param, decode_request_events, MockBeacon};
pub use transport::{Scripted, ScriptedTransport};
