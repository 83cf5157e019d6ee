//! Core domain for the CDP beacon SDK.
//!
//! Provides the consent tri-state, event envelopes, client configuration,
//! customer identity and the record store capability that every other crate
//! builds on. Nothing here performs network I/O.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod consent;
pub mod error;
pub mod identity;
pub mod models;
pub mod store;
pub mod time;

pub use config::{ClientConfig, ClientSettings};
pub use consent::ConsentGate;
pub use error::{CoreError, Result};
pub use identity::IdentityProvider;
pub use models::{ConsentState, EventBatch, EventCategory, EventEnvelope};
pub use store::{Cookie, CookieJar, MemoryStore, Store};
pub use time::{Clock, RealClock, TestClock};
