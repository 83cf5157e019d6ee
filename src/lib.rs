//! Customer data platform beacon SDK.
//!
//! Ties the delivery core together behind a [`Session`]: configure once with
//! client settings, signals and selectors, then send events directly or let
//! the host dispatch declared signals as page events fire. Events leave only
//! when the session has authenticated and the visitor has consented.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use cdp_core::MemoryStore;
//! use cdp_sdk::{Session, SessionConfig};
//! use serde_json::Map;
//!
//! # async fn run() -> cdp_sdk::Result<()> {
//! let mut config = SessionConfig::default();
//! config.client.app_source_id = "my-app".into();
//! config.client.auth_endpoint = "https://cdp.example.com/auth".into();
//! config.client.beacon_endpoint = "https://cdp.example.com/event".into();
//!
//! let session = Session::configure_http(config, Arc::new(MemoryStore::new()))?;
//! session.wait_ready().await;
//! session.consent_opt_in().await;
//! session.send_event("Engagement", "addToCart", Map::new()).await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod session;
pub mod signals;
pub mod telemetry;

pub use error::{Result, SdkError};
pub use session::{url_param, ConfigurationSnapshot, PartialConfig, Session, SessionConfig};
pub use signals::{
    DataProvider, ExtractionError, FieldMapping, PageElement, PageReader, Scope, Selector, Signal,
    SignalBinding, SignalContext, SignalDispatcher, SignalError, SignalRegistry, SignalTrigger,
};
pub use telemetry::{init_tracing, LogHandle, LogLevel};
