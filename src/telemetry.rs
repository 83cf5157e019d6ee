//! Tracing subscriber setup and runtime log level control.
//!
//! The SDK's four log levels map onto filter directives scoped to the SDK's
//! own crates. `RUST_LOG`, when set, replaces the initial directives.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry};

use crate::error::{Result, SdkError};

const SDK_TARGETS: [&str; 3] = ["cdp_sdk", "cdp_core", "cdp_delivery"];

/// Verbosity of SDK logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Nothing is logged.
    #[default]
    None,
    /// Errors only.
    Error,
    /// Errors and warnings.
    Debug,
    /// Everything, including per-request diagnostics.
    All,
}

impl LogLevel {
    fn max_level(self) -> &'static str {
        match self {
            Self::None => "off",
            Self::Error => "error",
            Self::Debug => "warn",
            Self::All => "debug",
        }
    }

    /// Filter directives enabling this level for the SDK crates only.
    pub fn directives(self) -> String {
        let level = self.max_level();
        std::iter::once("off".to_string())
            .chain(SDK_TARGETS.iter().map(|target| format!("{target}={level}")))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Builds the filter for this level.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::Telemetry` if the directives fail to parse.
    pub fn filter(self) -> Result<EnvFilter> {
        EnvFilter::try_new(self.directives()).map_err(|e| SdkError::telemetry(e.to_string()))
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Error => write!(f, "error"),
            Self::Debug => write!(f, "debug"),
            Self::All => write!(f, "all"),
        }
    }
}

impl FromStr for LogLevel {
    type Err = SdkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "error" => Ok(Self::Error),
            "debug" => Ok(Self::Debug),
            "all" => Ok(Self::All),
            other => Err(SdkError::telemetry(format!(
                "unknown log level {other:?}; available levels: error, debug, all or none"
            ))),
        }
    }
}

/// Handle for changing the log level after initialisation.
#[derive(Debug, Clone)]
pub struct LogHandle {
    handle: reload::Handle<EnvFilter, Registry>,
}

impl LogHandle {
    /// Replaces the active filter with `level`'s directives.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::Telemetry` if the subscriber has been dropped.
    pub fn set_level(&self, level: LogLevel) -> Result<()> {
        self.handle.reload(level.filter()?).map_err(|e| SdkError::telemetry(e.to_string()))?;
        tracing::info!(%level, "log level set");
        Ok(())
    }
}

/// Installs the global tracing subscriber.
///
/// # Errors
///
/// Returns `SdkError::Telemetry` if a global subscriber is already set or
/// the filter is invalid.
pub fn init_tracing(level: LogLevel) -> Result<LogHandle> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => level.filter()?,
    };
    let (filter, handle) = reload::Layer::new(filter);

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| SdkError::telemetry(e.to_string()))?;

    Ok(LogHandle { handle })
}
