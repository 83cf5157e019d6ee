//! Dispatch outcomes and counters.
//!
//! Host-facing sends never fail: every call ends in a [`SendOutcome`] and
//! bumps exactly one counter in [`DispatchStats`].

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::payload::BeaconMethod;

/// How a single `send_event` call ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SendOutcome {
    /// Beacon accepted by the server.
    Delivered {
        /// Transport used for the beacon
        method: BeaconMethod,
    },
    /// Consent was not granted; nothing was sent.
    DroppedNoConsent,
    /// Client never became ready; nothing was sent.
    DroppedNotReady,
    /// Every attempt failed.
    Failed {
        /// Attempts made, including the first
        attempts: u32,
        /// Status of the last attempt, if any response was received
        last_status: Option<u16>,
    },
}

impl SendOutcome {
    /// Whether the beacon reached the server.
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    /// Whether the event was dropped before any network call.
    pub fn is_dropped(&self) -> bool {
        matches!(self, Self::DroppedNoConsent | Self::DroppedNotReady)
    }
}

/// Running totals of dispatch outcomes.
#[derive(Debug, Default)]
pub struct DispatchStats {
    delivered: AtomicU64,
    dropped_no_consent: AtomicU64,
    dropped_not_ready: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Beacons accepted by the server.
    pub delivered: u64,
    /// Events dropped because consent was not granted.
    pub dropped_no_consent: u64,
    /// Events dropped because the client was not ready.
    pub dropped_not_ready: u64,
    /// Events whose delivery exhausted its retries.
    pub failed: u64,
}

impl StatsSnapshot {
    /// Total number of events dispatched.
    pub fn total(&self) -> u64 {
        self.delivered + self.dropped_no_consent + self.dropped_not_ready + self.failed
    }
}

impl DispatchStats {
    /// Counts `outcome`.
    pub fn record(&self, outcome: &SendOutcome) {
        let counter = match outcome {
            SendOutcome::Delivered { .. } => &self.delivered,
            SendOutcome::DroppedNoConsent => &self.dropped_no_consent,
            SendOutcome::DroppedNotReady => &self.dropped_not_ready,
            SendOutcome::Failed { .. } => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Current totals.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped_no_consent: self.dropped_no_consent.load(Ordering::Relaxed),
            dropped_not_ready: self.dropped_not_ready.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
