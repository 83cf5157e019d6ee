//! Fixed-delay retry policy shared by authentication and beacon delivery.
//!
//! Every failed attempt with budget left waits the same configured delay; no
//! backoff or jitter is applied. A budget of `n` retries allows `n + 1`
//! attempts in total.

use std::time::Duration;

use cdp_core::ClientConfig;
use serde::{Deserialize, Serialize};

/// Retry budget and delay for one logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,

    /// Delay before each retry.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: cdp_core::config::DEFAULT_RETRY_ATTEMPTS,
            delay: Duration::from_millis(cdp_core::config::DEFAULT_RETRY_DELAY_MS),
        }
    }
}

/// Result of retry decision calculation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then try again.
    Retry {
        /// How long to wait before the next attempt
        delay: Duration,
    },
    /// Do not retry.
    GiveUp {
        /// Reason why the request should not be retried
        reason: String,
    },
}

impl RetryPolicy {
    /// Creates a policy with the given budget and delay.
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Policy derived from the client's configured budget and delay.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.retry_attempts, config.retry_delay)
    }

    /// Same delay, different budget.
    pub fn with_max_retries(self, max_retries: u32) -> Self {
        Self { max_retries, ..self }
    }

    /// Total attempts this policy allows, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Decides what happens after `attempt_number` (1-based) has failed.
    pub fn decide(&self, attempt_number: u32) -> RetryDecision {
        if attempt_number >= self.max_attempts() {
            return RetryDecision::GiveUp {
                reason: format!("maximum attempts ({}) exceeded", self.max_attempts()),
            };
        }

        RetryDecision::Retry { delay: self.delay }
    }

    /// Retries left after `attempt_number` attempts have been made.
    pub fn remaining(&self, attempt_number: u32) -> u32 {
        self.max_attempts().saturating_sub(attempt_number)
    }
}
