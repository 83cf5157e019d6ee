//! Clock abstraction for retry delays, event timestamps and record expiry.
//!
//! Every wait in the SDK (readiness polling, authentication retries, delivery
//! retries) goes through [`Clock::sleep`], so tests can run the full retry
//! machinery against virtual time without real delays.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, TimeZone, Utc};

/// Boxed future returned by [`Clock::sleep`].
pub type Sleep<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Source of wall-clock time and timer-based delays.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current wall-clock time.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Suspends the caller for `duration`.
    ///
    /// Other tasks may run while the caller is suspended; the SDK relies on
    /// this to let consent changes interleave with pending dispatches.
    fn sleep(&self, duration: Duration) -> Sleep<'_>;
}

/// Production clock backed by the system time and tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock instance.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> Sleep<'_> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Virtual clock for deterministic tests.
///
/// `sleep` advances virtual time immediately and yields to the scheduler
/// instead of waiting. Every sleep is counted so tests can assert how many
/// retry delays a call went through.
#[derive(Debug, Clone)]
pub struct TestClock {
    /// Milliseconds since UNIX epoch
    now_ms: Arc<AtomicU64>,
    sleeps: Arc<AtomicU64>,
    slept_ms: Arc<AtomicU64>,
}

impl TestClock {
    /// Creates a test clock starting at the current system time.
    pub fn new() -> Self {
        Self::with_start_time(Utc::now())
    }

    /// Creates a test clock starting at a specific time.
    pub fn with_start_time(start: DateTime<Utc>) -> Self {
        let start_ms = u64::try_from(start.timestamp_millis()).unwrap_or(0);
        Self {
            now_ms: Arc::new(AtomicU64::new(start_ms)),
            sleeps: Arc::new(AtomicU64::new(0)),
            slept_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Advances virtual time without counting it as a sleep.
    pub fn advance(&self, duration: Duration) {
        self.now_ms.fetch_add(duration_millis(duration), Ordering::AcqRel);
    }

    /// Number of `sleep` calls made against this clock.
    pub fn sleep_count(&self) -> u64 {
        self.sleeps.load(Ordering::Acquire)
    }

    /// Total virtual time spent in `sleep`.
    pub fn total_slept(&self) -> Duration {
        Duration::from_millis(self.slept_ms.load(Ordering::Acquire))
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now_utc(&self) -> DateTime<Utc> {
        let ms = i64::try_from(self.now_ms.load(Ordering::Acquire)).unwrap_or(i64::MAX);
        Utc.timestamp_millis_opt(ms).single().unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn sleep(&self, duration: Duration) -> Sleep<'_> {
        self.sleeps.fetch_add(1, Ordering::AcqRel);
        self.slept_ms.fetch_add(duration_millis(duration), Ordering::AcqRel);
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
