//! Key-value persistence for identity and consent records.
//!
//! The SDK never talks to a concrete browser storage mechanism. It reads and
//! writes small string records through the [`Store`] capability, which the
//! host backs with whatever it has: an in-memory map, a cookie jar it syncs
//! with `document.cookie`, or something else entirely.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use tracing::{debug, warn};

use crate::{
    error::{CoreError, Result},
    time::{Clock, RealClock},
};

/// Minimal record store used for identity and consent.
pub trait Store: Send + Sync + fmt::Debug {
    /// Returns the live value stored under `key`.
    fn get(&self, key: &str) -> Option<String>;

    /// Writes `value` under `key`, optionally expiring at `expires_at`.
    fn set(&self, key: &str, value: &str, expires_at: Option<DateTime<Utc>>) -> Result<()>;

    /// Removes `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str);

    /// Whether a live value exists under `key`.
    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

#[derive(Debug, Clone)]
struct StoredRecord {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl StoredRecord {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires_at| expires_at > now)
    }
}

/// In-memory store with expiry evaluated against a [`Clock`].
#[derive(Debug, Clone)]
pub struct MemoryStore {
    records: Arc<Mutex<HashMap<String, StoredRecord>>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Creates an empty store using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(RealClock::new()))
    }

    /// Creates an empty store evaluating expiry against `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { records: Arc::new(Mutex::new(HashMap::new())), clock }
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, StoredRecord>> {
        self.records.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        let now = self.clock.now_utc();
        let mut records = self.records();
        match records.get(key) {
            Some(record) if record.is_live(now) => Some(record.value.clone()),
            Some(_) => {
                records.remove(key);
                None
            },
            None => None,
        }
    }

    fn set(&self, key: &str, value: &str, expires_at: Option<DateTime<Utc>>) -> Result<()> {
        self.records()
            .insert(key.to_string(), StoredRecord { value: value.to_string(), expires_at });
        Ok(())
    }

    fn remove(&self, key: &str) {
        self.records().remove(key);
    }
}

/// A parsed cookie: name, value, `key=value` attributes and bare flags.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Cookie {
    /// Cookie name.
    pub name: String,
    /// Cookie value.
    pub value: String,
    /// Attributes such as `path` or `expires`, in order of appearance.
    pub params: Vec<(String, String)>,
    /// Bare flags such as `Secure`.
    pub flags: Vec<String>,
}

impl Cookie {
    /// Creates a cookie with `path=/` and an optional expiry.
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        let mut cookie = Self { name: name.into(), value: value.into(), ..Self::default() };
        cookie.validate()?;
        if let Some(expires_at) = expires_at {
            cookie.params.push(("expires".into(), format_cookie_date(expires_at)));
        }
        cookie.params.push(("path".into(), "/".into()));
        Ok(cookie)
    }

    /// Parses a single `Set-Cookie`-style string.
    ///
    /// The first segment is `name=value`; later segments are either
    /// attributes or flags. Name and value are trimmed and percent-decoded.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut segments = raw.split(';');
        let (name, value) = segments.next()?.split_once('=')?;

        let mut cookie = Self {
            name: decode_component(name)?,
            value: decode_component(value)?,
            ..Self::default()
        };

        for segment in segments {
            match segment.split_once('=') {
                Some((key, value)) => {
                    cookie.params.push((key.trim().to_string(), value.trim().to_string()));
                },
                None if !segment.trim().is_empty() => cookie.flags.push(segment.trim().into()),
                None => {},
            }
        }

        Some(cookie)
    }

    /// Returns an attribute by case-insensitive name.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }

    /// Parsed `expires` attribute, if present and well formed.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.param("expires")
            .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
            .map(|date| date.with_timezone(&Utc))
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(CoreError::InvalidCookie("cookie name is required".into()));
        }
        if self.value.is_empty() {
            return Err(CoreError::InvalidCookie(format!("cookie {} requires a value", self.name)));
        }
        Ok(())
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)?;
        for (key, value) in &self.params {
            write!(f, ";{key}={value}")?;
        }
        for flag in &self.flags {
            write!(f, ";{flag}")?;
        }
        Ok(())
    }
}

/// Cookie-string backed store.
///
/// Holds the cookies visible to the page and records every write as a
/// cookie string the host should apply to its own jar. Deleting renders the
/// conventional epoch-expiry cookie.
#[derive(Debug, Clone)]
pub struct CookieJar {
    inner: Arc<Mutex<JarState>>,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, Default)]
struct JarState {
    cookies: HashMap<String, Cookie>,
    pending_writes: Vec<String>,
}

impl CookieJar {
    /// Creates an empty jar using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(RealClock::new()))
    }

    /// Creates an empty jar evaluating expiry against `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { inner: Arc::new(Mutex::new(JarState::default())), clock }
    }

    /// Creates a jar from a `document.cookie` style header (`a=1; b=2`).
    pub fn from_cookie_header(header: &str, clock: Arc<dyn Clock>) -> Self {
        let jar = Self::with_clock(clock);
        jar.sync_from_header(header);
        jar
    }

    /// Replaces the visible cookies with those in `header`.
    pub fn sync_from_header(&self, header: &str) {
        let mut state = self.state();
        state.cookies.clear();
        for raw in header.split(';') {
            match Cookie::parse(raw) {
                Some(cookie) => {
                    state.cookies.insert(cookie.name.clone(), cookie);
                },
                None if !raw.trim().is_empty() => {
                    warn!(cookie = raw.trim(), "ignoring malformed cookie");
                },
                None => {},
            }
        }
    }

    /// Renders the visible cookies as a `document.cookie` style header.
    pub fn cookie_header(&self) -> String {
        let now = self.clock.now_utc();
        let state = self.state();
        let mut pairs: Vec<String> = state
            .cookies
            .values()
            .filter(|cookie| cookie.expires_at().map_or(true, |expires_at| expires_at > now))
            .map(|cookie| format!("{}={}", cookie.name, cookie.value))
            .collect();
        pairs.sort();
        pairs.join("; ")
    }

    /// Returns a visible cookie by name.
    pub fn cookie(&self, name: &str) -> Option<Cookie> {
        self.state().cookies.get(name).cloned()
    }

    /// Drains the cookie strings written since the last call.
    pub fn take_pending_writes(&self) -> Vec<String> {
        std::mem::take(&mut self.state().pending_writes)
    }

    fn state(&self) -> MutexGuard<'_, JarState> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for CookieJar {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for CookieJar {
    fn get(&self, key: &str) -> Option<String> {
        let now = self.clock.now_utc();
        let state = self.state();
        let cookie = state.cookies.get(key);
        if cookie.is_none() {
            debug!(cookie = key, "cookie not found");
        }
        cookie
            .filter(|cookie| cookie.expires_at().map_or(true, |expires_at| expires_at > now))
            .map(|cookie| cookie.value.clone())
    }

    fn set(&self, key: &str, value: &str, expires_at: Option<DateTime<Utc>>) -> Result<()> {
        let cookie = Cookie::new(key, value, expires_at)?;
        let rendered = cookie.to_string();
        let mut state = self.state();
        state.pending_writes.push(rendered);
        state.cookies.insert(key.to_string(), cookie);
        debug!(cookie = key, "cookie written");
        Ok(())
    }

    fn remove(&self, key: &str) {
        let mut state = self.state();
        if state.cookies.remove(key).is_some() {
            state
                .pending_writes
                .push(format!("{key}=; expires=Thu, 01 Jan 1970 00:00:00 GMT; path=/;"));
        }
    }
}

fn decode_component(raw: &str) -> Option<String> {
    percent_decode_str(raw.trim()).decode_utf8().ok().map(|value| value.into_owned())
}

fn format_cookie_date(date: DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
