//! Eventstamps: lexicographically ordered hybrid timestamps.
//!
//! An eventstamp is a string of the exact form
//! `YYYY-MM-DDTHH:MM:SS.mmmZ|CCCC|NNNN`: a UTC wall-clock instant at
//! millisecond precision, a monotonic counter and a random nonce, both as
//! fixed-width lowercase hex. Every component is fixed width, so plain
//! byte-wise string comparison equals `(instant, counter, nonce)` tuple
//! order. Any store or transport can order, max and min stamps without a
//! custom comparator.

use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Number of lowercase hex characters in the counter component.
///
/// Constant for every stamp this implementation emits; widening mid-stream
/// would break lexicographic ordering.
pub const COUNTER_WIDTH: usize = 4;

/// Largest counter value representable at [`COUNTER_WIDTH`].
pub const COUNTER_MAX: u32 = 0xffff;

/// Largest encodable instant, `9999-12-31T23:59:59.999Z`. Instants past this
/// would grow the year field and break the fixed-width ordering.
const MAX_INSTANT_MS: u64 = 253_402_300_799_999;

const MIN_STAMP: &str = "1970-01-01T00:00:00.000Z|0000|0000";

// Offsets into the fixed-width wire form.
const INSTANT_END: usize = 24;
const COUNTER_START: usize = 25;
const COUNTER_END: usize = 29;
const NONCE_START: usize = 30;
const NONCE_END: usize = 34;

fn grammar() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d{3}Z\|[0-9a-f]{4}\|[0-9a-f]{4}$")
            .expect("eventstamp grammar is a valid regex")
    })
}

/// A total-ordered hybrid timestamp in its wire form.
///
/// Ordering and equality are the derived byte-wise comparisons over the
/// underlying string, which by construction equal tuple order over the
/// decoded components.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Eventstamp(String);

impl Eventstamp {
    /// Encode an instant, counter and nonce into the wire form.
    ///
    /// The instant saturates at year 9999 and the counter at
    /// [`COUNTER_MAX`] so the output is always fixed width; [`crate::Clock`]
    /// never feeds values near either limit.
    pub fn encode(instant_ms: u64, counter: u32, nonce: u16) -> Self {
        let clamped = instant_ms.min(MAX_INSTANT_MS) as i64;
        let instant: DateTime<Utc> = Utc
            .timestamp_millis_opt(clamped)
            .single()
            .expect("clamped instant is within the representable range");
        Self(format!(
            "{}|{:04x}|{:04x}",
            instant.to_rfc3339_opts(SecondsFormat::Millis, true),
            counter.min(COUNTER_MAX),
            nonce,
        ))
    }

    /// The minimum eventstamp, `1970-01-01T00:00:00.000Z|0000|0000`.
    pub fn min() -> Self {
        Self(MIN_STAMP.to_string())
    }

    /// Decode into `(instant_ms, counter, nonce)`.
    ///
    /// Fails with [`Error::InvalidEventstamp`] if the grammar check rejects,
    /// the date does not exist, or the instant precedes the Unix epoch.
    pub fn decode(&self) -> Result<(u64, u32, u16)> {
        Self::parse_parts(&self.0)
    }

    /// Check a candidate string against the eventstamp grammar.
    pub fn is_valid(candidate: &str) -> bool {
        Self::parse_parts(candidate).is_ok()
    }

    /// Parse a string already known (or claimed) to be an eventstamp.
    pub fn parse(candidate: &str) -> Result<Self> {
        Self::parse_parts(candidate)?;
        Ok(Self(candidate.to_string()))
    }

    /// The wire form as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn parse_parts(candidate: &str) -> Result<(u64, u32, u16)> {
        if !grammar().is_match(candidate) {
            return Err(Error::InvalidEventstamp(candidate.to_string()));
        }

        let invalid = || Error::InvalidEventstamp(candidate.to_string());

        let instant = DateTime::parse_from_rfc3339(&candidate[..INSTANT_END])
            .map_err(|_| invalid())?
            .timestamp_millis();
        if instant < 0 {
            return Err(invalid());
        }

        let counter = u32::from_str_radix(&candidate[COUNTER_START..COUNTER_END], 16)
            .map_err(|_| invalid())?;
        let nonce = u16::from_str_radix(&candidate[NONCE_START..NONCE_END], 16)
            .map_err(|_| invalid())?;

        Ok((instant as u64, counter, nonce))
    }
}

impl fmt::Display for Eventstamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Eventstamp {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
