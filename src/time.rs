use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};

use crate::limits::{MAX_VALID_TIMESTAMP_MS, MIN_VALID_TIMESTAMP_MS};
use crate::model::Ms;

/// Naive forms accepted in addition to RFC 3339. Naive input is read as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parse an ISO-8601 datetime into Unix milliseconds.
pub fn parse_datetime(input: &str) -> Result<Ms, TimeError> {
    let s = input.trim();
    let ms = if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        dt.timestamp_millis()
    } else {
        NAIVE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
            .map(|naive| naive.and_utc().timestamp_millis())
            .ok_or_else(|| TimeError::Invalid(s.to_string()))?
    };
    if !(MIN_VALID_TIMESTAMP_MS..MAX_VALID_TIMESTAMP_MS).contains(&ms) {
        return Err(TimeError::OutOfRange(s.to_string()));
    }
    Ok(ms)
}

/// Format Unix milliseconds as a naive ISO-8601 datetime (`YYYY-MM-DDTHH:MM:SS`).
pub fn format_datetime(ms: Ms) -> String {
    match DateTime::<Utc>::from_timestamp_millis(ms) {
        Some(dt) if dt.nanosecond() == 0 => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
        None => ms.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeError {
    Invalid(String),
    OutOfRange(String),
}

impl std::fmt::Display for TimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeError::Invalid(_) => {
                write!(f, "Invalid datetime format. Use ISO format (YYYY-MM-DDTHH:MM:SS)")
            }
            TimeError::OutOfRange(s) => write!(f, "datetime out of range: {s}"),
        }
    }
}

impl std::error::Error for TimeError {}

// ── Clock ────────────────────────────────────────────────────────

/// Source of "now" for future-time checks and simulated arrival times.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now_ms(&self) -> Ms;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Ms {
        Utc::now().timestamp_millis()
    }
}

/// Manually driven clock.
#[derive(Debug)]
pub struct FixedClock(AtomicI64);

impl FixedClock {
    pub fn new(now: Ms) -> Self {
        Self(AtomicI64::new(now))
    }

    pub fn set(&self, now: Ms) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Ms) {
        self.0.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> Ms {
        self.0.load(Ordering::SeqCst)
    }
}

// ── serde adapters ───────────────────────────────────────────────
//
// Human-readable formats (JSON fixtures, tool payloads) carry ISO strings;
// the binary WAL encoding carries the raw millisecond value.

pub mod iso {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::model::Ms;

    pub fn serialize<S: Serializer>(ms: &Ms, s: S) -> Result<S::Ok, S::Error> {
        if s.is_human_readable() {
            s.serialize_str(&super::format_datetime(*ms))
        } else {
            s.serialize_i64(*ms)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Ms, D::Error> {
        if d.is_human_readable() {
            let raw = String::deserialize(d)?;
            super::parse_datetime(&raw).map_err(D::Error::custom)
        } else {
            i64::deserialize(d)
        }
    }
}

pub mod iso_opt {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::model::Ms;

    pub fn serialize<S: Serializer>(ms: &Option<Ms>, s: S) -> Result<S::Ok, S::Error> {
        match ms {
            Some(ms) if s.is_human_readable() => s.serialize_some(&super::format_datetime(*ms)),
            Some(ms) => s.serialize_some(ms),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Ms>, D::Error> {
        if d.is_human_readable() {
            let raw: Option<String> = Option::deserialize(d)?;
            raw.map(|r| super::parse_datetime(&r).map_err(D::Error::custom))
                .transpose()
        } else {
            Option::<i64>::deserialize(d)
        }
    }
}
