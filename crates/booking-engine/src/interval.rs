//! Half-open time intervals and the timestamp formats accepted for them.
//!
//! All timestamps are wall-clock times in the configured named zone. No zone
//! conversion happens here; the zone name is only attached when an invite is
//! rendered.

use std::fmt;

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;

use crate::error::{BookingError, Result};

/// Formats accepted for a preferred slot or a stored timestamp, tried in order.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
];

/// A half-open range `[start, end)` with `end > start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Interval {
    start: NaiveDateTime,
    end: NaiveDateTime,
}

impl Interval {
    /// Build an interval, rejecting empty or inverted ranges.
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Result<Self> {
        if end <= start {
            return Err(BookingError::InvalidInput(format!(
                "interval end {} is not after start {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// Build `[start, start + duration)`.
    pub fn starting_at(start: NaiveDateTime, duration: Duration) -> Result<Self> {
        let end = start.checked_add_signed(duration).ok_or_else(|| {
            BookingError::InvalidInput(format!("interval starting {} overflows", start))
        })?;
        Self::new(start, end)
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    pub fn end(&self) -> NaiveDateTime {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Two intervals overlap iff `a.start < b.end && a.end > b.start`.
    ///
    /// Touching endpoints (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && self.end > other.start
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format("%Y-%m-%d %H:%M"),
            self.end.format("%Y-%m-%d %H:%M")
        )
    }
}

/// Parse a wall-clock timestamp in one of the accepted formats.
///
/// Surrounding whitespace is ignored.
pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime> {
    let trimmed = raw.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .ok_or_else(|| {
            BookingError::InvalidInput(format!(
                "invalid timestamp '{}', expected YYYY-MM-DD HH:MM",
                trimmed
            ))
        })
}
