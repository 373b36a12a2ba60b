//! Intake records → validated booking requests.
//!
//! An intake file is a JSON array of records:
//!
//! ```json
//! [
//!   {"name": "Ada", "email": "ada@example.com",
//!    "preferred_slots": ["2025-09-01 09:00", "2025-09-01 10:30"]},
//!   {"name": "Bo", "email": "bo@example.com",
//!    "preferred_slots": "2025-09-01 09:00; 2025-09-02 09:00"}
//! ]
//! ```
//!
//! The same records may come as CSV with a `name,email,preferred_slots`
//! header, as produced by most form tools:
//!
//! ```text
//! name,email,preferred_slots
//! Ada,ada@example.com,2025-09-01 09:00;2025-09-01 10:30
//! ```
//!
//! `preferred_slots` may be a list or a single `;`-separated string; either
//! way its order is the requester's preference rank. A record that cannot be
//! turned into a request yields an [`InvalidRequest`] instead of failing the
//! whole file.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::{BookingError, Result};
use crate::interval::{parse_timestamp, Interval};

/// A validated request: who, how to reach them, and their ranked candidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Request {
    pub name: String,
    pub email: String,
    /// Candidate intervals in preference order. Never empty.
    pub candidates: Vec<Interval>,
    /// Raw slot strings that were skipped because they did not parse.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rejected_slots: Vec<String>,
}

/// Why an intake record could not become a [`Request`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidRecord {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("name is empty")]
    EmptyName,

    #[error("invalid email '{0}'")]
    InvalidEmail(String),

    #[error("no preferred slots given")]
    NoPreferredSlots,

    #[error("no valid preferred slots (rejected: {})", .0.join(", "))]
    NoValidSlots(Vec<String>),

    #[error("malformed record: {0}")]
    Malformed(String),
}

impl Serialize for InvalidRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A record that failed validation, with whatever identity could be salvaged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub reason: InvalidRecord,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PreferredSlots {
    List(Vec<String>),
    Joined(String),
}

impl PreferredSlots {
    fn into_raw(self) -> Vec<String> {
        let raw = match self {
            PreferredSlots::List(list) => list,
            PreferredSlots::Joined(joined) => joined.split(';').map(str::to_string).collect(),
        };
        raw.into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

#[derive(Deserialize)]
struct IntakeRecord {
    name: Option<String>,
    email: Option<String>,
    preferred_slots: Option<PreferredSlots>,
}

/// Split an intake document into its records.
///
/// # Errors
/// Returns `BookingError::InvalidInput` if the document is not JSON or its top
/// level is not an array. Individual records are validated later by
/// [`parse_record`].
pub fn parse_intake(json: &str) -> Result<Vec<Value>> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| BookingError::InvalidInput(format!("intake is not valid JSON: {}", e)))?;
    match value {
        Value::Array(records) => Ok(records),
        other => Err(BookingError::InvalidInput(format!(
            "intake must be a JSON array of records, found {}",
            json_kind(&other)
        ))),
    }
}

/// How an intake document is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntakeFormat {
    #[default]
    Json,
    Csv,
}

impl IntakeFormat {
    /// `.csv` files are CSV, everything else is JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => IntakeFormat::Csv,
            _ => IntakeFormat::Json,
        }
    }
}

impl FromStr for IntakeFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(IntakeFormat::Json),
            "csv" => Ok(IntakeFormat::Csv),
            other => Err(format!("unknown intake format '{}', expected json or csv", other)),
        }
    }
}

impl fmt::Display for IntakeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IntakeFormat::Json => "json",
            IntakeFormat::Csv => "csv",
        })
    }
}

/// Split an intake document in the given format into its records.
pub fn parse_intake_as(input: &str, format: IntakeFormat) -> Result<Vec<Value>> {
    match format {
        IntakeFormat::Json => parse_intake(input),
        IntakeFormat::Csv => parse_intake_csv(input),
    }
}

/// Split a CSV intake document into records, one JSON object per row keyed by
/// the header names.
///
/// Empty cells are kept as empty strings, so they fail validation the same
/// way an empty JSON string does. A row shorter than the header simply lacks
/// the trailing fields.
///
/// # Errors
/// Returns `BookingError::InvalidInput` if the document has no header row or
/// is not readable CSV.
pub fn parse_intake_csv(input: &str) -> Result<Vec<Value>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(input.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| BookingError::InvalidInput(format!("intake CSV header: {}", e)))?
        .clone();
    if headers.iter().all(str::is_empty) {
        return Err(BookingError::InvalidInput(
            "intake CSV has no header row".to_string(),
        ));
    }

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| BookingError::InvalidInput(format!("intake CSV: {}", e)))?;
        let fields: Map<String, Value> = headers
            .iter()
            .zip(row.iter())
            .map(|(key, cell)| (key.to_string(), Value::String(cell.to_string())))
            .collect();
        records.push(Value::Object(fields));
    }
    Ok(records)
}

/// Validate one intake record and expand its preferred slots into candidate
/// intervals of length `duration`.
///
/// Malformed slot timestamps are skipped and reported in
/// [`Request::rejected_slots`]; the record is only invalid if none survive.
pub fn parse_record(value: &Value, duration: Duration) -> std::result::Result<Request, InvalidRequest> {
    let salvage = |reason: InvalidRecord| InvalidRequest {
        name: value
            .get("name")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        email: value
            .get("email")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string()),
        reason,
    };

    let record: IntakeRecord = IntakeRecord::deserialize(value)
        .map_err(|e| salvage(InvalidRecord::Malformed(e.to_string())))?;

    let name = record
        .name
        .ok_or_else(|| salvage(InvalidRecord::MissingField("name")))?
        .trim()
        .to_string();
    if name.is_empty() {
        return Err(salvage(InvalidRecord::EmptyName));
    }

    let email = record
        .email
        .ok_or_else(|| salvage(InvalidRecord::MissingField("email")))?
        .trim()
        .to_string();
    if !is_plausible_email(&email) {
        return Err(salvage(InvalidRecord::InvalidEmail(email)));
    }

    let raw_slots = record
        .preferred_slots
        .map(PreferredSlots::into_raw)
        .unwrap_or_default();
    if raw_slots.is_empty() {
        return Err(salvage(InvalidRecord::NoPreferredSlots));
    }

    let mut candidates = Vec::with_capacity(raw_slots.len());
    let mut rejected_slots = Vec::new();
    for raw in raw_slots {
        match parse_timestamp(&raw).and_then(|start| Interval::starting_at(start, duration)) {
            Ok(interval) => candidates.push(interval),
            Err(_) => rejected_slots.push(raw),
        }
    }

    if candidates.is_empty() {
        return Err(salvage(InvalidRecord::NoValidSlots(rejected_slots)));
    }

    Ok(Request {
        name,
        email,
        candidates,
        rejected_slots,
    })
}

/// A deliberately loose check: one `@` with text on both sides, no whitespace
/// or control characters. The address ends up inside an iCalendar property, so
/// line breaks must never get through.
fn is_plausible_email(email: &str) -> bool {
    if email.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
