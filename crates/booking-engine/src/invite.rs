//! Render confirmed bookings as iCalendar (RFC 5545) invitations.
//!
//! Rendering is pure apart from the two values that must be fresh for every
//! invite: the UID (a random UUID v4) and the DTSTAMP (wall-clock UTC).
//! [`InviteRenderer::render_at`] takes both explicitly.
//!
//! Output rules:
//! - Lines end with CRLF and are folded at 75 octets (continuation lines start
//!   with a single space). Folding never splits a UTF-8 character.
//! - TEXT values (SUMMARY, DESCRIPTION) escape `\`, `;` and `,`. Line breaks
//!   become the two characters `\n`, so a value never spans raw lines.
//! - Parameter values (CN) lose double quotes and control characters and are
//!   quoted when they contain `:`, `;` or `,`.
//! - DTSTART/DTEND are local times tagged with the configured TZID. DTSTAMP is
//!   always UTC with a trailing `Z`.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{BookingError, Result};
use crate::interval::Interval;

const MAX_LINE_OCTETS: usize = 75;
const LOCAL_FORMAT: &str = "%Y%m%dT%H%M%S";
const UTC_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// The only status this system ever issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InviteStatus {
    Confirmed,
}

impl InviteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InviteStatus::Confirmed => "CONFIRMED",
        }
    }
}

/// A booking that has been durably committed and now needs its invite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedBooking {
    pub name: String,
    pub email: String,
    pub interval: Interval,
}

/// One rendered invitation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invite {
    pub unique_id: String,
    pub summary: String,
    pub description: String,
    pub organizer_name: String,
    pub organizer_address: String,
    pub attendee_name: String,
    pub attendee_address: String,
    pub interval: Interval,
    pub time_zone: String,
    pub product_id: String,
    pub issued_at: DateTime<Utc>,
    pub status: InviteStatus,
}

/// Fixed invite fields shared by every booking in a run.
#[derive(Debug, Clone)]
pub struct InviteRenderer {
    organizer_name: String,
    organizer_email: String,
    time_zone: Tz,
    summary_prefix: String,
    description: String,
    product_id: String,
    uid_domain: String,
}

impl InviteRenderer {
    /// # Errors
    /// Returns `BookingError::InvalidTimezone` if `time_zone` is not a valid
    /// IANA identifier.
    pub fn new(
        organizer_name: impl Into<String>,
        organizer_email: impl Into<String>,
        time_zone: &str,
    ) -> Result<Self> {
        let tz: Tz = time_zone
            .parse()
            .map_err(|_| BookingError::InvalidTimezone(time_zone.to_string()))?;
        Ok(Self {
            organizer_name: organizer_name.into(),
            organizer_email: organizer_email.into(),
            time_zone: tz,
            summary_prefix: "Appointment".to_string(),
            description: String::new(),
            product_id: "-//Booking Engine//Intake Scheduler//EN".to_string(),
            uid_domain: "booking.local".to_string(),
        })
    }

    pub fn with_summary_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.summary_prefix = prefix.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_product_id(mut self, product_id: impl Into<String>) -> Self {
        self.product_id = product_id.into();
        self
    }

    pub fn with_uid_domain(mut self, uid_domain: impl Into<String>) -> Self {
        self.uid_domain = uid_domain.into();
        self
    }

    /// Render with a fresh random UID and the current UTC time.
    pub fn render(&self, booking: &ConfirmedBooking) -> Invite {
        self.render_at(booking, Uuid::new_v4(), Utc::now())
    }

    /// Render with an explicit UID and issue time.
    pub fn render_at(
        &self,
        booking: &ConfirmedBooking,
        uid: Uuid,
        issued_at: DateTime<Utc>,
    ) -> Invite {
        Invite {
            unique_id: format!("{}@{}", uid, self.uid_domain),
            summary: format!("{} - {}", self.summary_prefix, booking.name),
            description: self.description.clone(),
            organizer_name: self.organizer_name.clone(),
            organizer_address: self.organizer_email.clone(),
            attendee_name: booking.name.clone(),
            attendee_address: booking.email.clone(),
            interval: booking.interval,
            time_zone: self.time_zone.name().to_string(),
            product_id: self.product_id.clone(),
            issued_at,
            status: InviteStatus::Confirmed,
        }
    }
}

impl Invite {
    /// Deterministic artifact name: `invite_<name>_<YYYYMMDDTHHMM>.ics`.
    pub fn file_name(&self) -> String {
        format!(
            "invite_{}_{}.ics",
            sanitize_file_component(&self.attendee_name),
            self.interval.start().format("%Y%m%dT%H%M")
        )
    }

    /// Serialize as an iCalendar document.
    pub fn to_ics(&self) -> String {
        let tzid = escape_param(&self.time_zone);
        let lines = [
            "BEGIN:VCALENDAR".to_string(),
            format!("PRODID:{}", escape_text(&self.product_id)),
            "VERSION:2.0".to_string(),
            "CALSCALE:GREGORIAN".to_string(),
            "METHOD:REQUEST".to_string(),
            "BEGIN:VEVENT".to_string(),
            format!("UID:{}", escape_text(&self.unique_id)),
            format!("DTSTAMP:{}", self.issued_at.format(UTC_FORMAT)),
            format!(
                "DTSTART;TZID={}:{}",
                tzid,
                self.interval.start().format(LOCAL_FORMAT)
            ),
            format!(
                "DTEND;TZID={}:{}",
                tzid,
                self.interval.end().format(LOCAL_FORMAT)
            ),
            format!("SUMMARY:{}", escape_text(&self.summary)),
            format!("DESCRIPTION:{}", escape_text(&self.description)),
            format!(
                "ORGANIZER;CN={}:mailto:{}",
                escape_param(&self.organizer_name),
                self.organizer_address
            ),
            format!(
                "ATTENDEE;CN={};RSVP=TRUE:mailto:{}",
                escape_param(&self.attendee_name),
                self.attendee_address
            ),
            format!("STATUS:{}", self.status.as_str()),
            "END:VEVENT".to_string(),
            "END:VCALENDAR".to_string(),
        ];

        let mut out = String::new();
        for line in &lines {
            fold_line(line, &mut out);
        }
        out
    }
}

/// Escape a TEXT property value (RFC 5545 §3.3.11).
pub fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str("\\n");
            }
            '\n' => out.push_str("\\n"),
            c if c.is_control() && c != '\t' => {}
            c => out.push(c),
        }
    }
    out
}

/// Make a value safe as a property parameter (RFC 5545 §3.2).
pub fn escape_param(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .filter(|c| *c != '"' && !c.is_control())
        .collect();
    if cleaned.contains([':', ';', ',']) {
        format!("\"{}\"", cleaned)
    } else {
        cleaned
    }
}

/// Append `line` to `out`, folded at 75 octets, terminated with CRLF.
fn fold_line(line: &str, out: &mut String) {
    let mut budget = MAX_LINE_OCTETS;
    let mut used = 0;
    for c in line.chars() {
        let len = c.len_utf8();
        if used + len > budget {
            out.push_str("\r\n ");
            // The leading space counts against the continuation line.
            budget = MAX_LINE_OCTETS - 1;
            used = 0;
        }
        out.push(c);
        used += len;
    }
    out.push_str("\r\n");
}

fn sanitize_file_component(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
