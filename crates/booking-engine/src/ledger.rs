//! The append-only record of committed bookings.
//!
//! [`Ledger`] is the storage seam: scheduling logic only ever loads the full
//! committed set and appends one booking at a time. Nothing is rewritten,
//! compacted, or deleted.
//!
//! [`FileLedger`] stores one JSON object per line:
//!
//! ```text
//! {"start":"2025-09-01T10:00:00","end":"2025-09-01T11:00:00"}
//! {"start":"2025-09-01T09:00:00","end":"2025-09-01T09:30:00","attendee":"ada@example.com","name":"Ada"}
//! ```
//!
//! A crash mid-append can leave a final line without its newline. That record
//! was never acknowledged, so it is not committed: load skips it and the next
//! append cuts it off before writing. A malformed line anywhere else means the
//! store is corrupt; dropping it could hide a committed booking, so it is an
//! error.

use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::conflict::overlaps;
use crate::error::{BookingError, Result};
use crate::interval::{parse_timestamp, Interval};

/// One committed booking. Pre-existing blocks carry no attendee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommittedBooking {
    pub interval: Interval,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attendee: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl CommittedBooking {
    /// A block with no requester attached (e.g. imported from another calendar).
    pub fn block(interval: Interval) -> Self {
        Self {
            interval,
            attendee: None,
            name: None,
        }
    }

    /// True if this booking was made for `email` (compared case-insensitively).
    pub fn is_for(&self, email: &str) -> bool {
        self.attendee
            .as_deref()
            .is_some_and(|a| a.eq_ignore_ascii_case(email))
    }
}

/// Durable storage for committed bookings.
pub trait Ledger {
    /// Every committed booking, in the order it was recorded.
    ///
    /// A store that does not exist yet is empty, not an error.
    fn load(&self) -> Result<Vec<CommittedBooking>>;

    /// Durably record one booking. When this returns `Ok`, every later
    /// [`load`](Ledger::load) sees the booking, including from a new process.
    /// On `Err` the booking must be treated as not committed.
    fn append(&mut self, booking: &CommittedBooking) -> Result<()>;
}

/// In-memory ledger, for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    bookings: Vec<CommittedBooking>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bookings(bookings: Vec<CommittedBooking>) -> Self {
        Self { bookings }
    }

    pub fn bookings(&self) -> &[CommittedBooking] {
        &self.bookings
    }
}

impl Ledger for MemoryLedger {
    fn load(&self) -> Result<Vec<CommittedBooking>> {
        Ok(self.bookings.clone())
    }

    fn append(&mut self, booking: &CommittedBooking) -> Result<()> {
        self.bookings.push(booking.clone());
        Ok(())
    }
}

/// On-disk line format.
#[derive(Debug, Serialize, Deserialize)]
struct LedgerRecord {
    start: NaiveDateTime,
    end: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    attendee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

impl From<&CommittedBooking> for LedgerRecord {
    fn from(b: &CommittedBooking) -> Self {
        Self {
            start: b.interval.start(),
            end: b.interval.end(),
            attendee: b.attendee.clone(),
            name: b.name.clone(),
        }
    }
}

/// JSON Lines ledger file. Each append is flushed and fsynced before returning.
#[derive(Debug, Clone)]
pub struct FileLedger {
    path: PathBuf,
}

impl FileLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Ledger for FileLedger {
    fn load(&self) -> Result<Vec<CommittedBooking>> {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no ledger yet, starting empty");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(BookingError::storage(
                    format!("reading ledger {}", self.path.display()),
                    e,
                ))
            }
        };

        // Decoded line by line: a crash can cut the tail inside a multi-byte
        // character, which must not make the complete lines unreadable.
        let terminated = content.last().is_none_or(|b| *b == b'\n');
        let mut lines: Vec<&[u8]> = content.split(|b| *b == b'\n').collect();
        if terminated {
            lines.pop();
        }
        let mut bookings = Vec::with_capacity(lines.len());

        for (idx, raw) in lines.iter().copied().enumerate() {
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            if raw.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let parsed = std::str::from_utf8(raw)
                .map_err(|e| format!("line is not valid UTF-8: {}", e))
                .and_then(parse_line);
            match parsed {
                Ok(booking) => bookings.push(booking),
                // A crash mid-append only ever damages the unterminated tail.
                Err(message) if idx + 1 == lines.len() && !terminated => {
                    warn!(
                        path = %self.path.display(),
                        line = idx + 1,
                        %message,
                        "discarding truncated trailing ledger record"
                    );
                }
                Err(message) => {
                    return Err(BookingError::CorruptLedger {
                        line: idx + 1,
                        message,
                    })
                }
            }
        }

        Ok(bookings)
    }

    fn append(&mut self, booking: &CommittedBooking) -> Result<()> {
        let context = || format!("appending to ledger {}", self.path.display());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| BookingError::storage(context(), e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| BookingError::storage(context(), e))?;

        let torn = repair_tail(&mut file).map_err(|e| BookingError::storage(context(), e))?;
        if torn > 0 {
            warn!(path = %self.path.display(), bytes = torn, "cut unacknowledged partial record");
        }

        let mut line = serde_json::to_string(&LedgerRecord::from(booking))
            .map_err(|e| BookingError::storage(context(), io::Error::other(e)))?;
        line.push('\n');

        file.write_all(line.as_bytes())
            .and_then(|()| file.flush())
            .and_then(|()| file.sync_all())
            .map_err(|e| BookingError::storage(context(), e))?;

        debug!(path = %self.path.display(), interval = %booking.interval, "ledger append synced");
        Ok(())
    }
}

/// Outcome of importing legacy blocks into a ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    /// Blocks whose exact interval was already recorded.
    pub already_present: usize,
    /// Imported blocks that overlap something already recorded. They are kept:
    /// they describe time that really is taken.
    pub overlapping: usize,
}

#[derive(Debug, Deserialize)]
struct CsvBlockRow {
    #[serde(alias = "start_iso")]
    start: String,
    #[serde(alias = "end_iso")]
    end: String,
}

/// Read a legacy bookings CSV with a `start,end` (or `start_iso,end_iso`)
/// header and ISO-8601 timestamps (`2025-09-01T10:00:00`). Every row becomes
/// a block with no attendee.
///
/// # Errors
/// `StorageUnavailable` if the file cannot be read, `InvalidInput` naming
/// the line of the first row that is not a valid interval.
pub fn read_csv_blocks(path: &Path) -> Result<Vec<CommittedBooking>> {
    let content = fs::read_to_string(path)
        .map_err(|e| BookingError::storage(format!("reading {}", path.display()), e))?;
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let invalid = |detail: String| BookingError::InvalidInput(format!("{}: {}", path.display(), detail));
    let headers = reader.headers().map_err(|e| invalid(e.to_string()))?.clone();

    let mut blocks = Vec::new();
    let mut record = csv::StringRecord::new();
    while reader
        .read_record(&mut record)
        .map_err(|e| invalid(e.to_string()))?
    {
        let line = record.position().map_or(0, |p| p.line());
        let row: CsvBlockRow = record
            .deserialize(Some(&headers))
            .map_err(|e| invalid(format!("line {}: {}", line, e)))?;
        let interval = parse_timestamp(&row.start)
            .and_then(|start| Interval::new(start, parse_timestamp(&row.end)?))
            .map_err(|e| invalid(format!("line {}: {}", line, e)))?;
        blocks.push(CommittedBooking::block(interval));
    }
    Ok(blocks)
}

/// Append every block not already recorded in `ledger`, in order.
///
/// Re-importing the same file records nothing new.
pub fn import_blocks<L: Ledger>(ledger: &mut L, blocks: &[CommittedBooking]) -> Result<ImportReport> {
    let mut recorded: Vec<Interval> = ledger.load()?.iter().map(|b| b.interval).collect();
    let mut report = ImportReport::default();

    for block in blocks {
        if recorded.contains(&block.interval) {
            report.already_present += 1;
            continue;
        }
        if overlaps(&block.interval, &recorded) {
            warn!(interval = %block.interval, "imported block overlaps an existing booking");
            report.overlapping += 1;
        }
        ledger.append(block)?;
        recorded.push(block.interval);
        report.imported += 1;
    }

    info!(
        imported = report.imported,
        already_present = report.already_present,
        overlapping = report.overlapping,
        "legacy blocks imported"
    );
    Ok(report)
}

fn parse_line(line: &str) -> std::result::Result<CommittedBooking, String> {
    let record: LedgerRecord = serde_json::from_str(line).map_err(|e| e.to_string())?;
    let interval = Interval::new(record.start, record.end).map_err(|e| e.to_string())?;
    Ok(CommittedBooking {
        interval,
        attendee: record.attendee,
        name: record.name,
    })
}

/// Bring an unterminated tail in line with what [`FileLedger::load`] saw: a
/// tail that parses gets its newline, anything else is cut back to the end of
/// the last complete line. Returns the number of bytes removed.
fn repair_tail(file: &mut fs::File) -> io::Result<u64> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(0);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(0);
    }

    file.seek(SeekFrom::Start(0))?;
    let mut content = Vec::with_capacity(len as usize);
    file.read_to_end(&mut content)?;
    let keep = content
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |pos| pos + 1);

    let tail_parses = std::str::from_utf8(&content[keep..])
        .ok()
        .is_some_and(|tail| parse_line(tail).is_ok());
    if tail_parses {
        file.write_all(b"\n")?;
        return Ok(0);
    }

    file.set_len(keep as u64)?;
    Ok(len - keep as u64)
}
