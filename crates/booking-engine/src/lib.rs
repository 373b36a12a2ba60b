//! # booking-engine
//!
//! Batch reconciliation of intake requests against committed bookings.
//!
//! Each request lists preferred start times in preference order. The engine
//! picks the first one that does not overlap anything already committed,
//! records it in an append-only ledger, and renders an iCalendar invite for it.
//! Re-running on the same input books nothing new.
//!
//! ## Modules
//!
//! - [`interval`]: half-open `[start, end)` intervals and timestamp parsing
//! - [`conflict`]: overlap detection against the committed set
//! - [`selector`]: first-fit selection over a ranked candidate list
//! - [`ledger`]: durable append-only storage of committed bookings
//! - [`lock`]: cross-process lock around a ledger's read-modify-write cycle
//! - [`request`]: intake records → validated requests
//! - [`invite`]: RFC 5545 invite rendering
//! - [`sink`]: where rendered invites are written
//! - [`scheduler`]: per-run orchestration and the run summary
//! - [`settings`]: layered run settings
//! - [`error`]: error types

pub mod conflict;
pub mod error;
pub mod interval;
pub mod invite;
pub mod ledger;
pub mod lock;
pub mod request;
pub mod scheduler;
pub mod selector;
pub mod settings;
pub mod sink;

pub use conflict::{find_overlaps, overlaps};
pub use error::BookingError;
pub use interval::{parse_timestamp, Interval};
pub use invite::{ConfirmedBooking, Invite, InviteRenderer};
pub use ledger::{
    import_blocks, read_csv_blocks, CommittedBooking, FileLedger, ImportReport, Ledger,
    MemoryLedger,
};
pub use lock::{LedgerLock, LockedLedger};
pub use request::{
    parse_intake, parse_intake_as, parse_intake_csv, parse_record, IntakeFormat, InvalidRecord,
    InvalidRequest, Request,
};
pub use scheduler::{RunOutcome, RunSummary, Scheduler};
pub use selector::{select, select_ranked, Selection};
pub use settings::Settings;
pub use sink::{DirectorySink, InviteSink, MemorySink};
