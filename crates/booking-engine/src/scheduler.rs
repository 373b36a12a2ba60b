//! Batch orchestration: intake records in, bookings and invites out.
//!
//! Requests are processed strictly in input order, one at a time. Each
//! successful booking is appended to the ledger *and* to the in-memory
//! committed set before the next request is looked at, so earlier requests win
//! contested slots (first-come-first-served within a run).
//!
//! Failure policy:
//! - A malformed record becomes an `Invalid` outcome; the run continues.
//! - An invite that cannot be written leaves the booking committed; the
//!   outcome is still `Scheduled` but carries an artifact warning.
//! - A failed ledger append stops the run. Outcomes recorded so far are kept
//!   and the summary says why it stopped.

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::interval::Interval;
use crate::invite::{ConfirmedBooking, InviteRenderer};
use crate::ledger::{CommittedBooking, Ledger};
use crate::request::{parse_record, InvalidRequest, Request};
use crate::selector::select_ranked;
use crate::sink::InviteSink;

/// Terminal state of one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Scheduled {
        name: String,
        email: String,
        interval: Interval,
        /// 0-based preference rank of the chosen slot.
        rank: usize,
        invite_id: String,
        /// Where the invite was written; `None` if writing failed.
        artifact: Option<String>,
        /// Set when the booking is committed but its invite is missing.
        #[serde(skip_serializing_if = "Option::is_none")]
        artifact_warning: Option<String>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        skipped_slots: Vec<String>,
    },
    /// The ledger already holds a booking for this attendee at one of their
    /// candidates; nothing new was booked.
    AlreadyScheduled {
        name: String,
        email: String,
        interval: Interval,
    },
    /// Every candidate conflicted with a committed booking.
    Unschedulable { request: Request },
    Invalid { request: InvalidRequest },
}

impl RunOutcome {
    pub fn name(&self) -> Option<&str> {
        match self {
            RunOutcome::Scheduled { name, .. } | RunOutcome::AlreadyScheduled { name, .. } => {
                Some(name)
            }
            RunOutcome::Unschedulable { request } => Some(&request.name),
            RunOutcome::Invalid { request } => request.name.as_deref(),
        }
    }

    pub fn is_scheduled(&self) -> bool {
        matches!(self, RunOutcome::Scheduled { .. })
    }
}

/// Per-run totals plus every outcome in input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub scheduled: usize,
    pub already_scheduled: usize,
    pub unschedulable: usize,
    pub invalid: usize,
    /// Bookings that were committed without their invite artifact.
    pub artifact_warnings: usize,
    pub outcomes: Vec<RunOutcome>,
    /// Why the run stopped early, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl RunSummary {
    fn record(&mut self, outcome: RunOutcome) {
        self.total += 1;
        match &outcome {
            RunOutcome::Scheduled {
                artifact_warning, ..
            } => {
                self.scheduled += 1;
                if artifact_warning.is_some() {
                    self.artifact_warnings += 1;
                }
            }
            RunOutcome::AlreadyScheduled { .. } => self.already_scheduled += 1,
            RunOutcome::Unschedulable { .. } => self.unschedulable += 1,
            RunOutcome::Invalid { .. } => self.invalid += 1,
        }
        self.outcomes.push(outcome);
    }

    pub fn is_complete(&self) -> bool {
        self.aborted.is_none()
    }
}

/// Drives selection, ledger appends and invite rendering for a batch.
pub struct Scheduler<L: Ledger, S: InviteSink> {
    ledger: L,
    sink: S,
    renderer: InviteRenderer,
    duration: Duration,
    bookings: Vec<CommittedBooking>,
    committed: Vec<Interval>,
}

impl<L: Ledger, S: InviteSink> Scheduler<L, S> {
    /// Load the ledger and prepare to schedule slots of length `duration`.
    ///
    /// # Errors
    /// Any ledger load failure. A run must not start without a trustworthy
    /// view of what is already booked.
    pub fn open(ledger: L, sink: S, renderer: InviteRenderer, duration: Duration) -> Result<Self> {
        let bookings = ledger.load()?;
        let committed = bookings.iter().map(|b| b.interval).collect();
        info!(committed = bookings.len(), "ledger loaded");
        Ok(Self {
            ledger,
            sink,
            renderer,
            duration,
            bookings,
            committed,
        })
    }

    /// Intervals committed so far, including those booked in this run.
    pub fn committed(&self) -> &[Interval] {
        &self.committed
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_parts(self) -> (L, S) {
        (self.ledger, self.sink)
    }

    /// Process every record in order and summarize.
    pub fn run(&mut self, records: &[Value]) -> RunSummary {
        let mut summary = RunSummary::default();
        for (index, record) in records.iter().enumerate() {
            match self.process(record) {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    error!(index, error = %e, "ledger append failed, aborting run");
                    summary.aborted = Some(format!("record {}: {}", index + 1, e));
                    break;
                }
            }
        }
        info!(
            total = summary.total,
            scheduled = summary.scheduled,
            already_scheduled = summary.already_scheduled,
            unschedulable = summary.unschedulable,
            invalid = summary.invalid,
            artifact_warnings = summary.artifact_warnings,
            "run finished"
        );
        summary
    }

    /// Parse and schedule one intake record.
    ///
    /// # Errors
    /// Only a failed ledger append; everything else is an outcome.
    pub fn process(&mut self, record: &Value) -> Result<RunOutcome> {
        match parse_record(record, self.duration) {
            Ok(request) => self.schedule(request),
            Err(invalid) => {
                warn!(
                    name = invalid.name.as_deref().unwrap_or("<unknown>"),
                    reason = %invalid.reason,
                    "invalid request"
                );
                Ok(RunOutcome::Invalid { request: invalid })
            }
        }
    }

    /// Schedule one validated request.
    pub fn schedule(&mut self, request: Request) -> Result<RunOutcome> {
        for raw in &request.rejected_slots {
            warn!(name = %request.name, slot = %raw, "skipping malformed preferred slot");
        }

        if let Some(existing) = self.existing_booking(&request) {
            info!(name = %request.name, interval = %existing, "already scheduled, nothing to do");
            return Ok(RunOutcome::AlreadyScheduled {
                name: request.name,
                email: request.email,
                interval: existing,
            });
        }

        let Some(selection) = select_ranked(&request.candidates, &self.committed) else {
            info!(
                name = %request.name,
                candidates = request.candidates.len(),
                "no free preferred slot"
            );
            return Ok(RunOutcome::Unschedulable { request });
        };

        let booking = CommittedBooking {
            interval: selection.interval,
            attendee: Some(request.email.clone()),
            name: Some(request.name.clone()),
        };
        self.ledger.append(&booking)?;
        self.committed.push(booking.interval);
        self.bookings.push(booking);

        let invite = self.renderer.render(&ConfirmedBooking {
            name: request.name.clone(),
            email: request.email.clone(),
            interval: selection.interval,
        });
        let (artifact, artifact_warning) =
            match self.sink.write(&invite.file_name(), &invite.to_ics()) {
                Ok(reference) => (Some(reference), None),
                Err(e) => {
                    warn!(
                        name = %request.name,
                        interval = %selection.interval,
                        error = %e,
                        "booking committed but invite could not be written"
                    );
                    (None, Some(e.to_string()))
                }
            };

        info!(
            name = %request.name,
            start = %format_start(selection.interval.start()),
            rank = selection.rank,
            "scheduled"
        );

        Ok(RunOutcome::Scheduled {
            name: request.name,
            email: request.email,
            interval: selection.interval,
            rank: selection.rank,
            invite_id: invite.unique_id,
            artifact,
            artifact_warning,
            skipped_slots: request.rejected_slots,
        })
    }

    /// A committed booking made for this attendee at one of their candidates.
    fn existing_booking(&self, request: &Request) -> Option<Interval> {
        self.bookings
            .iter()
            .filter(|b| b.is_for(&request.email))
            .map(|b| b.interval)
            .find(|interval| request.candidates.contains(interval))
    }
}

fn format_start(start: NaiveDateTime) -> String {
    start.format("%Y-%m-%d %H:%M").to_string()
}
