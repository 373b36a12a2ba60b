//! End-to-end tests for the run orchestrator.
//!
//! Scenarios cover first-fit selection, first-come-first-served ordering within
//! a run, idempotent re-runs, and the failure policy for ledger and artifact
//! storage.

use booking_engine::{
    overlaps, BookingError, CommittedBooking, DirectorySink, FileLedger, Interval, InviteRenderer,
    InviteSink, Ledger, MemoryLedger, MemorySink, RunOutcome, Scheduler,
};
use chrono::{Duration, NaiveDate};
use serde_json::{json, Value};

// ── Helpers ─────────────────────────────────────────────────────────────────

fn renderer() -> InviteRenderer {
    InviteRenderer::new("Clinic", "reception@clinic.example", "Africa/Lagos").unwrap()
}

fn thirty() -> Duration {
    Duration::minutes(30)
}

fn at(hour: u32, min: u32) -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 9, 1)
        .unwrap()
        .and_hms_opt(hour, min, 0)
        .unwrap()
}

fn iv(sh: u32, sm: u32, eh: u32, em: u32) -> Interval {
    Interval::new(at(sh, sm), at(eh, em)).unwrap()
}

fn record(name: &str, slots: &[&str]) -> Value {
    json!({
        "name": name,
        "email": format!("{}@example.com", name.to_lowercase()),
        "preferred_slots": slots,
    })
}

fn memory_scheduler(existing: Vec<Interval>) -> Scheduler<MemoryLedger, MemorySink> {
    let ledger = MemoryLedger::with_bookings(existing.into_iter().map(CommittedBooking::block).collect());
    Scheduler::open(ledger, MemorySink::new(), renderer(), thirty()).unwrap()
}

/// Ledger whose appends start failing after `ok_appends` successes.
struct FlakyLedger {
    inner: MemoryLedger,
    ok_appends: usize,
}

impl Ledger for FlakyLedger {
    fn load(&self) -> booking_engine::error::Result<Vec<CommittedBooking>> {
        self.inner.load()
    }

    fn append(&mut self, booking: &CommittedBooking) -> booking_engine::error::Result<()> {
        if self.ok_appends == 0 {
            return Err(BookingError::storage(
                "appending to ledger",
                std::io::Error::other("disk full"),
            ));
        }
        self.ok_appends -= 1;
        self.inner.append(booking)
    }
}

/// Ledger that cannot be read at all.
struct UnreadableLedger;

impl Ledger for UnreadableLedger {
    fn load(&self) -> booking_engine::error::Result<Vec<CommittedBooking>> {
        Err(BookingError::storage(
            "reading ledger",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        ))
    }

    fn append(&mut self, _: &CommittedBooking) -> booking_engine::error::Result<()> {
        unreachable!("never opened")
    }
}

/// Sink that rejects every write.
struct BrokenSink;

impl InviteSink for BrokenSink {
    fn write(&mut self, _: &str, _: &str) -> booking_engine::error::Result<String> {
        Err(BookingError::storage(
            "writing invite",
            std::io::Error::other("read-only filesystem"),
        ))
    }
}

// ── Scenarios ───────────────────────────────────────────────────────────────

#[test]
fn ada_unschedulable_when_existing_hour_covers_both_candidates() {
    let mut scheduler = memory_scheduler(vec![iv(10, 0, 11, 0)]);
    let summary = scheduler.run(&[record("Ada", &["2025-09-01 10:00", "2025-09-01 10:30"])]);

    assert_eq!(summary.unschedulable, 1);
    assert!(matches!(
        &summary.outcomes[0],
        RunOutcome::Unschedulable { request } if request.name == "Ada"
    ));
    assert_eq!(scheduler.committed(), &[iv(10, 0, 11, 0)]);
    assert!(scheduler.sink().documents().is_empty());
}

#[test]
fn bo_scheduled_on_empty_ledger_with_one_confirmed_invite() {
    let mut scheduler = memory_scheduler(vec![]);
    let summary = scheduler.run(&[record("Bo", &["2025-09-01 09:00"])]);

    assert_eq!(summary.scheduled, 1);
    match &summary.outcomes[0] {
        RunOutcome::Scheduled {
            interval,
            rank,
            artifact,
            artifact_warning,
            ..
        } => {
            assert_eq!(*interval, iv(9, 0, 9, 30));
            assert_eq!(*rank, 0);
            assert_eq!(artifact.as_deref(), Some("memory://invite_Bo_20250901T0900.ics"));
            assert!(artifact_warning.is_none());
        }
        other => panic!("expected Scheduled, got {other:?}"),
    }

    let bookings = scheduler.ledger().bookings();
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].interval, iv(9, 0, 9, 30));

    let docs = scheduler.sink().documents();
    assert_eq!(docs.len(), 1);
    let ics = docs.values().next().unwrap();
    assert!(ics.contains("STATUS:CONFIRMED"));
    assert!(ics.contains("ATTENDEE;CN=Bo;RSVP=TRUE:mailto:bo@example.com"));
}

#[test]
fn earlier_request_wins_contested_slot_within_a_run() {
    let mut scheduler = memory_scheduler(vec![]);
    let summary = scheduler.run(&[
        record("Ada", &["2025-09-01 09:00"]),
        record("Bo", &["2025-09-01 09:00"]),
    ]);

    assert_eq!(summary.total, 2);
    assert_eq!(summary.scheduled, 1);
    assert_eq!(summary.unschedulable, 1);
    assert_eq!(summary.outcomes[0].name(), Some("Ada"));
    assert!(summary.outcomes[0].is_scheduled());
    assert!(matches!(summary.outcomes[1], RunOutcome::Unschedulable { .. }));
}

#[test]
fn malformed_only_slot_is_invalid_and_run_continues() {
    let mut scheduler = memory_scheduler(vec![]);
    let summary = scheduler.run(&[
        record("Cy", &["2025-09-01 25:00"]),
        record("Di", &["2025-09-01 09:00"]),
    ]);

    assert_eq!(summary.invalid, 1);
    assert_eq!(summary.scheduled, 1);
    assert!(matches!(summary.outcomes[0], RunOutcome::Invalid { .. }));
    assert_eq!(summary.outcomes[1].name(), Some("Di"));
}

#[test]
fn malformed_slot_is_skipped_and_reported() {
    let mut scheduler = memory_scheduler(vec![]);
    let summary = scheduler.run(&[record("Ed", &["garbage", "2025-09-01 11:00"])]);

    match &summary.outcomes[0] {
        RunOutcome::Scheduled {
            interval,
            rank,
            skipped_slots,
            ..
        } => {
            assert_eq!(*interval, iv(11, 0, 11, 30));
            assert_eq!(*rank, 0, "rank counts valid candidates only");
            assert_eq!(skipped_slots, &vec!["garbage".to_string()]);
        }
        other => panic!("expected Scheduled, got {other:?}"),
    }
}

#[test]
fn later_candidate_chosen_when_earlier_ones_conflict() {
    let mut scheduler = memory_scheduler(vec![iv(13, 0, 14, 0)]);
    let summary = scheduler.run(&[record(
        "Fay",
        &["2025-09-01 13:00", "2025-09-01 13:30", "2025-09-01 14:00"],
    )]);

    match &summary.outcomes[0] {
        RunOutcome::Scheduled { interval, rank, .. } => {
            assert_eq!(*interval, iv(14, 0, 14, 30));
            assert_eq!(*rank, 2);
        }
        other => panic!("expected Scheduled, got {other:?}"),
    }
}

// ── Re-runs ─────────────────────────────────────────────────────────────────

#[test]
fn rerun_on_identical_input_books_nothing_new() {
    let dir = tempfile::tempdir().unwrap();
    let ledger_path = dir.path().join("bookings.jsonl");
    let out = dir.path().join("out");
    let intake = vec![
        record("Ada", &["2025-09-01 09:00", "2025-09-01 10:00"]),
        record("Bo", &["2025-09-01 09:00", "2025-09-01 11:00"]),
    ];

    let first = {
        let mut s = Scheduler::open(
            FileLedger::new(&ledger_path),
            DirectorySink::new(&out),
            renderer(),
            thirty(),
        )
        .unwrap();
        s.run(&intake)
    };
    assert_eq!(first.scheduled, 2);
    let after_first = FileLedger::new(&ledger_path).load().unwrap();
    assert_eq!(after_first.len(), 2);

    let second = {
        let mut s = Scheduler::open(
            FileLedger::new(&ledger_path),
            DirectorySink::new(&out),
            renderer(),
            thirty(),
        )
        .unwrap();
        s.run(&intake)
    };
    assert_eq!(second.scheduled, 0);
    assert_eq!(second.already_scheduled, 2);
    assert_eq!(FileLedger::new(&ledger_path).load().unwrap(), after_first);

    match &second.outcomes[1] {
        RunOutcome::AlreadyScheduled { interval, .. } => assert_eq!(*interval, iv(11, 0, 11, 30)),
        other => panic!("expected AlreadyScheduled, got {other:?}"),
    }
    assert_eq!(std::fs::read_dir(&out).unwrap().count(), 2);
}

#[test]
fn same_attendee_with_new_candidates_is_booked_again() {
    let mut scheduler = memory_scheduler(vec![]);
    scheduler.run(&[record("Ada", &["2025-09-01 09:00"])]);
    let summary = scheduler.run(&[record("Ada", &["2025-09-01 15:00"])]);
    assert_eq!(summary.scheduled, 1);
    assert_eq!(scheduler.committed().len(), 2);
}

// ── Failure policy ──────────────────────────────────────────────────────────

#[test]
fn unreadable_ledger_is_fatal_at_open() {
    let result = Scheduler::open(UnreadableLedger, MemorySink::new(), renderer(), thirty());
    assert!(matches!(result, Err(BookingError::StorageUnavailable { .. })));
}

#[test]
fn artifact_failure_keeps_booking_and_warns() {
    let mut scheduler =
        Scheduler::open(MemoryLedger::new(), BrokenSink, renderer(), thirty()).unwrap();
    let summary = scheduler.run(&[record("Gus", &["2025-09-01 09:00"])]);

    assert_eq!(summary.scheduled, 1);
    assert_eq!(summary.artifact_warnings, 1);
    assert!(summary.is_complete());
    match &summary.outcomes[0] {
        RunOutcome::Scheduled {
            artifact,
            artifact_warning,
            ..
        } => {
            assert!(artifact.is_none());
            assert!(artifact_warning.as_deref().unwrap().contains("read-only filesystem"));
        }
        other => panic!("expected Scheduled, got {other:?}"),
    }
    assert_eq!(scheduler.ledger().bookings().len(), 1);
}

#[test]
fn append_failure_aborts_run_and_keeps_earlier_outcomes() {
    let ledger = FlakyLedger {
        inner: MemoryLedger::new(),
        ok_appends: 1,
    };
    let mut scheduler = Scheduler::open(ledger, MemorySink::new(), renderer(), thirty()).unwrap();
    let summary = scheduler.run(&[
        record("Ada", &["2025-09-01 09:00"]),
        record("Bo", &["2025-09-01 10:00"]),
        record("Cy", &["2025-09-01 11:00"]),
    ]);

    assert!(!summary.is_complete());
    assert!(summary.aborted.as_deref().unwrap().contains("record 2"));
    assert_eq!(summary.total, 1);
    assert_eq!(summary.scheduled, 1);
    // Bo's slot was never committed and no invite was produced for it.
    assert_eq!(scheduler.committed(), &[iv(9, 0, 9, 30)]);
    assert_eq!(scheduler.sink().documents().len(), 1);
}

#[test]
fn existing_artifact_is_not_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    std::fs::create_dir_all(&out).unwrap();
    std::fs::write(out.join("invite_Hal_20250901T0900.ics"), "keep me").unwrap();

    let mut scheduler =
        Scheduler::open(MemoryLedger::new(), DirectorySink::new(&out), renderer(), thirty())
            .unwrap();
    let summary = scheduler.run(&[record("Hal", &["2025-09-01 09:00"])]);

    assert_eq!(summary.artifact_warnings, 1);
    assert_eq!(
        std::fs::read_to_string(out.join("invite_Hal_20250901T0900.ics")).unwrap(),
        "keep me"
    );
}

#[test]
fn committed_set_never_overlaps_after_busy_run() {
    let mut scheduler = memory_scheduler(vec![iv(10, 0, 11, 0), iv(13, 0, 14, 0)]);
    let names = ["A", "B", "C", "D", "E", "F", "G", "H"];
    let records: Vec<Value> = names
        .iter()
        .map(|n| {
            record(
                n,
                &[
                    "2025-09-01 09:00",
                    "2025-09-01 09:15",
                    "2025-09-01 10:45",
                    "2025-09-01 11:00",
                    "2025-09-01 11:20",
                    "2025-09-01 14:00",
                ],
            )
        })
        .collect();
    let summary = scheduler.run(&records);
    assert_eq!(summary.scheduled, 3);
    assert_eq!(summary.unschedulable, 5);

    let committed = scheduler.committed();
    for (i, a) in committed.iter().enumerate() {
        assert!(!overlaps(a, &committed[i + 1..]), "{a} overlaps a later booking");
    }
}
