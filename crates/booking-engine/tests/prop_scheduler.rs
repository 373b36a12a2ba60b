//! Property-based tests for the ledger invariant under arbitrary request batches.
//!
//! Whatever the intake looks like, the committed set must stay pairwise
//! non-overlapping, and re-running the same batch must not grow it.

use booking_engine::{
    overlaps, CommittedBooking, InviteRenderer, Ledger, MemoryLedger, MemorySink, Scheduler,
};
use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// A slot string on a 15-minute grid over two days, occasionally malformed.
fn arb_slot() -> impl Strategy<Value = String> {
    prop_oneof![
        9 => (1u32..=2, 8u32..=17, prop_oneof![Just(0u32), Just(15), Just(30), Just(45)])
            .prop_map(|(d, h, m)| format!("2025-09-{:02} {:02}:{:02}", d, h, m)),
        1 => Just("not a time".to_string()),
    ]
}

fn arb_record(index: usize) -> impl Strategy<Value = Value> {
    prop::collection::vec(arb_slot(), 0..5).prop_map(move |slots| {
        json!({
            "name": format!("Requester {index}"),
            "email": format!("r{index}@example.com"),
            "preferred_slots": slots,
        })
    })
}

fn arb_batch() -> impl Strategy<Value = Vec<Value>> {
    (0usize..24).prop_flat_map(|n| (0..n).map(arb_record).collect::<Vec<_>>())
}

fn arb_duration() -> impl Strategy<Value = i64> {
    prop_oneof![Just(15i64), Just(30), Just(45), Just(60)]
}

fn renderer() -> InviteRenderer {
    InviteRenderer::new("Clinic", "reception@clinic.example", "UTC").unwrap()
}

fn config() -> ProptestConfig {
    ProptestConfig {
        cases: 128,
        ..ProptestConfig::default()
    }
}

fn assert_pairwise_disjoint(bookings: &[CommittedBooking]) -> Result<(), TestCaseError> {
    let intervals: Vec<_> = bookings.iter().map(|b| b.interval).collect();
    for (i, a) in intervals.iter().enumerate() {
        prop_assert!(
            !overlaps(a, &intervals[i + 1..]),
            "{} overlaps a later booking",
            a
        );
    }
    Ok(())
}

proptest! {
    #![proptest_config(config())]

    #[test]
    fn ledger_never_holds_overlapping_bookings(batch in arb_batch(), minutes in arb_duration()) {
        let day = NaiveDate::from_ymd_opt(2025, 9, 1).unwrap();
        let existing = booking_engine::Interval::new(
            day.and_hms_opt(10, 0, 0).unwrap(),
            day.and_hms_opt(11, 0, 0).unwrap(),
        )
        .unwrap();
        let ledger = MemoryLedger::with_bookings(vec![CommittedBooking::block(existing)]);

        let mut scheduler =
            Scheduler::open(ledger, MemorySink::new(), renderer(), Duration::minutes(minutes)).unwrap();
        let summary = scheduler.run(&batch);

        prop_assert_eq!(summary.total, batch.len());
        prop_assert_eq!(
            summary.scheduled + summary.already_scheduled + summary.unschedulable + summary.invalid,
            summary.total
        );
        let bookings = scheduler.ledger().load().unwrap();
        prop_assert_eq!(bookings.len(), 1 + summary.scheduled);
        assert_pairwise_disjoint(&bookings)?;
    }

    #[test]
    fn rerunning_a_batch_adds_no_bookings(batch in arb_batch()) {
        let mut scheduler =
            Scheduler::open(MemoryLedger::new(), MemorySink::new(), renderer(), Duration::minutes(30)).unwrap();
        scheduler.run(&batch);
        let after_first = scheduler.committed().len();

        let (ledger, _) = scheduler.into_parts();
        let mut again =
            Scheduler::open(ledger, MemorySink::new(), renderer(), Duration::minutes(30)).unwrap();
        let summary = again.run(&batch);

        prop_assert_eq!(summary.scheduled, 0);
        prop_assert_eq!(again.committed().len(), after_first);
    }
}
