//! Property-based tests for overlap detection and first-fit selection.

use booking_engine::{overlaps, select, Interval};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

fn base() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 9, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

/// Intervals within one week, 5-minute grid, 5 minutes to 4 hours long.
/// The coarse grid makes touching and identical intervals common.
fn arb_interval() -> impl Strategy<Value = Interval> {
    (0i64..2016, 1i64..=48).prop_map(|(offset, len)| {
        let start = base() + Duration::minutes(offset * 5);
        Interval::starting_at(start, Duration::minutes(len * 5)).unwrap()
    })
}

fn config() -> ProptestConfig {
    ProptestConfig {
        cases: 512,
        ..ProptestConfig::default()
    }
}

proptest! {
    #![proptest_config(config())]

    #[test]
    fn overlap_is_symmetric(a in arb_interval(), b in arb_interval()) {
        prop_assert_eq!(overlaps(&a, &[b]), overlaps(&b, &[a]));
    }

    #[test]
    fn every_interval_overlaps_itself(a in arb_interval()) {
        prop_assert!(overlaps(&a, &[a]));
    }

    #[test]
    fn back_to_back_intervals_never_overlap(a in arb_interval(), len in 1i64..=48) {
        let next = Interval::starting_at(a.end(), Duration::minutes(len * 5)).unwrap();
        prop_assert!(!overlaps(&a, &[next]));
        prop_assert!(!overlaps(&next, &[a]));
    }

    #[test]
    fn selection_is_first_non_conflicting(
        candidates in prop::collection::vec(arb_interval(), 0..8),
        committed in prop::collection::vec(arb_interval(), 0..16),
    ) {
        let expected = candidates.iter().find(|c| !overlaps(c, &committed)).copied();
        let chosen = select(&candidates, &committed);
        prop_assert_eq!(chosen, expected);
        if let Some(c) = chosen {
            prop_assert!(!overlaps(&c, &committed));
        }
    }
}
