//! Detect overlap between a candidate interval and the committed set.
//!
//! The committed set is treated as an unordered collection; nothing here
//! assumes it is sorted. Adjacent intervals (one ends exactly when the other
//! starts) are NOT conflicts.

use crate::interval::Interval;

/// Report whether `candidate` overlaps any interval in `committed`.
///
/// Stops at the first hit.
pub fn overlaps(candidate: &Interval, committed: &[Interval]) -> bool {
    committed.iter().any(|booked| candidate.overlaps(booked))
}

/// Collect every committed interval that `candidate` overlaps, in input order.
///
/// Used for diagnostics when a candidate is rejected; selection itself only
/// needs [`overlaps`].
pub fn find_overlaps(candidate: &Interval, committed: &[Interval]) -> Vec<Interval> {
    committed
        .iter()
        .filter(|booked| candidate.overlaps(booked))
        .copied()
        .collect()
}
