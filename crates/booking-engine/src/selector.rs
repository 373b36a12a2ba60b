//! First-fit slot selection over a caller-ranked candidate list.
//!
//! The requester's preference order is authoritative: candidates are never
//! reordered by duration, earliness, or anything else. The whole committed set
//! is the conflict universe.

use tracing::debug;

use crate::conflict::{find_overlaps, overlaps};
use crate::interval::Interval;

/// A selected candidate together with its 0-based preference rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub interval: Interval,
    pub rank: usize,
}

/// Return the first candidate, in the given order, that overlaps nothing in
/// `committed`. Returns `None` when every candidate conflicts or there are none.
pub fn select(candidates: &[Interval], committed: &[Interval]) -> Option<Interval> {
    select_ranked(candidates, committed).map(|s| s.interval)
}

/// Same as [`select`], but also reports which preference rank won.
pub fn select_ranked(candidates: &[Interval], committed: &[Interval]) -> Option<Selection> {
    for (rank, candidate) in candidates.iter().enumerate() {
        if !overlaps(candidate, committed) {
            return Some(Selection {
                interval: *candidate,
                rank,
            });
        }
        debug!(
            candidate = %candidate,
            rank,
            conflicts = find_overlaps(candidate, committed).len(),
            "candidate rejected"
        );
    }
    None
}
