// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Deterministic Replay Logic.
//!
//! Same ledger prefix → same projection digests, regardless of whether the
//! store was built incrementally, rebuilt from scratch, or rebuilt from a
//! base snapshot plus a suffix.

use crate::error::Result;
use crate::ledger::{Ledger, LedgerRange};
use crate::projection::{ApplyOutcome, ProjectionStore};
use crate::types::SeqNo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplayProgress {
    pub applied: u64,
    pub skipped: u64,
    /// Store's `applied_seq` when replay stopped.
    pub last_seq: SeqNo,
    /// `keep_going` said stop before the range was exhausted.
    pub interrupted: bool,
}

/// Apply `range` to `store` in order.
///
/// `keep_going` is consulted before each entry with that entry's seq. This
/// mutates `store` in place, so an error or interruption leaves it at the
/// last applied seq; callers that need all-or-nothing semantics replay onto
/// a copy (see [`rebuild`]).
pub fn replay_range(
    store: &mut ProjectionStore,
    range: LedgerRange<'_>,
    mut keep_going: impl FnMut(SeqNo) -> bool,
) -> Result<ReplayProgress> {
    let mut progress = ReplayProgress::default();

    for entry in range {
        if !keep_going(entry.seq_no) {
            progress.interrupted = true;
            break;
        }
        match store.apply_entry(entry)? {
            ApplyOutcome::Applied => progress.applied += 1,
            ApplyOutcome::Skipped => progress.skipped += 1,
        }
    }

    progress.last_seq = store.applied_seq();
    Ok(progress)
}

/// Build a store at `to` from `base` (empty if `None`) plus `ledger[from..=to]`.
///
/// `base` is never modified; the result is returned only if every entry
/// applied.
pub fn rebuild(ledger: &Ledger, base: Option<&ProjectionStore>, from: SeqNo, to: SeqNo) -> Result<ProjectionStore> {
    let mut shadow = base.cloned().unwrap_or_default();
    replay_range(&mut shadow, ledger.read_range(from, to)?, |_| true)?;
    Ok(shadow)
}

/// Full replay of a ledger from seq 1.
pub fn rebuild_full(ledger: &Ledger) -> Result<ProjectionStore> {
    rebuild(ledger, None, 1, ledger.size())
}

/// True when both stores are at the same seq with identical digests.
pub fn stores_agree(a: &ProjectionStore, b: &ProjectionStore) -> bool {
    a.applied_seq() == b.applied_seq() && a.digests() == b.digests()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KernelError;
    use crate::fixtures::sample_ledger;

    #[test]
    fn test_rebuild_matches_incremental() {
        let ledger = sample_ledger(40);

        let mut incremental = ProjectionStore::new();
        for entry in ledger.entries() {
            incremental.apply_entry(entry).unwrap();
        }

        let rebuilt = rebuild_full(&ledger).unwrap();
        assert!(stores_agree(&incremental, &rebuilt));
    }

    #[test]
    fn test_partial_then_suffix() {
        let ledger = sample_ledger(30);
        let base = rebuild(&ledger, None, 1, 12).unwrap();
        assert_eq!(base.applied_seq(), 12);

        let full = rebuild(&ledger, Some(&base), 13, 30).unwrap();
        assert!(stores_agree(&full, &rebuild_full(&ledger).unwrap()));
        // base untouched
        assert_eq!(base.applied_seq(), 12);
    }

    #[test]
    fn test_overlapping_suffix_is_idempotent() {
        let ledger = sample_ledger(20);
        let base = rebuild(&ledger, None, 1, 15).unwrap();
        let full = rebuild(&ledger, Some(&base), 10, 20).unwrap();
        assert!(stores_agree(&full, &rebuild_full(&ledger).unwrap()));
    }

    #[test]
    fn test_suffix_with_gap_fails() {
        let ledger = sample_ledger(20);
        let base = rebuild(&ledger, None, 1, 5).unwrap();
        let err = rebuild(&ledger, Some(&base), 8, 20).unwrap_err();
        assert_eq!(err, KernelError::ProjectionOrder { expected: 6, found: 8 });
    }

    #[test]
    fn test_interrupted_replay_stops_cleanly() {
        let ledger = sample_ledger(20);
        let mut store = ProjectionStore::new();
        let progress = replay_range(&mut store, ledger.read_range(1, 20).unwrap(), |seq| seq <= 7).unwrap();
        assert!(progress.interrupted);
        assert_eq!(progress.applied, 7);
        assert_eq!(store.applied_seq(), 7);
    }
}
