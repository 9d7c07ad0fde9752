// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Append-only ledger log.
//!
//! Entries are numbered from 1 without gaps. Every append also extends a
//! blake3 root chain:
//!
//! ```text
//! root(0) = [0; 32]
//! root(n) = blake3(root(n-1) || canonical_bytes(entry n))
//! ```
//!
//! Two ledgers of equal size with equal roots agree on every entry, so a
//! fork is visible without shipping entries around.

use crate::error::{KernelError, Result};
use crate::types::{Hash32, LedgerEntry, SeqNo};

pub const EMPTY_ROOT: Hash32 = [0u8; 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// Identical entry was already at this seq; nothing changed.
    AlreadyPresent,
}

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    entries: Vec<LedgerEntry>,
    /// `roots[i]` is the root after entry `i + 1`.
    roots: Vec<Hash32>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from entries in commit order (recovery).
    pub fn from_entries(entries: impl IntoIterator<Item = LedgerEntry>) -> Result<Self> {
        let mut ledger = Ledger::new();
        for entry in entries {
            ledger.append(entry)?;
        }
        Ok(ledger)
    }

    /// Highest sequence number present, 0 if empty.
    pub fn size(&self) -> SeqNo {
        self.entries.len() as SeqNo
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn root(&self) -> Hash32 {
        self.roots.last().copied().unwrap_or(EMPTY_ROOT)
    }

    /// Root after `seq` entries, `None` past the end.
    pub fn root_at(&self, seq: SeqNo) -> Option<Hash32> {
        if seq == 0 {
            return Some(EMPTY_ROOT);
        }
        self.roots.get((seq - 1) as usize).copied()
    }

    pub fn entry(&self, seq: SeqNo) -> Option<&LedgerEntry> {
        if seq == 0 {
            return None;
        }
        self.entries.get((seq - 1) as usize)
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Append the next entry.
    ///
    /// Re-appending an identical entry is a no-op. A different entry at an
    /// occupied seq is `DuplicateEntry`; anything but `size + 1` otherwise is
    /// `SequenceGap`.
    pub fn append(&mut self, entry: LedgerEntry) -> Result<AppendOutcome> {
        let size = self.size();

        if entry.seq_no >= 1 && entry.seq_no <= size {
            let existing = &self.entries[(entry.seq_no - 1) as usize];
            if existing.same_content(&entry) {
                return Ok(AppendOutcome::AlreadyPresent);
            }
            return Err(KernelError::DuplicateEntry {
                seq_no: entry.seq_no,
            });
        }

        if entry.seq_no != size + 1 {
            return Err(KernelError::SequenceGap {
                expected: size + 1,
                found: entry.seq_no,
            });
        }

        let root = chain_root(&self.root(), &entry);
        self.entries.push(entry);
        self.roots.push(root);
        Ok(AppendOutcome::Appended)
    }

    /// Entries with `from <= seq <= min(to, size)`.
    ///
    /// The returned iterator borrows the ledger and is `Clone`, so a caller
    /// can restart a replay from the same point.
    pub fn read_range(&self, from: SeqNo, to: SeqNo) -> Result<LedgerRange<'_>> {
        let size = self.size();
        if from == 0 || from > size + 1 {
            return Err(KernelError::OutOfRange { from, size });
        }
        Ok(LedgerRange {
            entries: &self.entries,
            next: from,
            end: to.min(size),
        })
    }

    /// Drop every entry after `len`. Only used when a node's log is wiped.
    pub fn truncate(&mut self, len: SeqNo) {
        let len = len.min(self.size()) as usize;
        self.entries.truncate(len);
        self.roots.truncate(len);
    }
}

pub fn chain_root(prev: &Hash32, entry: &LedgerEntry) -> Hash32 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(prev);
    hasher.update(&entry.canonical_bytes());
    *hasher.finalize().as_bytes()
}

#[derive(Debug, Clone)]
pub struct LedgerRange<'a> {
    entries: &'a [LedgerEntry],
    next: SeqNo,
    end: SeqNo,
}

impl<'a> LedgerRange<'a> {
    /// Seq the next call to `next()` yields.
    pub fn position(&self) -> SeqNo {
        self.next
    }

    pub fn end(&self) -> SeqNo {
        self.end
    }
}

impl<'a> Iterator for LedgerRange<'a> {
    type Item = &'a LedgerEntry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next > self.end {
            return None;
        }
        let entry = &self.entries[(self.next - 1) as usize];
        self.next += 1;
        Some(entry)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.end + 1).saturating_sub(self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl<'a> ExactSizeIterator for LedgerRange<'a> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntryType;

    fn entry(seq: SeqNo, body: &str) -> LedgerEntry {
        LedgerEntry::new(seq, EntryType::Other(9), body.as_bytes().to_vec())
    }

    #[test]
    fn test_append_and_read_back() {
        let mut ledger = Ledger::new();
        for i in 1..=10 {
            assert_eq!(ledger.append(entry(i, &format!("e{}", i))).unwrap(), AppendOutcome::Appended);
        }
        assert_eq!(ledger.size(), 10);

        let seqs: Vec<SeqNo> = ledger.read_range(1, ledger.size()).unwrap().map(|e| e.seq_no).collect();
        assert_eq!(seqs, (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn test_gap_rejected() {
        let mut ledger = Ledger::new();
        ledger.append(entry(1, "a")).unwrap();
        let err = ledger.append(entry(3, "c")).unwrap_err();
        assert_eq!(err, KernelError::SequenceGap { expected: 2, found: 3 });
        assert_eq!(ledger.size(), 1);
    }

    #[test]
    fn test_zero_seq_is_a_gap() {
        let mut ledger = Ledger::new();
        assert!(matches!(
            ledger.append(entry(0, "a")),
            Err(KernelError::SequenceGap { expected: 1, found: 0 })
        ));
    }

    #[test]
    fn test_identical_reappend_is_noop() {
        let mut ledger = Ledger::new();
        ledger.append(entry(1, "a")).unwrap();
        let root = ledger.root();
        assert_eq!(ledger.append(entry(1, "a")).unwrap(), AppendOutcome::AlreadyPresent);
        assert_eq!(ledger.size(), 1);
        assert_eq!(ledger.root(), root);
    }

    #[test]
    fn test_conflicting_reappend_rejected() {
        let mut ledger = Ledger::new();
        ledger.append(entry(1, "a")).unwrap();
        assert_eq!(
            ledger.append(entry(1, "b")).unwrap_err(),
            KernelError::DuplicateEntry { seq_no: 1 }
        );
    }

    #[test]
    fn test_read_range_bounds() {
        let mut ledger = Ledger::new();
        for i in 1..=5 {
            ledger.append(entry(i, "x")).unwrap();
        }

        // `to` is clamped to size
        assert_eq!(ledger.read_range(4, 100).unwrap().count(), 2);
        // from == size + 1 is an empty, valid range
        assert_eq!(ledger.read_range(6, 10).unwrap().count(), 0);
        assert!(matches!(ledger.read_range(7, 10), Err(KernelError::OutOfRange { from: 7, size: 5 })));
        assert!(matches!(ledger.read_range(0, 3), Err(KernelError::OutOfRange { .. })));
    }

    #[test]
    fn test_range_is_restartable() {
        let mut ledger = Ledger::new();
        for i in 1..=4 {
            ledger.append(entry(i, "x")).unwrap();
        }
        let mut range = ledger.read_range(2, 4).unwrap();
        let checkpoint = range.clone();
        range.next();
        assert_eq!(range.position(), 3);
        assert_eq!(checkpoint.map(|e| e.seq_no).collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(range.len(), 2);
    }

    #[test]
    fn test_roots_track_history() {
        let mut a = Ledger::new();
        let mut b = Ledger::new();
        for i in 1..=3 {
            a.append(entry(i, "same")).unwrap();
            b.append(entry(i, if i == 2 { "other" } else { "same" })).unwrap();
        }
        assert_eq!(a.root_at(1), b.root_at(1));
        assert_ne!(a.root_at(2), b.root_at(2));
        assert_ne!(a.root(), b.root());
        assert_eq!(a.root_at(0), Some(EMPTY_ROOT));
        assert_eq!(a.root_at(4), None);
    }

    #[test]
    fn test_truncate_restores_prefix_root() {
        let mut ledger = Ledger::new();
        for i in 1..=6 {
            ledger.append(entry(i, "x")).unwrap();
        }
        let root_at_4 = ledger.root_at(4).unwrap();
        ledger.truncate(4);
        assert_eq!(ledger.size(), 4);
        assert_eq!(ledger.root(), root_at_4);
        ledger.append(entry(5, "y")).unwrap();
        assert_eq!(ledger.size(), 5);
    }
}
