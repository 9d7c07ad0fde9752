use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use replica_kernel::ledger::Ledger;
use replica_kernel::projection::ProjectionStore;
use replica_kernel::replay::rebuild;
use replica_kernel::types::SeqNo;
use replica_persistence::snapshot::{self, Snapshot};
use replica_persistence::{ledger_file, LEDGER_FILE, SNAPSHOT_FILE};

pub enum SnapshotState {
    Missing,
    Loaded(Snapshot),
    Corrupt(String),
}

/// Read-only view of one node's data directory.
pub struct ForensicNode {
    pub dir: PathBuf,
    pub ledger: Ledger,
    /// Bytes of an unfinished trailing frame, ignored on load.
    pub torn_tail: u64,
    pub snapshot: SnapshotState,
}

impl ForensicNode {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let ledger_path = dir.join(LEDGER_FILE);
        let scan = ledger_file::read_entries(&ledger_path)
            .with_context(|| format!("Failed to read ledger {}", ledger_path.display()))?;
        let ledger = Ledger::from_entries(scan.entries)
            .map_err(|e| anyhow::anyhow!("Ledger {} is not contiguous: {}", ledger_path.display(), e))?;

        let snapshot = match snapshot::load(dir.join(SNAPSHOT_FILE)) {
            Ok(Some(s)) => SnapshotState::Loaded(s),
            Ok(None) => SnapshotState::Missing,
            Err(e) => SnapshotState::Corrupt(e.to_string()),
        };

        Ok(Self {
            dir,
            ledger,
            torn_tail: scan.torn_tail,
            snapshot,
        })
    }

    /// Projection after replaying entries `1..=at` (the whole ledger when `None`).
    ///
    /// Fail-closed: the first entry the projection rejects stops the replay.
    pub fn replay_to(&self, at: Option<SeqNo>) -> Result<ProjectionStore> {
        let to = at.unwrap_or(self.ledger.size()).min(self.ledger.size());
        rebuild(&self.ledger, None, 1, to).map_err(|e| anyhow::anyhow!("Replay of {} failed: {}", self.dir.display(), e))
    }

    /// First seq at which this ledger and `other` differ, if any.
    ///
    /// A ledger that is a strict prefix of the other does not differ.
    pub fn first_divergence(&self, other: &ForensicNode) -> Option<SeqNo> {
        let common = self.ledger.size().min(other.ledger.size());
        (1..=common).find(|&seq| self.ledger.root_at(seq) != other.ledger.root_at(seq))
    }
}
