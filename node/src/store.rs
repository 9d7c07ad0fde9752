// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Node Store - ledger, projection and their durable forms for one node.
//!
//! Lock order (always acquired in this order, never reversed):
//! 1. `writer` (single writer, owns the ledger file)
//! 2. `rebuild_lock`
//! 3. `ledger`
//! 4. `projection`
//!
//! Readers (`node_view`, `read_entries`, ...) only take 3 and 4 and never
//! see a half-applied rebuild: replays run on a shadow store that is swapped
//! in once complete.

use replica_kernel::ledger::{AppendOutcome, Ledger};
use replica_kernel::projection::{ProjectionRecord, ProjectionStore};
use replica_kernel::replay::{rebuild, replay_range, ReplayProgress};
use replica_kernel::transition::effect_of;
use replica_kernel::types::{FieldValue, Hash32, LedgerEntry, NodeId, SeqNo, TableName};
use replica_kernel::view::{LedgerStatus, NodeView};
use replica_persistence::{snapshot, LedgerFile, PersistenceError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::errors::NodeError;
use crate::telemetry::LEDGER_SIZE;

pub use replica_persistence::{LEDGER_FILE, SNAPSHOT_FILE};

/// Entries replayed per ledger read lock during a rebuild.
const REBUILD_CHUNK: SeqNo = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WipeScope {
    /// Drop the projection store and its snapshot, keep the ledger.
    ProjectionOnly,
    /// Drop the projection and truncate the ledger to nothing.
    ProjectionAndLedger,
}

impl fmt::Display for WipeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WipeScope::ProjectionOnly => f.write_str("projection"),
            WipeScope::ProjectionAndLedger => f.write_str("projection+ledger"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchOutcome {
    /// New ledger entries written.
    pub appended: u64,
    /// Entries applied to the projection.
    pub applied: u64,
}

pub struct NodeStore {
    id: NodeId,
    dir: PathBuf,
    writer: Mutex<LedgerFile>,
    rebuild_lock: Mutex<()>,
    ledger: RwLock<Ledger>,
    projection: RwLock<ProjectionStore>,
    size: AtomicU64,
}

impl NodeStore {
    /// Open (or create) the node's state under `data_dir/<id>/`.
    pub fn open(id: NodeId, data_dir: impl AsRef<Path>) -> Result<Self, NodeError> {
        let dir = data_dir.as_ref().join(id.as_str());
        std::fs::create_dir_all(&dir).map_err(PersistenceError::from)?;

        let (file, ledger) = open_ledger(&dir)?;
        let base = usable_snapshot(&id, &dir, &ledger);
        let from = base.as_ref().map(|s| s.applied_seq() + 1).unwrap_or(1);
        let projection = rebuild(&ledger, base.as_ref(), from, ledger.size())?;

        tracing::info!(
            node = %id,
            ledger_size = ledger.size(),
            applied_seq = projection.applied_seq(),
            "Opened node store at {:?}",
            dir
        );

        let store = Self {
            size: AtomicU64::new(ledger.size()),
            id,
            dir,
            writer: Mutex::new(file),
            rebuild_lock: Mutex::new(()),
            ledger: RwLock::new(ledger),
            projection: RwLock::new(projection),
        };
        store.publish_size(store.ledger_size());
        Ok(store)
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    /// Ledger size as of the last successful append. Never blocks.
    pub fn ledger_size(&self) -> SeqNo {
        self.size.load(Ordering::Acquire)
    }

    pub async fn applied_seq(&self) -> SeqNo {
        self.projection.read().await.applied_seq()
    }

    pub async fn status(&self) -> LedgerStatus {
        LedgerStatus::of(&*self.ledger.read().await)
    }

    pub async fn root_at(&self, seq: SeqNo) -> Option<Hash32> {
        self.ledger.read().await.root_at(seq)
    }

    pub async fn node_view(&self) -> NodeView {
        let ledger = self.ledger.read().await;
        let projection = self.projection.read().await;
        NodeView::capture(self.id.clone(), &ledger, &projection)
    }

    pub async fn read_entries(&self, from: SeqNo, to: SeqNo) -> Result<Vec<LedgerEntry>, NodeError> {
        let ledger = self.ledger.read().await;
        Ok(ledger.read_range(from, to)?.cloned().collect())
    }

    pub async fn table_records(&self, table: TableName) -> Vec<ProjectionRecord> {
        self.projection.read().await.records(table)
    }

    /// Append one entry. This is the only way new entries reach the ledger
    /// outside of catchup.
    pub async fn commit(&self, entry: LedgerEntry) -> Result<AppendOutcome, NodeError> {
        let outcome = self.apply_batch(std::slice::from_ref(&entry)).await?;
        Ok(if outcome.appended == 1 {
            AppendOutcome::Appended
        } else {
            AppendOutcome::AlreadyPresent
        })
    }

    /// Append `entries` durably, then bring the projection up to the new size.
    ///
    /// Entries already present with identical content are skipped. If any
    /// entry is rejected the ledger is left exactly as it was.
    pub async fn apply_batch(&self, entries: &[LedgerEntry]) -> Result<BatchOutcome, NodeError> {
        let mut file = self.writer.lock().await;

        let appended = {
            let mut ledger = self.ledger.write().await;
            let before = ledger.size();
            let mut fresh = Vec::with_capacity(entries.len());

            for entry in entries {
                // Undecodable payloads never reach the file: once durable, an
                // entry is replayed on every open.
                let appended = effect_of(entry).and_then(|_| ledger.append(entry.clone()));
                match appended {
                    Ok(AppendOutcome::Appended) => fresh.push(entry.clone()),
                    Ok(AppendOutcome::AlreadyPresent) => {}
                    Err(e) => {
                        ledger.truncate(before);
                        return Err(e.into());
                    }
                }
            }

            if let Err(e) = file.append_batch(&fresh) {
                ledger.truncate(before);
                return Err(e.into());
            }

            self.size.store(ledger.size(), Ordering::Release);
            fresh.len() as u64
        };

        if appended > 0 {
            self.publish_size(self.ledger_size());
        }

        let applied = self.apply_pending().await?;
        drop(file);

        Ok(BatchOutcome { appended, applied })
    }

    /// Apply ledger entries the projection has not seen yet, in place.
    async fn apply_pending(&self) -> Result<u64, NodeError> {
        let _guard = self.rebuild_lock.lock().await;
        let ledger = self.ledger.read().await;
        let mut projection = self.projection.write().await;

        let from = projection.applied_seq() + 1;
        if from > ledger.size() {
            return Ok(0);
        }
        let progress = replay_range(&mut projection, ledger.read_range(from, ledger.size())?, |_| true)?;
        Ok(progress.applied)
    }

    /// Rebuild the projection from `base` (empty if `None`) plus
    /// `ledger[from..=to]` and swap it in.
    ///
    /// Holds the rebuild lock for the whole replay. On error or cancellation
    /// the shadow store is dropped and the live projection is untouched.
    pub async fn rebuild_from(
        &self,
        base: Option<ProjectionStore>,
        from: SeqNo,
        to: SeqNo,
        cancel: &CancellationToken,
    ) -> Result<ReplayProgress, NodeError> {
        let _guard = self.rebuild_lock.lock().await;

        let mut shadow = base.unwrap_or_default();
        let mut total = ReplayProgress {
            last_seq: shadow.applied_seq(),
            ..Default::default()
        };
        let mut next = from;

        loop {
            let chunk_end = to.min(next.saturating_add(REBUILD_CHUNK - 1));
            let progress = {
                let ledger = self.ledger.read().await;
                replay_range(&mut shadow, ledger.read_range(next, chunk_end)?, |_| !cancel.is_cancelled())?
            };
            total.applied += progress.applied;
            total.skipped += progress.skipped;
            total.last_seq = progress.last_seq;

            if progress.interrupted || cancel.is_cancelled() {
                let applied = self.projection.read().await.applied_seq();
                tracing::warn!(node = %self.id, "Rebuild cancelled at seq {}, keeping seq {}", total.last_seq, applied);
                return Err(NodeError::Cancelled {
                    node: self.id.clone(),
                    applied,
                });
            }
            if chunk_end >= to {
                break;
            }
            next = chunk_end + 1;
            tokio::task::yield_now().await;
        }

        *self.projection.write().await = shadow;
        tracing::debug!(node = %self.id, "Rebuilt projection {}..={} ({} applied)", from, to, total.applied);
        Ok(total)
    }

    /// Reload ledger and projection from disk, as on a process restart.
    pub async fn reload(&self, cancel: &CancellationToken) -> Result<ReplayProgress, NodeError> {
        let size = {
            let mut file = self.writer.lock().await;
            let (reopened, ledger) = open_ledger(&self.dir)?;
            *file = reopened;
            let size = ledger.size();
            *self.ledger.write().await = ledger;
            self.size.store(size, Ordering::Release);
            size
        };
        self.publish_size(size);

        let base = {
            let ledger = self.ledger.read().await;
            usable_snapshot(&self.id, &self.dir, &ledger)
        };
        let from = base.as_ref().map(|s| s.applied_seq() + 1).unwrap_or(1);
        self.rebuild_from(base, from, size, cancel).await
    }

    pub async fn wipe(&self, scope: WipeScope) -> Result<(), NodeError> {
        let mut file = self.writer.lock().await;
        let _guard = self.rebuild_lock.lock().await;

        snapshot::remove(self.snapshot_path())?;
        self.projection.write().await.clear();

        if scope == WipeScope::ProjectionAndLedger {
            file.truncate(0)?;
            self.ledger.write().await.truncate(0);
            self.size.store(0, Ordering::Release);
            self.publish_size(0);
        }

        tracing::info!(node = %self.id, "Wiped {}", scope);
        Ok(())
    }

    /// Persist the projection with the ledger root it was built against.
    pub async fn save_snapshot(&self) -> Result<SeqNo, NodeError> {
        let ledger = self.ledger.read().await;
        let projection = self.projection.read().await;
        let seq = projection.applied_seq();
        let root = ledger.root_at(seq).ok_or_else(|| {
            NodeError::Internal(format!(
                "projection of {} at seq {} is ahead of ledger size {}",
                self.id,
                seq,
                ledger.size()
            ))
        })?;
        snapshot::save(self.snapshot_path(), &projection, root)?;
        Ok(seq)
    }

    pub async fn flush(&self) -> Result<(), NodeError> {
        self.writer.lock().await.sync()?;
        Ok(())
    }

    /// Overwrite one projection field without going through the ledger.
    pub async fn tamper(&self, table: TableName, key: &str, field: &str, value: FieldValue) -> bool {
        self.projection.write().await.tamper(table, key, field, value)
    }

    fn publish_size(&self, size: SeqNo) {
        metrics::gauge!(LEDGER_SIZE, size as f64, "node" => self.id.to_string());
    }
}

fn open_ledger(dir: &Path) -> Result<(LedgerFile, Ledger), NodeError> {
    let (file, entries) = LedgerFile::open(dir.join(LEDGER_FILE))?;
    let ledger = Ledger::from_entries(entries)?;
    Ok((file, ledger))
}

/// The on-disk snapshot, if it was built from a prefix of `ledger`.
fn usable_snapshot(id: &NodeId, dir: &Path, ledger: &Ledger) -> Option<ProjectionStore> {
    let path = dir.join(SNAPSHOT_FILE);
    match snapshot::load(&path) {
        Ok(Some(snap)) => {
            let seq = snap.store.applied_seq();
            if ledger.root_at(seq) == Some(snap.ledger_root) {
                tracing::debug!(node = %id, "Using projection snapshot at seq {}", seq);
                Some(snap.store)
            } else {
                tracing::warn!(node = %id, "Snapshot at seq {} does not match the ledger; replaying", seq);
                if let Err(e) = snapshot::remove(&path) {
                    tracing::warn!(node = %id, "Could not remove stale snapshot: {}", e);
                }
                None
            }
        }
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(node = %id, "Unreadable snapshot ({}); replaying ledger", e);
            None
        }
    }
}
