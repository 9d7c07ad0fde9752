// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Comparison snapshots.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::digest::TableDigest;
use crate::ledger::Ledger;
use crate::projection::ProjectionStore;
use crate::types::{short_hex, Hash32, NodeId, SeqNo, TableName};

/// What a peer reports when asked how far its ledger goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerStatus {
    pub size: SeqNo,
    pub root: Hash32,
}

impl LedgerStatus {
    pub fn of(ledger: &Ledger) -> Self {
        Self {
            size: ledger.size(),
            root: ledger.root(),
        }
    }
}

/// Point-in-time view of one node, used only for comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeView {
    pub node_id: NodeId,
    pub ledger_size: SeqNo,
    pub ledger_root: Hash32,
    pub projection_applied: SeqNo,
    pub digests: BTreeMap<TableName, TableDigest>,
}

impl NodeView {
    pub fn capture(node_id: NodeId, ledger: &Ledger, store: &ProjectionStore) -> Self {
        Self {
            node_id,
            ledger_size: ledger.size(),
            ledger_root: ledger.root(),
            projection_applied: store.applied_seq(),
            digests: store.digests(),
        }
    }

    pub fn digest(&self, table: TableName) -> TableDigest {
        self.digests.get(&table).copied().unwrap_or(TableDigest::EMPTY)
    }

    pub fn status(&self) -> LedgerStatus {
        LedgerStatus {
            size: self.ledger_size,
            root: self.ledger_root,
        }
    }

    /// Projection has caught up with the ledger.
    pub fn is_settled(&self) -> bool {
        self.projection_applied == self.ledger_size
    }

    pub fn root_hex(&self) -> String {
        short_hex(&self.ledger_root, 8)
    }
}
