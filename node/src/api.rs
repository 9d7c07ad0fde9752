// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Wire types for the peer HTTP API. Hashes and payloads travel hex encoded.

use replica_kernel::digest::TableDigest;
use replica_kernel::projection::ProjectionRecord;
use replica_kernel::types::{EntryType, Hash32, LedgerEntry, NodeId, SeqNo, TableName};
use replica_kernel::view::{LedgerStatus, NodeView};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LedgerStatusResponse {
    pub node_id: NodeId,
    pub size: SeqNo,
    pub root: String,
}

impl LedgerStatusResponse {
    pub fn new(node_id: NodeId, status: LedgerStatus) -> Self {
        Self {
            node_id,
            size: status.size,
            root: hex::encode(status.root),
        }
    }

    pub fn into_status(self) -> Result<LedgerStatus, String> {
        Ok(LedgerStatus {
            size: self.size,
            root: decode_hash(&self.root)?,
        })
    }
}

#[derive(Deserialize, Debug)]
pub struct EntriesQuery {
    pub from: SeqNo,
    pub to: SeqNo,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EntryDto {
    pub seq_no: SeqNo,
    pub entry_type: u16,
    pub payload: String,
}

impl From<&LedgerEntry> for EntryDto {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            seq_no: entry.seq_no,
            entry_type: entry.entry_type.code(),
            payload: hex::encode(&entry.payload),
        }
    }
}

impl EntryDto {
    pub fn into_entry(self) -> Result<LedgerEntry, String> {
        let payload = hex::decode(&self.payload).map_err(|e| format!("seq {}: bad payload hex: {}", self.seq_no, e))?;
        Ok(LedgerEntry::new(self.seq_no, EntryType::from_code(self.entry_type), payload))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EntriesResponse {
    pub entries: Vec<EntryDto>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DigestDto {
    pub table: TableName,
    pub records: u64,
    pub sum: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NodeViewResponse {
    pub node_id: NodeId,
    pub ledger_size: SeqNo,
    pub ledger_root: String,
    pub projection_applied: SeqNo,
    pub digests: Vec<DigestDto>,
}

impl From<&NodeView> for NodeViewResponse {
    fn from(view: &NodeView) -> Self {
        Self {
            node_id: view.node_id.clone(),
            ledger_size: view.ledger_size,
            ledger_root: hex::encode(view.ledger_root),
            projection_applied: view.projection_applied,
            digests: view
                .digests
                .iter()
                .map(|(table, d)| DigestDto {
                    table: *table,
                    records: d.records,
                    sum: hex::encode(d.sum),
                })
                .collect(),
        }
    }
}

impl NodeViewResponse {
    pub fn into_view(self) -> Result<NodeView, String> {
        let mut digests = BTreeMap::new();
        for d in self.digests {
            digests.insert(
                d.table,
                TableDigest {
                    records: d.records,
                    sum: decode_hash(&d.sum)?,
                },
            );
        }
        Ok(NodeView {
            node_id: self.node_id,
            ledger_size: self.ledger_size,
            ledger_root: decode_hash(&self.ledger_root)?,
            projection_applied: self.projection_applied,
            digests,
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TableRecordsResponse {
    pub table: TableName,
    pub records: Vec<ProjectionRecord>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NodeStateResponse {
    pub node_id: NodeId,
    pub state: String,
    pub ledger_size: SeqNo,
    pub applied_seq: SeqNo,
}

pub fn decode_hash(s: &str) -> Result<Hash32, String> {
    let bytes = hex::decode(s).map_err(|e| format!("bad hash hex: {}", e))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("hash is {} bytes, expected 32", b.len()))
}
