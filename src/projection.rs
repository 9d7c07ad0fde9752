// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Projection store.
//!
//! Per-table keyed records derived from the ledger. The store only moves
//! forward one seq at a time:
//! - `seq <= applied_seq` → skipped (idempotent)
//! - `seq == applied_seq + 1` → applied
//! - anything else → `ProjectionOrder`, state unchanged

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::digest::TableDigest;
use crate::error::{KernelError, Result};
use crate::transition::{apply, effect_of};
use crate::types::{FieldValue, Fields, LedgerEntry, SeqNo, TableName};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionRecord {
    pub table: TableName,
    pub key: String,
    pub fields: Fields,
    /// Seq of the entry that last wrote this record.
    pub seq_no: SeqNo,
}

impl ProjectionRecord {
    /// Fields that take part in digests and diffs. Names starting with `_`
    /// are node-local bookkeeping.
    pub fn comparable_fields(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter().filter(|(name, _)| !name.starts_with('_'))
    }
}

pub type Table = BTreeMap<String, ProjectionRecord>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Entry at or below `applied_seq`.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionStore {
    tables: BTreeMap<TableName, Table>,
    applied_seq: SeqNo,
}

impl Default for ProjectionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectionStore {
    pub fn new() -> Self {
        let tables = TableName::ALL.iter().map(|t| (*t, Table::new())).collect();
        Self {
            tables,
            applied_seq: 0,
        }
    }

    pub fn applied_seq(&self) -> SeqNo {
        self.applied_seq
    }

    pub fn apply_entry(&mut self, entry: &LedgerEntry) -> Result<ApplyOutcome> {
        if entry.seq_no <= self.applied_seq {
            return Ok(ApplyOutcome::Skipped);
        }
        if entry.seq_no != self.applied_seq + 1 {
            return Err(KernelError::ProjectionOrder {
                expected: self.applied_seq + 1,
                found: entry.seq_no,
            });
        }

        // Decode before touching state so a bad payload leaves us unchanged.
        if let Some(effect) = effect_of(entry)? {
            let table = self.tables.entry(effect.table).or_default();
            match apply(table.get(&effect.key), &effect) {
                Some(record) => {
                    table.insert(effect.key.clone(), record);
                }
                None => {
                    table.remove(&effect.key);
                }
            }
        }

        self.applied_seq = entry.seq_no;
        Ok(ApplyOutcome::Applied)
    }

    pub fn table(&self, name: TableName) -> Option<&Table> {
        self.tables.get(&name)
    }

    pub fn record(&self, name: TableName, key: &str) -> Option<&ProjectionRecord> {
        self.tables.get(&name)?.get(key)
    }

    /// Records of one table, sorted by key.
    pub fn records(&self, name: TableName) -> Vec<ProjectionRecord> {
        self.tables
            .get(&name)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn record_count(&self, name: TableName) -> usize {
        self.tables.get(&name).map(|t| t.len()).unwrap_or(0)
    }

    pub fn total_records(&self) -> usize {
        self.tables.values().map(|t| t.len()).sum()
    }

    pub fn digest(&self, name: TableName) -> TableDigest {
        match self.tables.get(&name) {
            Some(table) => TableDigest::of_records(table.values()),
            None => TableDigest::EMPTY,
        }
    }

    pub fn digests(&self) -> BTreeMap<TableName, TableDigest> {
        TableName::ALL.iter().map(|t| (*t, self.digest(*t))).collect()
    }

    /// Drop everything; the store is back at seq 0.
    pub fn clear(&mut self) {
        *self = ProjectionStore::new();
    }

    /// Test and fault-injection hook: overwrite a single field in place.
    ///
    /// Bypasses the ledger, so the store no longer matches its replay.
    pub fn tamper(&mut self, name: TableName, key: &str, field: &str, value: FieldValue) -> bool {
        match self.tables.get_mut(&name).and_then(|t| t.get_mut(key)) {
            Some(record) => {
                record.fields.insert(field.to_string(), value);
                true
            }
            None => false,
        }
    }
}
