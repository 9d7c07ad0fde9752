// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Order-independent table digests.
//!
//! Each record hashes to 32 bytes (blake3 over its canonical encoding). A
//! table digest is the lane-wise wrapping sum of those hashes, read as four
//! little-endian u64 lanes, plus the record count. Addition commutes, so the
//! digest depends only on the set of records, never on insertion order.
//!
//! **Scope**: table name, key and comparable fields. It explicitly
//! **EXCLUDES** the seq that last touched a record and local-only fields
//! (names starting with `_`).

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::projection::ProjectionRecord;
use crate::types::short_hex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TableDigest {
    pub records: u64,
    pub sum: [u8; 32],
}

impl TableDigest {
    pub const EMPTY: TableDigest = TableDigest {
        records: 0,
        sum: [0u8; 32],
    };

    pub fn of_records<'a>(records: impl IntoIterator<Item = &'a ProjectionRecord>) -> Self {
        let mut digest = TableDigest::EMPTY;
        for record in records {
            digest.add(&record_hash(record));
        }
        digest
    }

    pub fn add(&mut self, hash: &[u8; 32]) {
        for (acc, add) in self.sum.chunks_exact_mut(8).zip(hash.chunks_exact(8)) {
            let mut a = [0u8; 8];
            let mut b = [0u8; 8];
            a.copy_from_slice(acc);
            b.copy_from_slice(add);
            let lane = u64::from_le_bytes(a).wrapping_add(u64::from_le_bytes(b));
            acc.copy_from_slice(&lane.to_le_bytes());
        }
        self.records += 1;
    }

    pub fn short_hex(&self) -> String {
        short_hex(&self.sum, 8)
    }
}

impl fmt::Display for TableDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} records / {}", self.records, self.short_hex())
    }
}

/// Hash of one record's comparable content.
pub fn record_hash(record: &ProjectionRecord) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();

    let table = record.table.as_str().as_bytes();
    hasher.update(&(table.len() as u32).to_le_bytes());
    hasher.update(table);

    hasher.update(&(record.key.len() as u32).to_le_bytes());
    hasher.update(record.key.as_bytes());

    for (name, value) in record.comparable_fields() {
        hasher.update(&(name.len() as u32).to_le_bytes());
        hasher.update(name.as_bytes());
        hasher.update(&value.canonical_bytes());
    }

    *hasher.finalize().as_bytes()
}
