// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Committed ledger entries.

use serde::{Deserialize, Serialize};

use super::id::SeqNo;
use super::table::TableName;

/// Transaction kind of a committed entry.
///
/// Wire codes follow the pool's transaction type numbers. Kinds this core
/// does not project are carried as `Other` and replayed as no-ops.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntryType {
    Node,
    Nym,
    Attrib,
    Schema,
    IssuerKey,
    Other(u16),
}

impl EntryType {
    pub fn code(self) -> u16 {
        match self {
            EntryType::Node => 0,
            EntryType::Nym => 1,
            EntryType::Attrib => 100,
            EntryType::Schema => 101,
            EntryType::IssuerKey => 102,
            EntryType::Other(code) => code,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            0 => EntryType::Node,
            1 => EntryType::Nym,
            100 => EntryType::Attrib,
            101 => EntryType::Schema,
            102 => EntryType::IssuerKey,
            other => EntryType::Other(other),
        }
    }

    /// Table this kind writes to, if any.
    pub fn table(self) -> Option<TableName> {
        match self {
            EntryType::Node => Some(TableName::Node),
            EntryType::Nym => Some(TableName::Identity),
            EntryType::Attrib => Some(TableName::Attribute),
            EntryType::Schema => Some(TableName::Schema),
            EntryType::IssuerKey => Some(TableName::IssuerKey),
            EntryType::Other(_) => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub seq_no: SeqNo,
    pub entry_type: EntryType,
    /// Opaque at the ledger layer; decoded only by the projection transition.
    pub payload: Vec<u8>,
}

impl LedgerEntry {
    pub fn new(seq_no: SeqNo, entry_type: EntryType, payload: Vec<u8>) -> Self {
        Self {
            seq_no,
            entry_type,
            payload,
        }
    }

    /// Canonical bytes fed into the ledger root chain.
    ///
    /// `[seq:8][type:2][len:4][payload]`, little endian.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(14 + self.payload.len());
        buf.extend_from_slice(&self.seq_no.to_le_bytes());
        buf.extend_from_slice(&self.entry_type.code().to_le_bytes());
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Same seq, kind and payload bytes.
    pub fn same_content(&self, other: &LedgerEntry) -> bool {
        self.seq_no == other.seq_no
            && self.entry_type == other.entry_type
            && self.payload == other.payload
    }
}
