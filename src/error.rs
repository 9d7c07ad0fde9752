// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Error types.

use thiserror::Error;

use crate::types::{EntryType, SeqNo};

/// Local invariant violations. None of these are retried: they indicate a
/// caller bug or corrupt input, never a peer fault.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("Sequence gap: expected seq {expected}, found {found}")]
    SequenceGap { expected: SeqNo, found: SeqNo },

    #[error("Duplicate entry at seq {seq_no} with a different payload")]
    DuplicateEntry { seq_no: SeqNo },

    #[error("Range start {from} out of range for ledger of size {size}")]
    OutOfRange { from: SeqNo, size: SeqNo },

    #[error("Projection order violated: expected seq {expected}, found {found}")]
    ProjectionOrder { expected: SeqNo, found: SeqNo },

    #[error("Malformed {entry_type:?} payload at seq {seq_no}: {reason}")]
    MalformedPayload {
        seq_no: SeqNo,
        entry_type: EntryType,
        reason: String,
    },

    #[error("Unknown table: {0}")]
    UnknownTable(String),
}

pub type KernelResult<T> = core::result::Result<T, KernelError>;
pub type Result<T> = KernelResult<T>;
