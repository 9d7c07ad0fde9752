// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod id;
pub mod entry;
pub mod table;
pub mod value;

pub use entry::{EntryType, LedgerEntry};
pub use id::{short_hex, Hash32, NodeId, SeqNo};
pub use table::TableName;
pub use value::{FieldValue, Fields};
