// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.

//! replica-kernel: deterministic ledger log, projection store and digests
//! for replica catchup and cross-node consistency checks.

pub mod error;
pub mod types;
pub mod ledger;
pub mod transition;
pub mod projection;
pub mod digest;
pub mod diff;
pub mod replay;
pub mod view;
pub mod fixtures;

#[cfg(test)]
pub mod tests;
