pub mod error;
pub mod ledger_file;
pub mod snapshot;

pub use error::{PersistenceError, Result};
pub use ledger_file::LedgerFile;

/// File names inside a node's data directory.
pub const LEDGER_FILE: &str = "ledger.log";
pub const SNAPSHOT_FILE: &str = "projection.snap";
