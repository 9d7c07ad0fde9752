use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};

use replica_kernel::digest::TableDigest;
use replica_kernel::types::{short_hex, SeqNo, TableName};
use std::path::Path;

use crate::engine::ForensicNode;

/// Per-table digests of the projection rebuilt from the ledger up to `at`.
pub fn digests(dir: &Path, at: Option<SeqNo>) -> anyhow::Result<(SeqNo, Vec<(TableName, TableDigest)>)> {
    let node = ForensicNode::open(dir)?;
    let store = node.replay_to(at)?;
    let rows = TableName::ALL.iter().map(|t| (*t, store.digest(*t))).collect();
    Ok((store.applied_seq(), rows))
}

pub fn run(dir: &Path, at: Option<SeqNo>) -> anyhow::Result<()> {
    let (seq, rows) = digests(dir, at)?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Table", "Records", "Digest"]);
    for (name, digest) in rows {
        table.add_row(vec![name.to_string(), digest.records.to_string(), short_hex(&digest.sum, 16)]);
    }

    println!("\nProjection digests at seq {}\n", seq);
    println!("{table}\n");
    Ok(())
}
