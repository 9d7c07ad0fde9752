use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};

use replica_kernel::types::short_hex;
use replica_persistence::LEDGER_FILE;
use std::path::Path;

use crate::engine::{ForensicNode, SnapshotState};

pub fn run(dir: &Path) -> anyhow::Result<()> {
    println!("\nReplica Node Report: {}", dir.display());
    println!("--------------------");

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["File", "Status", "Details"]);

    if !dir.join(LEDGER_FILE).exists() {
        table.add_row(vec!["Ledger", "MISSING", ""]);
        println!("{table}\n");
        return Ok(());
    }

    let node = match ForensicNode::open(dir) {
        Ok(node) => node,
        Err(e) => {
            table.add_row(vec!["Ledger", "CORRUPT", &format!("{:#}", e)]);
            println!("{table}\n");
            return Ok(());
        }
    };

    let mut details = format!("{} entries, root {}", node.ledger.size(), short_hex(&node.ledger.root(), 8));
    if node.torn_tail > 0 {
        details.push_str(&format!(", {} byte torn tail ignored", node.torn_tail));
    }
    table.add_row(vec!["Ledger", "FOUND", &details]);

    match &node.snapshot {
        SnapshotState::Missing => {
            table.add_row(vec!["Snapshot", "MISSING", ""]);
        }
        SnapshotState::Corrupt(reason) => {
            table.add_row(vec!["Snapshot", "CORRUPT", reason]);
        }
        SnapshotState::Loaded(snapshot) => {
            let seq = snapshot.store.applied_seq();
            let status = if node.ledger.root_at(seq) == Some(snapshot.ledger_root) {
                "FOUND"
            } else {
                "STALE"
            };
            let msg = format!(
                "Applied seq {}, built against root {}, {} records",
                seq,
                short_hex(&snapshot.ledger_root, 8),
                snapshot.store.total_records()
            );
            table.add_row(vec!["Snapshot", status, &msg]);
        }
    }

    println!("{table}\n");
    Ok(())
}
