use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use serde::Serialize;

use replica_kernel::diff::{diff_records, TableDiff};
use replica_kernel::types::{FieldValue, SeqNo, TableName};
use std::path::Path;

use crate::engine::ForensicNode;

#[derive(Debug, Serialize)]
pub struct NodeDiff {
    pub left_size: SeqNo,
    pub right_size: SeqNo,
    /// First seq whose ledger roots differ.
    pub fork_at: Option<SeqNo>,
    /// Tables whose digests differ, with their record diff.
    pub tables: Vec<TableDiff>,
}

impl NodeDiff {
    pub fn is_identical(&self) -> bool {
        self.left_size == self.right_size && self.fork_at.is_none() && self.tables.is_empty()
    }
}

/// Compare two node directories: ledgers by root, projections digest-first
/// with a record diff for every table that disagrees.
pub fn compare(left: &Path, right: &Path, only: Option<TableName>) -> anyhow::Result<NodeDiff> {
    let a = ForensicNode::open(left)?;
    let b = ForensicNode::open(right)?;
    let (pa, pb) = (a.replay_to(None)?, b.replay_to(None)?);

    let tables = match only {
        Some(t) => vec![t],
        None => TableName::ALL.to_vec(),
    };
    let tables = tables
        .into_iter()
        .filter(|t| pa.digest(*t) != pb.digest(*t))
        .map(|t| diff_records(t, &pa.records(t), &pb.records(t)))
        .collect();

    Ok(NodeDiff {
        left_size: a.ledger.size(),
        right_size: b.ledger.size(),
        fork_at: a.first_divergence(&b),
        tables,
    })
}

pub fn run(left: &Path, right: &Path, table: Option<String>, json: bool) -> anyhow::Result<()> {
    let only = table.map(|t| t.parse::<TableName>()).transpose()?;
    let diff = compare(left, right, only)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&diff)?);
        return Ok(());
    }

    let status = if diff.is_identical() { "IDENTICAL" } else { "DRIFTED" };
    let mut summary = Table::new();
    summary
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Property", "Value"]);
    summary.add_row(vec!["Left size".to_string(), diff.left_size.to_string()]);
    summary.add_row(vec!["Right size".to_string(), diff.right_size.to_string()]);
    summary.add_row(vec![
        "Ledger fork".to_string(),
        diff.fork_at.map(|s| format!("at seq {}", s)).unwrap_or_else(|| "none".to_string()),
    ]);
    summary.add_row(vec!["Status".to_string(), status.to_string()]);

    println!("\nNode Comparison");
    println!("---------------");
    println!("{summary}\n");

    for table_diff in &diff.tables {
        let mut rows = Table::new();
        rows.load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["Key", "Field", "Left", "Right"]);
        for key in &table_diff.only_left {
            rows.add_row(vec![key.as_str(), "*", "present", "missing"]);
        }
        for key in &table_diff.only_right {
            rows.add_row(vec![key.as_str(), "*", "missing", "present"]);
        }
        for record in &table_diff.changed {
            for field in &record.fields {
                let show = |v: &Option<FieldValue>| match v {
                    Some(v) => format!("{}", v),
                    None => "-".to_string(),
                };
                rows.add_row(vec![
                    record.key.clone(),
                    field.field.clone(),
                    show(&field.left),
                    show(&field.right),
                ]);
            }
        }
        println!("{} drift", table_diff.table);
        println!("{rows}\n");
    }

    Ok(())
}
