// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Deterministic ledger fixtures shared by tests, benches and the CLI.

use serde_json::json;

use crate::ledger::Ledger;
use crate::types::{EntryType, LedgerEntry, SeqNo};

fn entry(seq: SeqNo, kind: EntryType, body: serde_json::Value) -> LedgerEntry {
    LedgerEntry::new(seq, kind, body.to_string().into_bytes())
}

pub fn nym_entry(seq: SeqNo, dest: &str, role: Option<&str>) -> LedgerEntry {
    entry(
        seq,
        EntryType::Nym,
        json!({"dest": dest, "verkey": format!("~{}", dest), "role": role}),
    )
}

pub fn attrib_entry(seq: SeqNo, dest: &str, name: &str, value: &str) -> LedgerEntry {
    let mut doc = serde_json::Map::new();
    doc.insert(name.to_string(), json!(value));
    let raw = serde_json::Value::Object(doc).to_string();
    entry(seq, EntryType::Attrib, json!({"dest": dest, "raw": raw}))
}

pub fn schema_entry(seq: SeqNo, origin: &str, name: &str, version: &str, attrs: &[&str]) -> LedgerEntry {
    entry(
        seq,
        EntryType::Schema,
        json!({"origin": origin, "name": name, "version": version, "attr_names": attrs}),
    )
}

pub fn issuer_key_entry(seq: SeqNo, origin: &str, schema_seq: SeqNo, data: &str) -> LedgerEntry {
    entry(
        seq,
        EntryType::IssuerKey,
        json!({"origin": origin, "schema_seq_no": schema_seq, "data": {"primary": data}}),
    )
}

pub fn node_entry(seq: SeqNo, alias: &str, dest: &str, port: u16) -> LedgerEntry {
    entry(
        seq,
        EntryType::Node,
        json!({"alias": alias, "dest": dest, "node_port": port, "services": ["VALIDATOR"]}),
    )
}

/// Entry `seq` of the canonical sample history.
///
/// Cycles through every kind, revisits a small set of identities so merges
/// and overwrites happen, and is a pure function of `seq`.
pub fn sample_entry(seq: SeqNo) -> LedgerEntry {
    sample_entry_variant(seq, 0)
}

/// Like [`sample_entry`] but with a different payload per `variant`, for
/// building forked histories.
pub fn sample_entry_variant(seq: SeqNo, variant: u8) -> LedgerEntry {
    let dest = format!("did{}", seq % 7);
    let tag = if variant == 0 { String::new() } else { format!("-v{}", variant) };
    match seq % 5 {
        0 => nym_entry(seq, &format!("{}{}", dest, tag), if seq % 2 == 0 { Some("2") } else { None }),
        1 => attrib_entry(seq, &dest, &format!("attr{}", seq % 3), &format!("value{}{}", seq, tag)),
        2 => nym_entry(seq, &format!("{}{}", dest, tag), Some("0")),
        3 => schema_entry(seq, &dest, "GVT", &format!("1.{}{}", seq % 4, tag), &["age", "sex", "height", "name"]),
        _ if seq % 10 == 9 => node_entry(seq, &format!("Node{}{}", seq % 4, tag), &dest, 9700 + (seq % 4) as u16),
        _ => issuer_key_entry(seq, &dest, seq.saturating_sub(1), &format!("pk{}{}", seq, tag)),
    }
}

pub fn sample_entries(from: SeqNo, to: SeqNo) -> Vec<LedgerEntry> {
    (from..=to).map(sample_entry).collect()
}

pub fn sample_ledger(size: SeqNo) -> Ledger {
    let mut ledger = Ledger::new();
    for entry in sample_entries(1, size) {
        // Sample entries are contiguous by construction.
        let _ = ledger.append(entry);
    }
    ledger
}
