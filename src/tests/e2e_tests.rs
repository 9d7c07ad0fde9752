// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::diff::diff_records;
use crate::fixtures::{sample_entry, sample_entry_variant, sample_ledger};
use crate::ledger::Ledger;
use crate::replay::rebuild_full;
use crate::types::{FieldValue, NodeId, TableName};
use crate::view::NodeView;

#[test]
fn test_single_field_divergence_is_pinpointed() {
    let ledger = sample_ledger(40);
    let healthy = rebuild_full(&ledger).unwrap();
    let mut drifted = rebuild_full(&ledger).unwrap();

    let victim = healthy.records(TableName::Attribute)[0].key.clone();
    assert!(drifted.tamper(TableName::Attribute, &victim, "raw", FieldValue::Text("{}".into())));

    let a = NodeView::capture(NodeId::from("Alpha"), &ledger, &healthy);
    let b = NodeView::capture(NodeId::from("Beta"), &ledger, &drifted);

    // Only the tampered table disagrees.
    for table in TableName::ALL {
        if table == TableName::Attribute {
            assert_ne!(a.digest(table), b.digest(table));
        } else {
            assert_eq!(a.digest(table), b.digest(table));
        }
    }

    let diff = diff_records(
        TableName::Attribute,
        &healthy.records(TableName::Attribute),
        &drifted.records(TableName::Attribute),
    );
    assert_eq!(diff.diverging_keys(), vec![victim.as_str()]);
    assert_eq!(diff.changed[0].fields.len(), 1);
    assert_eq!(diff.changed[0].fields[0].field, "raw");
}

#[test]
fn test_fork_visible_in_roots() {
    let mut b = Ledger::new();
    let mut c = Ledger::new();
    for seq in 1..=60 {
        b.append(sample_entry(seq)).unwrap();
        let entry = if seq == 30 { sample_entry_variant(seq, 1) } else { sample_entry(seq) };
        c.append(entry).unwrap();
    }
    assert_eq!(b.size(), c.size());
    assert_eq!(b.root_at(29), c.root_at(29));
    assert_ne!(b.root_at(30), c.root_at(30));
    assert_ne!(b.root(), c.root());
}
