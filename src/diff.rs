// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Record-level table diff.
//!
//! Used when two digests disagree, to say which keys and fields differ.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::projection::ProjectionRecord;
use crate::types::{FieldValue, TableName};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub field: String,
    pub left: Option<FieldValue>,
    pub right: Option<FieldValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDiff {
    pub key: String,
    pub fields: Vec<FieldDiff>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDiff {
    pub table: TableName,
    pub only_left: Vec<String>,
    pub only_right: Vec<String>,
    pub changed: Vec<RecordDiff>,
}

impl TableDiff {
    pub fn is_empty(&self) -> bool {
        self.only_left.is_empty() && self.only_right.is_empty() && self.changed.is_empty()
    }

    /// Every key that differs, sorted.
    pub fn diverging_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .only_left
            .iter()
            .chain(self.only_right.iter())
            .map(String::as_str)
            .chain(self.changed.iter().map(|c| c.key.as_str()))
            .collect();
        keys.sort_unstable();
        keys
    }
}

/// Set-difference two tables. Input order does not matter.
pub fn diff_records(table: TableName, left: &[ProjectionRecord], right: &[ProjectionRecord]) -> TableDiff {
    let left: BTreeMap<&str, &ProjectionRecord> = left.iter().map(|r| (r.key.as_str(), r)).collect();
    let right: BTreeMap<&str, &ProjectionRecord> = right.iter().map(|r| (r.key.as_str(), r)).collect();

    let mut diff = TableDiff {
        table,
        only_left: Vec::new(),
        only_right: Vec::new(),
        changed: Vec::new(),
    };

    for (key, l) in &left {
        match right.get(key) {
            None => diff.only_left.push(key.to_string()),
            Some(r) => {
                let fields = diff_fields(l, r);
                if !fields.is_empty() {
                    diff.changed.push(RecordDiff {
                        key: key.to_string(),
                        fields,
                    });
                }
            }
        }
    }

    for key in right.keys() {
        if !left.contains_key(key) {
            diff.only_right.push(key.to_string());
        }
    }

    diff
}

fn diff_fields(left: &ProjectionRecord, right: &ProjectionRecord) -> Vec<FieldDiff> {
    let l: BTreeMap<&String, &FieldValue> = left.comparable_fields().collect();
    let r: BTreeMap<&String, &FieldValue> = right.comparable_fields().collect();
    let names: BTreeSet<&String> = l.keys().chain(r.keys()).copied().collect();

    names
        .into_iter()
        .filter_map(|name| {
            let lv = l.get(name).copied();
            let rv = r.get(name).copied();
            if lv == rv {
                return None;
            }
            Some(FieldDiff {
                field: name.clone(),
                left: lv.cloned(),
                right: rv.cloned(),
            })
        })
        .collect()
}
