// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Deterministic projection transition.
//!
//! A projecting entry's payload is a JSON object. Each kind names the table
//! it writes and how the row key is derived:
//!
//! | Kind        | Table       | Key                     | Mode    |
//! |-------------|-------------|-------------------------|---------|
//! | `Nym`       | `Identity`  | `dest`                  | merge   |
//! | `Attrib`    | `Attribute` | `dest:name`             | replace |
//! | `Attrib`    | `Attribute` | `dest:<hash or enc>`    | replace |
//! | `Schema`    | `Schema`    | `origin:name:version`   | replace |
//! | `IssuerKey` | `IssuerKey` | `origin:schema_seq_no`  | replace |
//! | `Node`      | `Node`      | `alias`                 | merge   |
//!
//! In merge mode a `null` field removes that field. An attribute whose value
//! is `null` removes the whole row.

use serde_json::{Map, Value};

use crate::error::{KernelError, Result};
use crate::projection::ProjectionRecord;
use crate::types::{EntryType, FieldValue, Fields, LedgerEntry, SeqNo, TableName};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Merge,
    Replace,
    Remove,
}

/// Decoded effect of one entry on one row.
#[derive(Debug, Clone)]
pub struct Effect {
    pub table: TableName,
    pub key: String,
    pub mode: Mode,
    pub seq_no: SeqNo,
    body: Map<String, Value>,
}

/// Decode an entry's payload. `Ok(None)` for kinds that project nothing.
pub fn effect_of(entry: &LedgerEntry) -> Result<Option<Effect>> {
    let table = match entry.entry_type.table() {
        Some(table) => table,
        None => return Ok(None),
    };

    let malformed = |reason: &str| KernelError::MalformedPayload {
        seq_no: entry.seq_no,
        entry_type: entry.entry_type,
        reason: reason.to_string(),
    };

    let body = match serde_json::from_slice::<Value>(&entry.payload) {
        Ok(Value::Object(map)) => map,
        Ok(_) => return Err(malformed("payload is not a JSON object")),
        Err(e) => return Err(malformed(&e.to_string())),
    };

    let part = |field: &str| key_part(&body, field).ok_or_else(|| malformed(&format!("missing key field `{}`", field)));

    let (key, mode) = match entry.entry_type {
        EntryType::Nym => (part("dest")?, Mode::Merge),
        EntryType::Node => (part("alias")?, Mode::Merge),
        EntryType::Attrib => {
            let dest = part("dest")?;
            let (name, removed) = attrib_name(&body)
                .ok_or_else(|| malformed("attribute needs `name`, a single-key `raw`, `hash` or `enc`"))?;
            let mode = if removed { Mode::Remove } else { Mode::Replace };
            (format!("{}:{}", dest, name), mode)
        }
        EntryType::Schema => (
            format!("{}:{}:{}", part("origin")?, part("name")?, part("version")?),
            Mode::Replace,
        ),
        EntryType::IssuerKey => (format!("{}:{}", part("origin")?, part("schema_seq_no")?), Mode::Replace),
        EntryType::Other(_) => return Ok(None),
    };

    Ok(Some(Effect {
        table,
        key,
        mode,
        seq_no: entry.seq_no,
        body,
    }))
}

/// `apply(current, effect) -> new record`; `None` means the row is gone.
pub fn apply(current: Option<&ProjectionRecord>, effect: &Effect) -> Option<ProjectionRecord> {
    let fields = match effect.mode {
        Mode::Remove => return None,
        Mode::Replace => {
            let mut fields = Fields::new();
            merge_into(&mut fields, &effect.body);
            fields
        }
        Mode::Merge => {
            let mut fields = current.map(|r| r.fields.clone()).unwrap_or_default();
            merge_into(&mut fields, &effect.body);
            fields
        }
    };

    Some(ProjectionRecord {
        table: effect.table,
        key: effect.key.clone(),
        fields,
        seq_no: effect.seq_no,
    })
}

fn merge_into(fields: &mut Fields, body: &Map<String, Value>) {
    for (name, value) in body {
        match FieldValue::from_json(value) {
            Some(v) => {
                fields.insert(name.clone(), v);
            }
            None => {
                fields.remove(name);
            }
        }
    }
}

fn key_part(body: &Map<String, Value>, field: &str) -> Option<String> {
    match body.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Attribute name and whether the write removes it.
///
/// Either explicit (`name` + `value`), a raw JSON document holding exactly
/// one attribute, e.g. `{"raw": "{\"name\": \"Mario\"}"}`, or an opaque
/// `hash`/`enc` value that names itself.
fn attrib_name(body: &Map<String, Value>) -> Option<(String, bool)> {
    if let Some(Value::String(name)) = body.get("name") {
        let removed = matches!(body.get("value"), Some(Value::Null));
        return Some((name.clone(), removed));
    }
    if !body.contains_key("raw") {
        return ["hash", "enc"]
            .iter()
            .find_map(|field| key_part(body, field))
            .map(|name| (name, false));
    }
    let raw = body.get("raw")?.as_str()?;
    match serde_json::from_str::<Value>(raw).ok()? {
        Value::Object(doc) if doc.len() == 1 => {
            let (name, value) = doc.into_iter().next()?;
            Some((name, value.is_null()))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(seq: SeqNo, kind: EntryType, body: Value) -> LedgerEntry {
        LedgerEntry::new(seq, kind, serde_json::to_vec(&body).unwrap())
    }

    #[test]
    fn test_nym_merge_and_field_removal() {
        let first = effect_of(&entry(1, EntryType::Nym, json!({"dest": "d1", "verkey": "~abc", "role": "0"})))
            .unwrap()
            .unwrap();
        let rec = apply(None, &first).unwrap();
        assert_eq!(rec.key, "d1");
        assert_eq!(rec.fields.get("role"), Some(&FieldValue::Text("0".into())));

        let second = effect_of(&entry(2, EntryType::Nym, json!({"dest": "d1", "role": null})))
            .unwrap()
            .unwrap();
        let rec = apply(Some(&rec), &second).unwrap();
        assert!(rec.fields.get("role").is_none());
        assert_eq!(rec.fields.get("verkey"), Some(&FieldValue::Text("~abc".into())));
        assert_eq!(rec.seq_no, 2);
    }

    #[test]
    fn test_raw_attribute_key() {
        let e = entry(
            1,
            EntryType::Attrib,
            json!({"dest": "d1", "raw": "{\"name\": \"Mario\"}", "origin": "o1"}),
        );
        let effect = effect_of(&e).unwrap().unwrap();
        assert_eq!(effect.table, TableName::Attribute);
        assert_eq!(effect.key, "d1:name");
        assert_eq!(effect.mode, Mode::Replace);
    }

    #[test]
    fn test_null_attribute_removes_row() {
        let e = entry(4, EntryType::Attrib, json!({"dest": "d1", "name": "email", "value": null}));
        let effect = effect_of(&e).unwrap().unwrap();
        assert_eq!(effect.mode, Mode::Remove);
        assert!(apply(None, &effect).is_none());
    }

    #[test]
    fn test_schema_and_issuer_key_keys() {
        let schema = effect_of(&entry(
            1,
            EntryType::Schema,
            json!({"origin": "s1", "name": "GVT", "version": "1.0", "attr_names": ["age", "sex"]}),
        ))
        .unwrap()
        .unwrap();
        assert_eq!(schema.key, "s1:GVT:1.0");

        let key = effect_of(&entry(
            2,
            EntryType::IssuerKey,
            json!({"origin": "s1", "schema_seq_no": 7, "data": {"n": "123"}}),
        ))
        .unwrap()
        .unwrap();
        assert_eq!(key.key, "s1:7");
        let rec = apply(None, &key).unwrap();
        assert_eq!(rec.fields.get("data"), Some(&FieldValue::Json(r#"{"n":"123"}"#.into())));
    }

    #[test]
    fn test_hash_attribute_key() {
        let e = entry(3, EntryType::Attrib, json!({"dest": "d1", "hash": "abc123"}));
        let effect = effect_of(&e).unwrap().unwrap();
        assert_eq!(effect.key, "d1:abc123");
        assert_eq!(effect.mode, Mode::Replace);
        let rec = apply(None, &effect).unwrap();
        assert_eq!(rec.fields.get("hash"), Some(&FieldValue::Text("abc123".into())));
    }

    #[test]
    fn test_enc_attribute_key() {
        let e = entry(3, EntryType::Attrib, json!({"dest": "d1", "enc": "0f1e2d"}));
        let effect = effect_of(&e).unwrap().unwrap();
        assert_eq!(effect.key, "d1:0f1e2d");
        assert_eq!(effect.mode, Mode::Replace);
    }

    #[test]
    fn test_node_keyed_by_alias() {
        let first = effect_of(&entry(
            1,
            EntryType::Node,
            json!({"alias": "Node1", "dest": "Gw6p", "node_port": 9701, "services": ["VALIDATOR"]}),
        ))
        .unwrap()
        .unwrap();
        assert_eq!(first.table, TableName::Node);
        assert_eq!(first.key, "Node1");
        assert_eq!(first.mode, Mode::Merge);

        // Demotion keeps the address fields.
        let rec = apply(None, &first).unwrap();
        let second = effect_of(&entry(2, EntryType::Node, json!({"alias": "Node1", "services": []})))
            .unwrap()
            .unwrap();
        let rec = apply(Some(&rec), &second).unwrap();
        assert_eq!(rec.fields.get("node_port"), Some(&FieldValue::Number("9701".into())));
        assert_eq!(rec.fields.get("services"), Some(&FieldValue::Json("[]".into())));

        let missing = entry(3, EntryType::Node, json!({"dest": "Gw6p"}));
        assert!(effect_of(&missing).is_err());
    }

    #[test]
    fn test_malformed_payloads() {
        let not_json = LedgerEntry::new(7, EntryType::Nym, b"not json".to_vec());
        assert!(matches!(effect_of(&not_json), Err(KernelError::MalformedPayload { seq_no: 7, .. })));

        let array = entry(8, EntryType::Nym, json!([1, 2]));
        assert!(effect_of(&array).is_err());

        let missing = entry(9, EntryType::Schema, json!({"origin": "s1", "name": "GVT"}));
        assert!(effect_of(&missing).is_err());
    }

    #[test]
    fn test_unprojected_kind_is_noop() {
        let e = LedgerEntry::new(1, EntryType::Other(55), b"anything".to_vec());
        assert!(effect_of(&e).unwrap().is_none());
    }
}
