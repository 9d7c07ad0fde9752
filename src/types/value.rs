// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Projection field values.

use core::fmt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single field of a projection record.
///
/// Numbers keep their JSON text so equal payload bytes always give equal
/// values; nested arrays and objects are kept as compact JSON.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FieldValue {
    Bool(bool),
    Number(String),
    Text(String),
    Json(String),
}

pub type Fields = BTreeMap<String, FieldValue>;

impl FieldValue {
    /// `None` for JSON `null`, which means "remove this field".
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::Bool(b) => Some(FieldValue::Bool(*b)),
            serde_json::Value::Number(n) => Some(FieldValue::Number(n.to_string())),
            serde_json::Value::String(s) => Some(FieldValue::Text(s.clone())),
            other => Some(FieldValue::Json(other.to_string())),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Tagged, length-prefixed encoding used by record hashing.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let (tag, body): (u8, &[u8]) = match self {
            FieldValue::Bool(false) => (0, &[0]),
            FieldValue::Bool(true) => (0, &[1]),
            FieldValue::Number(n) => (1, n.as_bytes()),
            FieldValue::Text(s) => (2, s.as_bytes()),
            FieldValue::Json(j) => (3, j.as_bytes()),
        };
        let mut buf = Vec::with_capacity(5 + body.len());
        buf.push(tag);
        buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
        buf.extend_from_slice(body);
        buf
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Number(n) => f.write_str(n),
            FieldValue::Text(s) => write!(f, "{:?}", s),
            FieldValue::Json(j) => f.write_str(j),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_means_absent() {
        assert_eq!(FieldValue::from_json(&json!(null)), None);
    }

    #[test]
    fn test_nested_values_are_canonical_json() {
        let v = FieldValue::from_json(&json!({"b": 1, "a": [true]})).unwrap();
        assert_eq!(v, FieldValue::Json(r#"{"a":[true],"b":1}"#.to_string()));
    }

    #[test]
    fn test_canonical_bytes_distinguish_kinds() {
        let text = FieldValue::Text("1".into());
        let number = FieldValue::Number("1".into());
        assert_ne!(text.canonical_bytes(), number.canonical_bytes());
    }
}
