// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Projection table names.

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::KernelError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TableName {
    /// Identity records, one per NYM destination.
    Identity,
    Attribute,
    Schema,
    IssuerKey,
    /// Pool membership records.
    Node,
}

impl TableName {
    pub const ALL: [TableName; 5] = [
        TableName::Identity,
        TableName::Attribute,
        TableName::Schema,
        TableName::IssuerKey,
        TableName::Node,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TableName::Identity => "Identity",
            TableName::Attribute => "Attribute",
            TableName::Schema => "Schema",
            TableName::IssuerKey => "IssuerKey",
            TableName::Node => "Node",
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableName {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "identity" | "nym" => Ok(TableName::Identity),
            "attribute" | "attrib" => Ok(TableName::Attribute),
            "schema" => Ok(TableName::Schema),
            "issuerkey" | "issuer_key" => Ok(TableName::IssuerKey),
            "node" => Ok(TableName::Node),
            _ => Err(KernelError::UnknownTable(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!("NYM".parse::<TableName>().unwrap(), TableName::Identity);
        assert_eq!("attrib".parse::<TableName>().unwrap(), TableName::Attribute);
        assert_eq!("IssuerKey".parse::<TableName>().unwrap(), TableName::IssuerKey);
        assert!("Graph".parse::<TableName>().is_err());
    }

    #[test]
    fn test_display_roundtrips_through_parse() {
        for table in TableName::ALL {
            assert_eq!(table.to_string().parse::<TableName>().unwrap(), table);
        }
    }
}
