// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Payload values for module-defined metadata
//!
//! The engine only interprets its own node kinds (end of stream, flow gap,
//! target render time). Anything else rides along as a keyed value and is
//! moved with the same offset rules.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Opaque module payload, copied verbatim on clone.
    Bytes(Vec<u8>),
    Array(Vec<MetadataValue>),
    Map(BTreeMap<String, MetadataValue>),
}

impl MetadataValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            MetadataValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            MetadataValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Heap bytes owned by this value, used for ledger size accounting.
    pub fn payload_size(&self) -> usize {
        match self {
            MetadataValue::Bool(_) | MetadataValue::Int(_) | MetadataValue::Float(_) => 0,
            MetadataValue::String(s) => s.len(),
            MetadataValue::Bytes(b) => b.len(),
            MetadataValue::Array(items) => items.iter().map(Self::payload_size).sum(),
            MetadataValue::Map(map) => map
                .iter()
                .map(|(k, v)| k.len() + v.payload_size())
                .sum(),
        }
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::String(s)
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::String(s.to_string())
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        MetadataValue::Int(i)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

impl From<Vec<u8>> for MetadataValue {
    fn from(b: Vec<u8>) -> Self {
        MetadataValue::Bytes(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors_and_size() {
        let v: MetadataValue = "gain".into();
        assert_eq!(v.as_str(), Some("gain"));
        assert_eq!(v.payload_size(), 4);

        let blob: MetadataValue = vec![0u8; 12].into();
        assert_eq!(blob.as_bytes().map(<[u8]>::len), Some(12));
        assert_eq!(MetadataValue::from(7i64).as_int(), Some(7));
    }

    #[test]
    fn test_nested_size() {
        let mut map = BTreeMap::new();
        map.insert("k".to_string(), MetadataValue::Bytes(vec![1, 2, 3]));
        let v = MetadataValue::Array(vec![MetadataValue::Map(map), true.into()]);
        assert_eq!(v.payload_size(), 4);
    }
}
