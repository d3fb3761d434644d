// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The caller-facing mutation type (§6): a tagged union of the three
//! operations an `update` call can batch together.

use serde::{Deserialize, Serialize};

/// One mutation within an `update` batch.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Change {
    /// Replaces the fingerprint of `id` with `hashes`, superseding any
    /// prior insert or delete of the same id within this batch.
    Insert { id: u32, hashes: Vec<u32> },

    /// Marks `id` as deleted.
    Delete { id: u32 },

    /// Sets a single free-form `u64` attribute, e.g. a document count.
    SetAttribute { name: String, value: u64 },
}

impl Change {
    /// The document id this change applies to, if any (attribute changes
    /// are not scoped to a document).
    #[must_use]
    pub fn doc_id(&self) -> Option<u32> {
        match self {
            Self::Insert { id, .. } | Self::Delete { id } => Some(*id),
            Self::SetAttribute { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn insert_json_roundtrip() {
        let change = Change::Insert { id: 7, hashes: vec![1, 2, 3] };
        let json = serde_json::to_string(&change).unwrap();
        assert_eq!(change, serde_json::from_str(&json).unwrap());
    }

    #[test]
    fn delete_json_roundtrip() {
        let change = Change::Delete { id: 7 };
        let json = serde_json::to_string(&change).unwrap();
        assert_eq!(change, serde_json::from_str(&json).unwrap());
    }

    #[test]
    fn set_attribute_json_roundtrip() {
        let change = Change::SetAttribute { name: "min_document_id".into(), value: 1 };
        let json = serde_json::to_string(&change).unwrap();
        assert_eq!(change, serde_json::from_str(&json).unwrap());
    }

    #[test]
    fn json_roundtrip_matches_oplog_wire_format() {
        let change = Change::Insert { id: 1, hashes: vec![1, 2, 3] };
        let json = serde_json::to_string(&change).unwrap();
        let back: Change = serde_json::from_str(&json).unwrap();
        assert_eq!(change, back);
    }
}
