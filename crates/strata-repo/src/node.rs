//! The flattened file-node tree and its JSON serialization.
//!
//! A directory serializes to `{"o": {<name>: <node>, ...}}` and a file to
//! `{"k": "<object-key>"}`. Child names live inside the `"o"` map, one
//! level below the markers, so a segment named `o` or `k` can never be
//! mistaken for a marker.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};
use strata_types::ObjectKey;

use crate::error::{RepoError, RepoResult};

/// Marker key for a node that has children.
pub const DIRECTORY_MARKER: &str = "o";

/// Marker key for a leaf node holding a stored object key.
pub const KEY_MARKER: &str = "k";

/// One entry in the virtual tree: a directory with named children or a
/// file referencing a stored object.
///
/// Invariants: a path maps to exactly one node; names are unique within a
/// directory (the `BTreeMap` enforces both); the tree has a single root
/// directory representing `""`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileNode {
    Directory(BTreeMap<String, FileNode>),
    File(ObjectKey),
}

/// The kind of an entry, as reported by directory listings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryKind::File => write!(f, "file"),
            EntryKind::Directory => write!(f, "directory"),
        }
    }
}

impl FileNode {
    /// A new empty directory node.
    pub fn empty_directory() -> Self {
        FileNode::Directory(BTreeMap::new())
    }

    /// Returns `true` if this node is a directory.
    pub fn is_directory(&self) -> bool {
        matches!(self, FileNode::Directory(_))
    }

    /// Returns `true` if this node is a file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileNode::File(_))
    }

    /// The kind of this node.
    pub fn kind(&self) -> EntryKind {
        match self {
            FileNode::Directory(_) => EntryKind::Directory,
            FileNode::File(_) => EntryKind::File,
        }
    }

    /// Encode this node (and everything below it) as a JSON value.
    pub fn to_value(&self) -> Value {
        match self {
            FileNode::Directory(children) => {
                let map: Map<String, Value> = children
                    .iter()
                    .map(|(name, child)| (name.clone(), child.to_value()))
                    .collect();
                json!({ DIRECTORY_MARKER: Value::Object(map) })
            }
            FileNode::File(key) => json!({ KEY_MARKER: key.as_str() }),
        }
    }

    /// Decode a node from its JSON encoding.
    ///
    /// A node object must carry exactly one of the two markers; anything
    /// else is malformed.
    pub fn from_value(value: &Value) -> RepoResult<Self> {
        let obj = value.as_object().ok_or_else(|| {
            RepoError::Serialization(format!("expected object, got {value}"))
        })?;

        match (obj.get(DIRECTORY_MARKER), obj.get(KEY_MARKER)) {
            (Some(children), None) => {
                let children = children.as_object().ok_or_else(|| {
                    RepoError::Serialization(
                        "directory marker must hold an object".to_string(),
                    )
                })?;
                let mut map = BTreeMap::new();
                for (name, child) in children {
                    if name.is_empty() {
                        return Err(RepoError::Serialization(
                            "empty child name".to_string(),
                        ));
                    }
                    map.insert(name.clone(), FileNode::from_value(child)?);
                }
                Ok(FileNode::Directory(map))
            }
            (None, Some(key)) => {
                let raw = key.as_str().ok_or_else(|| {
                    RepoError::Serialization(
                        "key marker must hold a string".to_string(),
                    )
                })?;
                let key = ObjectKey::new(raw)
                    .map_err(|e| RepoError::Serialization(e.to_string()))?;
                Ok(FileNode::File(key))
            }
            (Some(_), Some(_)) => Err(RepoError::Serialization(
                "node carries both directory and key markers".to_string(),
            )),
            (None, None) => Err(RepoError::Serialization(
                "node carries neither directory nor key marker".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn file(key: &str) -> FileNode {
        FileNode::File(ObjectKey::new(key).unwrap())
    }

    fn dir(entries: Vec<(&str, FileNode)>) -> FileNode {
        FileNode::Directory(
            entries
                .into_iter()
                .map(|(name, node)| (name.to_string(), node))
                .collect(),
        )
    }

    #[test]
    fn serialize_file_node() {
        let node = file("abc123");
        assert_eq!(node.to_value(), serde_json::json!({ "k": "abc123" }));
    }

    #[test]
    fn serialize_nested_directory() {
        let tree = dir(vec![(
            "sub",
            dir(vec![("data.txt", file("deadbeef"))]),
        )]);
        assert_eq!(
            tree.to_value(),
            serde_json::json!({
                "o": { "sub": { "o": { "data.txt": { "k": "deadbeef" } } } }
            })
        );
    }

    #[test]
    fn roundtrip_empty_directory() {
        let tree = FileNode::empty_directory();
        let decoded = FileNode::from_value(&tree.to_value()).unwrap();
        assert_eq!(decoded, tree);
    }

    #[test]
    fn segment_named_like_markers_roundtrips() {
        // "o" and "k" are legal child names; they live one level below the
        // markers and must survive the round trip.
        let tree = dir(vec![
            ("o", dir(vec![("k", file("11"))])),
            ("k", file("22")),
        ]);
        let decoded = FileNode::from_value(&tree.to_value()).unwrap();
        assert_eq!(decoded, tree);
    }

    #[test]
    fn reject_both_markers() {
        let value = serde_json::json!({ "o": {}, "k": "x" });
        assert!(matches!(
            FileNode::from_value(&value),
            Err(RepoError::Serialization(_))
        ));
    }

    #[test]
    fn reject_neither_marker() {
        let value = serde_json::json!({ "other": 1 });
        assert!(matches!(
            FileNode::from_value(&value),
            Err(RepoError::Serialization(_))
        ));
    }

    #[test]
    fn reject_non_object_node() {
        let value = serde_json::json!("just a string");
        assert!(FileNode::from_value(&value).is_err());
    }

    #[test]
    fn reject_empty_key() {
        let value = serde_json::json!({ "k": "" });
        assert!(FileNode::from_value(&value).is_err());
    }

    #[test]
    fn reject_empty_child_name() {
        let value = serde_json::json!({ "o": { "": { "k": "x" } } });
        assert!(FileNode::from_value(&value).is_err());
    }

    // -----------------------------------------------------------------------
    // Round-trip property
    // -----------------------------------------------------------------------

    fn arb_node() -> impl Strategy<Value = FileNode> {
        let leaf = "[a-f0-9]{4,64}"
            .prop_map(|s| FileNode::File(ObjectKey::new(s).unwrap()));
        leaf.prop_recursive(4, 32, 4, |inner| {
            prop::collection::btree_map(
                prop_oneof![
                    3 => "[a-z_.][a-z0-9_.-]{0,11}",
                    1 => Just("o".to_string()),
                    1 => Just("k".to_string()),
                ],
                inner,
                0..4,
            )
            .prop_map(FileNode::Directory)
        })
    }

    proptest! {
        #[test]
        fn roundtrip_holds_for_all_well_formed_trees(children in
            prop::collection::btree_map("[a-z]{1,8}", arb_node(), 0..5))
        {
            let tree = FileNode::Directory(children);
            let decoded = FileNode::from_value(&tree.to_value()).unwrap();
            prop_assert_eq!(decoded, tree);
        }
    }
}
