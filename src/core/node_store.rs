//! Node-tree collaborator.
//!
//! The transaction core never owns tree data. Every mutation and every undo
//! step goes through a [`NodeStore`], so the same manager can sit in front of
//! the in-memory tree used by tests or the SQLite-backed tree of the project
//! store.

use crate::core::error::{Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Value stored at a node. Snippets, views and metadata are all JSON documents.
pub type NodeValue = serde_json::Value;

/// Primitive operations the transaction manager needs from the node tree.
pub trait NodeStore: Send + Sync {
    /// Create a node. Fails with [`Error::ResourceExists`] if the id is taken.
    fn create(&self, resource_id: &str, value: NodeValue) -> Result<()>;

    fn delete(&self, resource_id: &str) -> Result<()>;

    fn set_value(&self, resource_id: &str, value: NodeValue) -> Result<()>;

    /// `Ok(None)` when the node does not exist.
    fn read_value(&self, resource_id: &str) -> Result<Option<NodeValue>>;

    /// Move a node from `from_path` to `to_path`. The node must currently be
    /// at `from_path`.
    fn move_node(&self, resource_id: &str, from_path: &str, to_path: &str) -> Result<()>;

    /// Current path of a node, `Ok(None)` when it does not exist.
    fn path_of(&self, resource_id: &str) -> Result<Option<String>>;
}

#[derive(Debug, Clone, PartialEq)]
struct Node {
    path: String,
    value: NodeValue,
}

/// In-memory tree keyed by resource id. New nodes live at a path equal to
/// their id until moved.
#[derive(Debug, Default)]
pub struct MemoryNodeStore {
    nodes: DashMap<String, Node>,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Point-in-time copy of every node as `(id, path, value)`, sorted by id.
    pub fn dump(&self) -> Vec<(String, String, NodeValue)> {
        let mut out: Vec<_> = self
            .nodes
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    entry.value().path.clone(),
                    entry.value().value.clone(),
                )
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

impl NodeStore for MemoryNodeStore {
    fn create(&self, resource_id: &str, value: NodeValue) -> Result<()> {
        match self.nodes.entry(resource_id.to_string()) {
            Entry::Occupied(_) => Err(Error::ResourceExists {
                resource: resource_id.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(Node {
                    path: resource_id.to_string(),
                    value,
                });
                Ok(())
            }
        }
    }

    fn delete(&self, resource_id: &str) -> Result<()> {
        self.nodes
            .remove(resource_id)
            .map(|_| ())
            .ok_or_else(|| Error::ResourceNotFound {
                resource: resource_id.to_string(),
            })
    }

    fn set_value(&self, resource_id: &str, value: NodeValue) -> Result<()> {
        let mut node = self
            .nodes
            .get_mut(resource_id)
            .ok_or_else(|| Error::ResourceNotFound {
                resource: resource_id.to_string(),
            })?;
        node.value = value;
        Ok(())
    }

    fn read_value(&self, resource_id: &str) -> Result<Option<NodeValue>> {
        Ok(self.nodes.get(resource_id).map(|node| node.value.clone()))
    }

    fn move_node(&self, resource_id: &str, from_path: &str, to_path: &str) -> Result<()> {
        let mut node = self
            .nodes
            .get_mut(resource_id)
            .ok_or_else(|| Error::ResourceNotFound {
                resource: resource_id.to_string(),
            })?;
        if node.path != from_path {
            return Err(Error::PathMismatch {
                resource: resource_id.to_string(),
                expected: from_path.to_string(),
                actual: node.path.clone(),
            });
        }
        node.path = to_path.to_string();
        Ok(())
    }

    fn path_of(&self, resource_id: &str) -> Result<Option<String>> {
        Ok(self.nodes.get(resource_id).map(|node| node.path.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_read_delete() {
        let store = MemoryNodeStore::new();
        store.create("a", json!("x")).unwrap();
        assert_eq!(store.read_value("a").unwrap(), Some(json!("x")));
        assert!(matches!(
            store.create("a", json!("y")),
            Err(Error::ResourceExists { .. })
        ));

        store.delete("a").unwrap();
        assert_eq!(store.read_value("a").unwrap(), None);
        assert!(matches!(
            store.delete("a"),
            Err(Error::ResourceNotFound { .. })
        ));
    }

    #[test]
    fn test_move_checks_source_path() {
        let store = MemoryNodeStore::new();
        store.create("snippet", json!({"lang": "rs"})).unwrap();
        assert_eq!(store.path_of("snippet").unwrap().as_deref(), Some("snippet"));

        store.move_node("snippet", "snippet", "views/snippet").unwrap();
        assert_eq!(
            store.path_of("snippet").unwrap().as_deref(),
            Some("views/snippet")
        );

        let err = store.move_node("snippet", "snippet", "other").unwrap_err();
        assert!(matches!(err, Error::PathMismatch { .. }));
    }
}
