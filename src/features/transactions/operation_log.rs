//! Per-transaction undo log and savepoints.
//!
//! Entries are appended in call order and undone in reverse. A savepoint is
//! nothing more than the log length at the time it was taken.

use crate::core::error::{Error, Result};
use crate::core::node_store::{NodeStore, NodeValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;
use tracing::{debug, warn};

pub type OperationId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    Create,
    Update,
    Delete,
    Move,
    Copy,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationType::Create => write!(f, "CREATE"),
            OperationType::Update => write!(f, "UPDATE"),
            OperationType::Delete => write!(f, "DELETE"),
            OperationType::Move => write!(f, "MOVE"),
            OperationType::Copy => write!(f, "COPY"),
        }
    }
}

/// One applied mutation with enough state to invert it.
///
/// For `Move`, `path` is the source path and `target_path` the destination.
/// For `Copy`, `resource_id` is the new node, `target_path` is unused and the
/// source id is kept in `metadata["source"]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub kind: OperationType,
    pub resource_id: String,
    pub path: String,
    pub target_path: Option<String>,
    pub timestamp: SystemTime,
    pub old_value: Option<NodeValue>,
    pub new_value: Option<NodeValue>,
    pub metadata: HashMap<String, String>,
}

impl Operation {
    pub fn new(
        id: OperationId,
        kind: OperationType,
        resource_id: impl Into<String>,
        path: impl Into<String>,
        old_value: Option<NodeValue>,
        new_value: Option<NodeValue>,
    ) -> Self {
        Self {
            id,
            kind,
            resource_id: resource_id.into(),
            path: path.into(),
            target_path: None,
            timestamp: SystemTime::now(),
            old_value,
            new_value,
            metadata: HashMap::new(),
        }
    }

    pub fn with_target_path(mut self, target: impl Into<String>) -> Self {
        self.target_path = Some(target.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn label(&self) -> Option<&str> {
        self.metadata.get("label").map(String::as_str)
    }

    /// Apply the inverse of this operation to the tree.
    pub fn undo(&self, store: &dyn NodeStore) -> Result<()> {
        match self.kind {
            OperationType::Create | OperationType::Copy => store.delete(&self.resource_id),
            OperationType::Update => {
                let old = self.old_value.clone().ok_or_else(|| {
                    Error::Storage(format!("update {} has no old value", self.id))
                })?;
                store.set_value(&self.resource_id, old)
            }
            OperationType::Delete => {
                let old = self.old_value.clone().ok_or_else(|| {
                    Error::Storage(format!("delete {} has no old value", self.id))
                })?;
                store.create(&self.resource_id, old)?;
                // Recreated nodes start at their id; put them back where they were.
                match store.path_of(&self.resource_id)? {
                    Some(current) if current != self.path => {
                        store.move_node(&self.resource_id, &current, &self.path)
                    }
                    _ => Ok(()),
                }
            }
            OperationType::Move => {
                let target = self.target_path.as_deref().ok_or_else(|| {
                    Error::Storage(format!("move {} has no destination", self.id))
                })?;
                store.move_node(&self.resource_id, target, &self.path)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Savepoint {
    pub name: String,
    pub log_len: usize,
}

/// Outcome of undoing a slice of the log.
#[derive(Debug, Default)]
pub struct UndoReport {
    pub undone: usize,
    pub failed: Vec<(OperationId, Error)>,
}

impl UndoReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct OperationLog {
    entries: Vec<Operation>,
    savepoints: Vec<Savepoint>,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, op: Operation) {
        debug!(
            "Logged op={} {} {} (log len {})",
            op.id,
            op.kind,
            op.resource_id,
            self.entries.len() + 1
        );
        self.entries.push(op);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Operation] {
        &self.entries
    }

    /// Record a savepoint at the current length. Reusing a name moves it.
    pub fn create_savepoint(&mut self, name: &str) {
        self.savepoints.retain(|sp| sp.name != name);
        self.savepoints.push(Savepoint {
            name: name.to_string(),
            log_len: self.entries.len(),
        });
    }

    pub fn savepoint(&self, name: &str) -> Option<&Savepoint> {
        self.savepoints.iter().find(|sp| sp.name == name)
    }

    pub fn savepoint_names(&self) -> Vec<String> {
        self.savepoints.iter().map(|sp| sp.name.clone()).collect()
    }

    pub fn release_savepoint(&mut self, name: &str) -> bool {
        let before = self.savepoints.len();
        self.savepoints.retain(|sp| sp.name != name);
        before != self.savepoints.len()
    }

    /// Detach everything appended after `name`. Savepoints created after it
    /// are dropped; `name` itself stays. Returns `None` for an unknown name.
    pub fn split_off_savepoint(&mut self, name: &str) -> Option<Vec<Operation>> {
        let position = self.savepoints.iter().position(|sp| sp.name == name)?;
        let log_len = self.savepoints[position].log_len;
        self.savepoints.truncate(position + 1);
        Some(self.entries.split_off(log_len.min(self.entries.len())))
    }

    /// First logged operation touching `resource_id`, if any.
    pub fn first_touching(&self, resource_id: &str) -> Option<&Operation> {
        self.entries.iter().find(|op| op.resource_id == resource_id)
    }

    pub fn touches(&self, resource_id: &str) -> bool {
        self.first_touching(resource_id).is_some()
    }
}

/// Undo `ops` in reverse order. Individual failures are logged and collected;
/// the walk always reaches the first entry.
pub fn undo_operations(ops: &[Operation], store: &dyn NodeStore) -> UndoReport {
    let mut report = UndoReport::default();
    for op in ops.iter().rev() {
        match op.undo(store) {
            Ok(()) => report.undone += 1,
            Err(e) => {
                warn!(
                    "Undo failed for op={} {} {}: {}",
                    op.id, op.kind, op.resource_id, e
                );
                report.failed.push((op.id, e));
            }
        }
    }
    report
}
