use super::isolation::{LockType, ResourceId, TxId};
use super::manager::TransactionManager;
use super::operation_log::{Operation, OperationId, OperationType};
use crate::core::error::{Error, Result};
use crate::core::node_store::{NodeStore, NodeValue};
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};
use std::time::Duration;

/// A tree change applied on behalf of a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    Create { resource: ResourceId, value: NodeValue },
    Update { resource: ResourceId, value: NodeValue },
    Delete { resource: ResourceId },
    Move { resource: ResourceId, to_path: String },
    Copy { source: ResourceId, destination: ResourceId },
}

impl Mutation {
    pub fn kind(&self) -> OperationType {
        match self {
            Mutation::Create { .. } => OperationType::Create,
            Mutation::Update { .. } => OperationType::Update,
            Mutation::Delete { .. } => OperationType::Delete,
            Mutation::Move { .. } => OperationType::Move,
            Mutation::Copy { .. } => OperationType::Copy,
        }
    }

    /// The resource whose state the resulting log entry describes.
    pub fn target(&self) -> &str {
        match self {
            Mutation::Create { resource, .. }
            | Mutation::Update { resource, .. }
            | Mutation::Delete { resource }
            | Mutation::Move { resource, .. } => resource,
            Mutation::Copy { destination, .. } => destination,
        }
    }

    /// Locks to hold before applying, in acquisition order.
    pub(crate) fn lock_requests(&self) -> SmallVec<[(&str, LockType); 2]> {
        match self {
            Mutation::Copy {
                source,
                destination,
            } => smallvec![
                (source.as_str(), LockType::Shared),
                (destination.as_str(), LockType::Exclusive),
            ],
            other => smallvec![(other.target(), LockType::Exclusive)],
        }
    }

    /// Apply to the tree and describe the change for the undo log. Nothing
    /// is applied when an error is returned.
    pub(crate) fn apply(&self, store: &dyn NodeStore, id: OperationId) -> Result<Operation> {
        match self {
            Mutation::Create { resource, value } => {
                store.create(resource, value.clone())?;
                Ok(Operation::new(
                    id,
                    OperationType::Create,
                    resource.as_str(),
                    current_path(store, resource),
                    None,
                    Some(value.clone()),
                ))
            }
            Mutation::Update { resource, value } => {
                let old = require_value(store, resource)?;
                let path = current_path(store, resource);
                store.set_value(resource, value.clone())?;
                Ok(Operation::new(
                    id,
                    OperationType::Update,
                    resource.as_str(),
                    path,
                    Some(old),
                    Some(value.clone()),
                ))
            }
            Mutation::Delete { resource } => {
                let old = require_value(store, resource)?;
                let path = current_path(store, resource);
                store.delete(resource)?;
                Ok(Operation::new(
                    id,
                    OperationType::Delete,
                    resource.as_str(),
                    path,
                    Some(old),
                    None,
                ))
            }
            Mutation::Move { resource, to_path } => {
                let from = store
                    .path_of(resource)?
                    .ok_or_else(|| Error::ResourceNotFound {
                        resource: resource.clone(),
                    })?;
                store.move_node(resource, &from, to_path)?;
                Ok(
                    Operation::new(id, OperationType::Move, resource.as_str(), from, None, None)
                        .with_target_path(to_path.as_str()),
                )
            }
            Mutation::Copy {
                source,
                destination,
            } => {
                let value = require_value(store, source)?;
                store.create(destination, value.clone())?;
                Ok(Operation::new(
                    id,
                    OperationType::Copy,
                    destination.as_str(),
                    current_path(store, destination),
                    None,
                    Some(value),
                )
                .with_metadata("source", source.as_str()))
            }
        }
    }
}

fn require_value(store: &dyn NodeStore, resource: &str) -> Result<NodeValue> {
    store
        .read_value(resource)?
        .ok_or_else(|| Error::ResourceNotFound {
            resource: resource.to_string(),
        })
}

fn current_path(store: &dyn NodeStore, resource: &str) -> String {
    store
        .path_of(resource)
        .ok()
        .flatten()
        .unwrap_or_else(|| resource.to_string())
}

/// Handle given to a unit of work. Every call goes through the manager, so
/// locking, logging and state checks apply exactly as for direct calls.
pub struct TxOps<'a> {
    manager: &'a TransactionManager,
    tx_id: TxId,
    label: Option<&'a str>,
}

impl<'a> TxOps<'a> {
    pub(crate) fn new(manager: &'a TransactionManager, tx_id: TxId, label: Option<&'a str>) -> Self {
        Self {
            manager,
            tx_id,
            label,
        }
    }

    pub fn id(&self) -> TxId {
        self.tx_id
    }

    pub fn manager(&self) -> &TransactionManager {
        self.manager
    }

    pub fn read(&self, resource: &str) -> Result<Option<NodeValue>> {
        self.manager.read(self.tx_id, resource)
    }

    pub fn apply(&self, mutation: Mutation) -> Result<Operation> {
        self.manager.apply_mutation(self.tx_id, mutation, self.label)
    }

    pub fn create(&self, resource: &str, value: NodeValue) -> Result<()> {
        self.apply(Mutation::Create {
            resource: resource.to_string(),
            value,
        })
        .map(|_| ())
    }

    /// Returns the value that was replaced.
    pub fn update(&self, resource: &str, value: NodeValue) -> Result<Option<NodeValue>> {
        self.apply(Mutation::Update {
            resource: resource.to_string(),
            value,
        })
        .map(|op| op.old_value)
    }

    /// Returns the value that was removed.
    pub fn delete(&self, resource: &str) -> Result<Option<NodeValue>> {
        self.apply(Mutation::Delete {
            resource: resource.to_string(),
        })
        .map(|op| op.old_value)
    }

    pub fn move_to(&self, resource: &str, to_path: &str) -> Result<()> {
        self.apply(Mutation::Move {
            resource: resource.to_string(),
            to_path: to_path.to_string(),
        })
        .map(|_| ())
    }

    pub fn copy(&self, source: &str, destination: &str) -> Result<()> {
        self.apply(Mutation::Copy {
            source: source.to_string(),
            destination: destination.to_string(),
        })
        .map(|_| ())
    }

    pub fn lock(&self, resource: &str, lock_type: LockType) -> Result<()> {
        self.manager.acquire_lock(self.tx_id, resource, lock_type, None)
    }

    pub fn lock_with_timeout(&self, resource: &str, lock_type: LockType, timeout: Duration) -> Result<()> {
        self.manager
            .acquire_lock(self.tx_id, resource, lock_type, Some(timeout))
    }

    pub fn savepoint(&self, name: &str) -> Result<()> {
        self.manager.create_savepoint(self.tx_id, name)
    }

    pub fn rollback_to(&self, name: &str) -> Result<()> {
        self.manager.rollback_to_savepoint(self.tx_id, name)
    }

    pub fn release_savepoint(&self, name: &str) -> Result<()> {
        self.manager.release_savepoint(self.tx_id, name)
    }
}
