//! Transactions over the node tree: begin, unit-of-work execution with undo
//! logging, savepoints, commit and rollback, with locking and deadlock
//! resolution underneath.

pub mod config;
pub mod context;
pub mod hooks;
pub mod isolation;
pub mod manager;
pub mod operation_log;
pub mod ops;
pub mod transaction;

pub use config::{TransactionConfig, TransactionManagerConfig, TransactionManagerConfigBuilder};
pub use context::TransactionContext;
pub use hooks::{HookId, LifecycleHooks};
pub use isolation::{
    DeadlockReport, DeadlockResolutionStrategy, DeadlockStats, IsolationLevel, LockHolder, LockType,
    ResourceId, TxId,
};
pub use manager::{MaintenanceReport, TransactionManager, TransactionStatistics};
pub use operation_log::{Operation, OperationId, OperationLog, OperationType, Savepoint, UndoReport};
pub use ops::{Mutation, TxOps};
pub use transaction::{AbortCause, TransactionState, TransactionStatus};
