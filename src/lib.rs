//! Transaction management for a node-tree project store.
//!
//! [`TransactionManager`] coordinates concurrent units of work over a shared
//! tree of nodes: multi-granularity locks with bounded waits, a wait-for
//! graph scanned for deadlocks, an undo log with savepoints, isolation-aware
//! reads and an atomic commit that hands the whole log to a persistence
//! backend. The tree and the persistence backend are collaborators behind
//! the [`NodeStore`] and [`Persistence`] traits.

pub mod core;
pub mod features;

pub use crate::core::error::{Error, ErrorCategory, ErrorContext, ErrorSeverity, Result};
pub use crate::core::node_store::{MemoryNodeStore, NodeStore, NodeValue};
pub use crate::core::persistence::{CommittedBatch, FileJournal, MemoryPersistence, Persistence};
pub use crate::features::logging::{init_logging, LogFormat, LogLevel, LoggingConfig};
pub use crate::features::transactions::{
    AbortCause, DeadlockReport, DeadlockResolutionStrategy, HookId, IsolationLevel, LockHolder,
    LockType, MaintenanceReport, Mutation, Operation, OperationType, ResourceId,
    TransactionConfig, TransactionContext, TransactionManager, TransactionManagerConfig,
    TransactionManagerConfigBuilder, TransactionState, TransactionStatistics, TransactionStatus,
    TxId, TxOps,
};
