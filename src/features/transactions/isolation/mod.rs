//! Transaction isolation building blocks
//!
//! - **Isolation Levels**: READ UNCOMMITTED through SERIALIZABLE and the read
//!   policy each one implies
//! - **Lock Table**: shared / exclusive / intent locks with a fixed
//!   compatibility matrix
//! - **Wait-For Graph / Deadlock Detector**: cycle detection over pending lock
//!   waits and victim selection
//! - **Read Snapshot**: values observed by repeatable-read transactions, used
//!   for first-committer-wins validation
//!
//! None of these types synchronize on their own; the transaction manager
//! keeps them behind a single critical section.

pub mod deadlock;
pub mod levels;
pub mod locks;
pub mod snapshot;

pub use deadlock::{
    DeadlockDetector, DeadlockReport, DeadlockResolutionStrategy, DeadlockStats, VictimCandidate,
    WaitForGraph,
};
pub use levels::{IsolationLevel, ReadLockPolicy};
pub use locks::{LockHolder, LockRecord, LockTable, LockType, ResourceId, TxId};
pub use snapshot::ReadSnapshot;
