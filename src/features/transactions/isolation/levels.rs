use serde::{Deserialize, Serialize};
use std::fmt;

/// SQL standard transaction isolation levels
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum IsolationLevel {
    /// Reads see whatever is in the tree, including uncommitted writes
    ReadUncommitted,
    /// Reads wait for writers and see only committed values
    #[default]
    ReadCommitted,
    /// Repeat reads of a resource return the value seen the first time
    RepeatableRead,
    /// Repeatable reads plus first-committer-wins validation at commit
    Serializable,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsolationLevel::ReadUncommitted => write!(f, "READ UNCOMMITTED"),
            IsolationLevel::ReadCommitted => write!(f, "READ COMMITTED"),
            IsolationLevel::RepeatableRead => write!(f, "REPEATABLE READ"),
            IsolationLevel::Serializable => write!(f, "SERIALIZABLE"),
        }
    }
}

impl IsolationLevel {
    /// Check if this isolation level prevents dirty reads
    pub fn prevents_dirty_reads(self) -> bool {
        !matches!(self, IsolationLevel::ReadUncommitted)
    }

    /// Check if this isolation level prevents non-repeatable reads
    pub fn prevents_non_repeatable_reads(self) -> bool {
        matches!(
            self,
            IsolationLevel::RepeatableRead | IsolationLevel::Serializable
        )
    }

    /// Whether begin captures a read snapshot
    pub fn uses_read_snapshot(self) -> bool {
        self.prevents_non_repeatable_reads()
    }

    /// Whether commit re-validates the read snapshot
    pub fn validates_on_commit(self) -> bool {
        matches!(self, IsolationLevel::Serializable)
    }

    /// How reads interact with the lock table at this level
    pub fn read_lock_policy(self) -> ReadLockPolicy {
        match self {
            IsolationLevel::ReadUncommitted => ReadLockPolicy::None,
            IsolationLevel::ReadCommitted => ReadLockPolicy::ShortShared,
            IsolationLevel::RepeatableRead | IsolationLevel::Serializable => {
                ReadLockPolicy::Snapshot
            }
        }
    }
}

/// Read lock policy. Writes always take exclusive locks held until the
/// transaction ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadLockPolicy {
    /// Read without touching the lock table
    None,
    /// Take a shared lock for the duration of the read only
    ShortShared,
    /// First read goes through a short shared lock, repeats come from the
    /// transaction's snapshot
    Snapshot,
}
