use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tracing::debug;

/// Transaction identifier
pub type TxId = u64;

/// Stable identifier of a node-tree location subject to locking
pub type ResourceId = String;

/// Lock modes following standard multi-granularity locking
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LockType {
    /// Shared lock - allows concurrent readers
    Shared,
    /// Exclusive lock - exclusive access
    Exclusive,
    /// Intent Shared lock (for hierarchical locking)
    IntentShared,
    /// Intent Exclusive lock (for hierarchical locking)
    IntentExclusive,
}

impl LockType {
    /// Check if a lock of type `self` may be granted while `held` is held by
    /// another transaction. The relation is symmetric.
    pub fn is_compatible_with(self, held: LockType) -> bool {
        use LockType::*;
        match (self, held) {
            // X is compatible with nothing
            (Exclusive, _) | (_, Exclusive) => false,

            // S is compatible with S and IS
            (Shared, Shared) | (Shared, IntentShared) | (IntentShared, Shared) => true,
            (Shared, IntentExclusive) | (IntentExclusive, Shared) => false,

            // Intent locks are compatible with each other
            (IntentShared, IntentShared)
            | (IntentShared, IntentExclusive)
            | (IntentExclusive, IntentShared)
            | (IntentExclusive, IntentExclusive) => true,
        }
    }
}

/// A lock held by a transaction
#[derive(Debug, Clone)]
pub struct LockRecord {
    pub owner: TxId,
    pub lock_type: LockType,
    pub acquired_at: Instant,
    pub timeout: Duration,
}

/// Holder summary used by introspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockHolder {
    pub owner: TxId,
    pub lock_type: LockType,
}

/// Per-resource list of granted locks. The table only records grants; waiting
/// requests live in the wait-for graph.
#[derive(Debug, Default)]
pub struct LockTable {
    locks: HashMap<ResourceId, SmallVec<[LockRecord; 2]>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Owners of locks on `resource` that conflict with a `lock_type` request
    /// from `tx_id`. Locks held by `tx_id` itself never conflict.
    pub fn conflicting_owners(&self, resource: &str, tx_id: TxId, lock_type: LockType) -> Vec<TxId> {
        let mut owners: Vec<TxId> = match self.locks.get(resource) {
            Some(held) => held
                .iter()
                .filter(|rec| rec.owner != tx_id && !lock_type.is_compatible_with(rec.lock_type))
                .map(|rec| rec.owner)
                .collect(),
            None => return Vec::new(),
        };
        owners.sort_unstable();
        owners.dedup();
        owners
    }

    /// Record a grant. Re-granting a type the owner already holds is a no-op.
    /// Returns `true` if a new record was added.
    pub fn grant(&mut self, resource: &str, owner: TxId, lock_type: LockType, timeout: Duration) -> bool {
        let held = self.locks.entry(resource.to_string()).or_default();
        if held.iter().any(|rec| rec.owner == owner && rec.lock_type == lock_type) {
            return false;
        }
        held.push(LockRecord {
            owner,
            lock_type,
            acquired_at: Instant::now(),
            timeout,
        });
        debug!("Lock granted: tx={}, resource={}, mode={:?}", owner, resource, lock_type);
        true
    }

    /// Drop every lock `owner` holds on `resource`. Returns how many were removed.
    pub fn release(&mut self, resource: &str, owner: TxId) -> usize {
        let Some(held) = self.locks.get_mut(resource) else {
            return 0;
        };
        let before = held.len();
        held.retain(|rec| rec.owner != owner);
        let released = before - held.len();
        if held.is_empty() {
            self.locks.remove(resource);
        }
        if released > 0 {
            debug!("Released {} lock(s): tx={}, resource={}", released, owner, resource);
        }
        released
    }

    pub fn holds(&self, resource: &str, owner: TxId, lock_type: LockType) -> bool {
        self.locks
            .get(resource)
            .is_some_and(|held| held.iter().any(|rec| rec.owner == owner && rec.lock_type == lock_type))
    }

    pub fn holds_any(&self, resource: &str, owner: TxId) -> bool {
        self.locks
            .get(resource)
            .is_some_and(|held| held.iter().any(|rec| rec.owner == owner))
    }

    /// Number of lock records owned by `owner` across all resources.
    pub fn count_owned_by(&self, owner: TxId) -> usize {
        self.locks
            .values()
            .map(|held| held.iter().filter(|rec| rec.owner == owner).count())
            .sum()
    }

    pub fn total_locks(&self) -> usize {
        self.locks.values().map(|held| held.len()).sum()
    }

    /// Resource → holders, ordered by resource for stable output.
    pub fn lock_info(&self) -> BTreeMap<ResourceId, Vec<LockHolder>> {
        self.locks
            .iter()
            .map(|(resource, held)| {
                let holders = held
                    .iter()
                    .map(|rec| LockHolder {
                        owner: rec.owner,
                        lock_type: rec.lock_type,
                    })
                    .collect();
                (resource.clone(), holders)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [LockType; 4] = [
        LockType::Shared,
        LockType::Exclusive,
        LockType::IntentShared,
        LockType::IntentExclusive,
    ];

    #[test]
    fn test_lock_compatibility_matrix() {
        use LockType::*;
        // rows: holder, columns: requester (S, X, IS, IX)
        let expected = [
            (Shared, [true, false, true, false]),
            (Exclusive, [false, false, false, false]),
            (IntentShared, [true, false, true, true]),
            (IntentExclusive, [false, false, true, true]),
        ];
        for (holder, row) in expected {
            for (requester, ok) in ALL.iter().zip(row) {
                assert_eq!(
                    requester.is_compatible_with(holder),
                    ok,
                    "holder={:?} requester={:?}",
                    holder,
                    requester
                );
            }
        }
    }

    #[test]
    fn test_compatibility_is_symmetric() {
        for a in ALL {
            for b in ALL {
                assert_eq!(a.is_compatible_with(b), b.is_compatible_with(a));
            }
        }
    }

    #[test]
    fn test_no_self_conflict() {
        let mut table = LockTable::new();
        let timeout = Duration::from_secs(1);
        assert!(table.grant("c", 1, LockType::Exclusive, timeout));
        assert!(table.conflicting_owners("c", 1, LockType::Shared).is_empty());
        assert_eq!(table.conflicting_owners("c", 2, LockType::Shared), vec![1]);

        assert!(table.grant("c", 1, LockType::Shared, timeout));
        assert!(!table.grant("c", 1, LockType::Shared, timeout));
        assert_eq!(table.count_owned_by(1), 2);
    }

    #[test]
    fn test_release() {
        let mut table = LockTable::new();
        let timeout = Duration::from_secs(1);
        table.grant("r", 1, LockType::Shared, timeout);
        table.grant("r", 2, LockType::Shared, timeout);
        table.grant("r", 1, LockType::IntentShared, timeout);

        assert_eq!(table.release("r", 1), 2);
        assert_eq!(table.release("r", 1), 0);
        assert!(table.holds("r", 2, LockType::Shared));
        assert!(!table.holds_any("r", 1));
        assert_eq!(table.total_locks(), 1);

        table.release("r", 2);
        assert!(table.lock_info().is_empty());
    }
}
