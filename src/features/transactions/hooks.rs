use super::transaction::{AbortCause, TransactionStatus};
use crate::core::error::Result;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

pub type HookId = u64;

pub type CommitHook = Arc<dyn Fn(&TransactionStatus) -> Result<()> + Send + Sync>;
pub type RollbackHook = Arc<dyn Fn(&TransactionStatus) -> Result<()> + Send + Sync>;
pub type AbortHook = Arc<dyn Fn(&TransactionStatus, &AbortCause) -> Result<()> + Send + Sync>;

/// Lifecycle observers. Each list runs in registration order; a hook that
/// errors or panics is logged and skipped without affecting the others or the
/// transaction outcome.
#[derive(Default)]
pub struct LifecycleHooks {
    next_id: AtomicU64,
    commit: RwLock<Vec<(HookId, CommitHook)>>,
    rollback: RwLock<Vec<(HookId, RollbackHook)>>,
    abort: RwLock<Vec<(HookId, AbortHook)>>,
}

impl LifecycleHooks {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> HookId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn register_commit(&self, hook: CommitHook) -> HookId {
        let id = self.allocate_id();
        self.commit.write().push((id, hook));
        id
    }

    pub fn register_rollback(&self, hook: RollbackHook) -> HookId {
        let id = self.allocate_id();
        self.rollback.write().push((id, hook));
        id
    }

    pub fn register_abort(&self, hook: AbortHook) -> HookId {
        let id = self.allocate_id();
        self.abort.write().push((id, hook));
        id
    }

    /// Unregister a hook of any kind. Returns `false` if the id is unknown.
    pub fn remove(&self, id: HookId) -> bool {
        let mut removed = false;
        self.commit.write().retain(|(hook_id, _)| {
            let keep = *hook_id != id;
            removed |= !keep;
            keep
        });
        self.rollback.write().retain(|(hook_id, _)| {
            let keep = *hook_id != id;
            removed |= !keep;
            keep
        });
        self.abort.write().retain(|(hook_id, _)| {
            let keep = *hook_id != id;
            removed |= !keep;
            keep
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.commit.read().len() + self.rollback.read().len() + self.abort.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of hooks that failed.
    pub fn fire_commit(&self, status: &TransactionStatus) -> usize {
        // Clone the list so hooks may register or remove hooks themselves.
        let hooks = self.commit.read().clone();
        hooks
            .iter()
            .filter(|(id, hook)| !run_isolated("commit", *id, status, || hook(status)))
            .count()
    }

    pub fn fire_rollback(&self, status: &TransactionStatus) -> usize {
        let hooks = self.rollback.read().clone();
        hooks
            .iter()
            .filter(|(id, hook)| !run_isolated("rollback", *id, status, || hook(status)))
            .count()
    }

    pub fn fire_abort(&self, status: &TransactionStatus, cause: &AbortCause) -> usize {
        let hooks = self.abort.read().clone();
        hooks
            .iter()
            .filter(|(id, hook)| !run_isolated("abort", *id, status, || hook(status, cause)))
            .count()
    }
}

impl std::fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleHooks")
            .field("commit", &self.commit.read().len())
            .field("rollback", &self.rollback.read().len())
            .field("abort", &self.abort.read().len())
            .finish()
    }
}

fn run_isolated<F>(kind: &str, hook_id: HookId, status: &TransactionStatus, hook: F) -> bool
where
    F: FnOnce() -> Result<()>,
{
    match catch_unwind(AssertUnwindSafe(hook)) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!("{} hook {} failed for tx={}: {}", kind, hook_id, status.id, e);
            false
        }
        Err(_) => {
            warn!("{} hook {} panicked for tx={}", kind, hook_id, status.id);
            false
        }
    }
}
