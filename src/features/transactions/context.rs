use super::config::TransactionConfig;
use super::isolation::TxId;
use super::manager::TransactionManager;
use super::ops::TxOps;
use crate::core::error::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Implicit begin / commit-or-rollback around a closure.
///
/// Every `execute` opens its own top-level transaction, including those run
/// from a child context. A child's transaction only records the parent's
/// current transaction id; use [`TransactionManager::with_savepoint`] when a
/// nested scope has to roll back on its own.
pub struct TransactionContext {
    manager: Arc<TransactionManager>,
    config: TransactionConfig,
    current: Mutex<Option<TxId>>,
    parent: Option<Arc<TransactionContext>>,
}

impl TransactionContext {
    pub fn new(manager: Arc<TransactionManager>) -> Self {
        Self::with_config(manager, TransactionConfig::default())
    }

    pub fn with_config(manager: Arc<TransactionManager>, config: TransactionConfig) -> Self {
        Self {
            manager,
            config,
            current: Mutex::new(None),
            parent: None,
        }
    }

    /// A context whose transactions are linked to this context's current one.
    pub fn child(self: &Arc<Self>) -> TransactionContext {
        TransactionContext {
            manager: Arc::clone(&self.manager),
            config: TransactionConfig {
                parent: None,
                ..self.config.clone()
            },
            current: Mutex::new(None),
            parent: Some(Arc::clone(self)),
        }
    }

    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    pub fn parent(&self) -> Option<&Arc<TransactionContext>> {
        self.parent.as_ref()
    }

    /// Transaction currently running under this context, if any.
    pub fn current_transaction(&self) -> Option<TxId> {
        *self.current.lock()
    }

    /// Begin, run `f`, commit. A failure in `f` or in commit leaves the
    /// transaction rolled back and is returned.
    pub fn execute<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&TxOps<'_>) -> Result<T>,
    {
        let mut config = self.config.clone();
        if config.parent.is_none() {
            config.parent = self.parent.as_ref().and_then(|p| p.current_transaction());
        }

        let tx_id = self.manager.begin_transaction(config)?;
        let previous = self.current.lock().replace(tx_id);
        debug!("Context running tx={} (previous {:?})", tx_id, previous);

        let result = self
            .manager
            .execute_in_transaction(tx_id, f)
            .and_then(|value| self.manager.commit_transaction(tx_id).map(|()| value));

        *self.current.lock() = previous;
        result
    }
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("current", &self.current_transaction())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}
