#![allow(dead_code)]

use nodestore_txn::{
    Error, MemoryNodeStore, MemoryPersistence, NodeStore, NodeValue, Result, TransactionManager,
    TransactionManagerConfig, TxId,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct TestManager {
    pub manager: Arc<TransactionManager>,
    pub store: Arc<MemoryNodeStore>,
    pub persistence: Arc<MemoryPersistence>,
}

impl TestManager {
    /// No background worker; tests drive maintenance themselves.
    pub fn new() -> Self {
        Self::with_config(
            TransactionManagerConfig::builder()
                .background_worker(false)
                .default_lock_timeout(Duration::from_millis(200))
                .build()
                .expect("valid config"),
        )
    }

    /// Background worker on, fast detection.
    pub fn with_worker() -> Self {
        Self::with_config(
            TransactionManagerConfig::builder()
                .deadlock_detection_interval(Duration::from_millis(20))
                .maintenance_tick(Duration::from_millis(5))
                .default_lock_timeout(Duration::from_secs(5))
                .build()
                .expect("valid config"),
        )
    }

    pub fn with_config(config: TransactionManagerConfig) -> Self {
        let store = Arc::new(MemoryNodeStore::new());
        let persistence = Arc::new(MemoryPersistence::new());
        let manager = TransactionManager::new(config, store.clone(), persistence.clone())
            .expect("manager starts");
        Self {
            manager,
            store,
            persistence,
        }
    }

    pub fn seed(&self, entries: &[(&str, NodeValue)]) {
        for (id, value) in entries {
            self.store.create(id, value.clone()).expect("seed node");
        }
    }

    pub fn assert_no_locks_owned_by(&self, tx_id: TxId) {
        let owners: Vec<TxId> = self
            .manager
            .lock_info()
            .values()
            .flat_map(|holders| holders.iter().map(|h| h.owner))
            .collect();
        assert!(
            !owners.contains(&tx_id),
            "tx {} still owns locks: {:?}",
            tx_id,
            self.manager.lock_info()
        );
    }
}

/// Node store wrapper that fails chosen calls, for undo and commit failure paths.
pub struct FaultyStore {
    inner: MemoryNodeStore,
    fail_deletes: AtomicBool,
    fail_set_value_for: Mutex<HashSet<String>>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryNodeStore::new(),
            fail_deletes: AtomicBool::new(false),
            fail_set_value_for: Mutex::new(HashSet::new()),
        }
    }

    pub fn inner(&self) -> &MemoryNodeStore {
        &self.inner
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_set_value(&self, resource: &str) {
        self.fail_set_value_for.lock().insert(resource.to_string());
    }
}

impl NodeStore for FaultyStore {
    fn create(&self, resource_id: &str, value: NodeValue) -> Result<()> {
        self.inner.create(resource_id, value)
    }

    fn delete(&self, resource_id: &str) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Error::Storage(format!("injected delete failure: {}", resource_id)));
        }
        self.inner.delete(resource_id)
    }

    fn set_value(&self, resource_id: &str, value: NodeValue) -> Result<()> {
        if self.fail_set_value_for.lock().contains(resource_id) {
            return Err(Error::Storage(format!("injected write failure: {}", resource_id)));
        }
        self.inner.set_value(resource_id, value)
    }

    fn read_value(&self, resource_id: &str) -> Result<Option<NodeValue>> {
        self.inner.read_value(resource_id)
    }

    fn move_node(&self, resource_id: &str, from_path: &str, to_path: &str) -> Result<()> {
        self.inner.move_node(resource_id, from_path, to_path)
    }

    fn path_of(&self, resource_id: &str) -> Result<Option<String>> {
        self.inner.path_of(resource_id)
    }
}
