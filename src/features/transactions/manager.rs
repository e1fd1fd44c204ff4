//! Transaction manager.
//!
//! Registry, lock table and wait-for graph share one critical section. The
//! only blocking call is lock acquisition, which parks on a condition
//! variable between conflict checks. A background thread enforces
//! transaction timeouts and runs periodic deadlock scans.

use super::config::{TransactionConfig, TransactionManagerConfig};
use super::hooks::{HookId, LifecycleHooks};
use super::isolation::{
    DeadlockDetector, DeadlockReport, DeadlockStats, LockHolder, LockTable, LockType, ReadLockPolicy,
    ReadSnapshot, ResourceId, TxId, VictimCandidate, WaitForGraph,
};
use super::operation_log::{undo_operations, Operation, OperationType};
use super::ops::{Mutation, TxOps};
use super::transaction::{AbortCause, Transaction, TransactionState, TransactionStatus};
use crate::core::error::{Error, Result};
use crate::core::node_store::{NodeStore, NodeValue};
use crate::core::persistence::Persistence;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, info, warn};

/// Aggregate counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransactionStatistics {
    pub active_transactions: usize,
    pub started: u64,
    pub committed: u64,
    pub rolled_back: u64,
    pub aborted: u64,
    pub auto_rollbacks: u64,
    pub timed_out: u64,
    pub average_duration: Duration,
    pub outstanding_locks: usize,
    pub waiting_transactions: usize,
    pub lock_waits: u64,
    pub lock_timeouts: u64,
    pub deadlocks: DeadlockStats,
}

/// What one maintenance pass did
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub expired: Vec<TxId>,
    pub deadlocks: Vec<DeadlockReport>,
}

#[derive(Debug, Default)]
struct Counters {
    started: u64,
    committed: u64,
    rolled_back: u64,
    aborted: u64,
    auto_rollbacks: u64,
    timed_out: u64,
    lock_waits: u64,
    lock_timeouts: u64,
    finished_duration: Duration,
}

struct ManagerState {
    active: HashMap<TxId, Transaction>,
    history: VecDeque<TransactionStatus>,
    history_limit: usize,
    locks: LockTable,
    wait_graph: WaitForGraph,
    detector: DeadlockDetector,
    last_detection: Instant,
    counters: Counters,
}

impl ManagerState {
    fn finished(&self, tx_id: TxId) -> Option<&TransactionStatus> {
        self.history.iter().rev().find(|status| status.id == tx_id)
    }

    fn not_active_error(&self, tx_id: TxId) -> Error {
        match self.finished(tx_id) {
            Some(status) => Error::TransactionInvalidState {
                id: tx_id,
                state: status.state,
                expected: TransactionState::Active,
            },
            None => Error::TransactionNotFound { id: tx_id },
        }
    }

    /// Error for a lock wait whose transaction ended underneath it.
    fn wait_interrupted_error(&self, tx_id: TxId) -> Error {
        match self.finished(tx_id).and_then(|status| status.abort_cause.as_ref()) {
            Some(AbortCause::Deadlock { cycle }) => Error::DeadlockDetected {
                tx_id,
                cycle: cycle.clone(),
            },
            _ => self.not_active_error(tx_id),
        }
    }

    fn active_mut(&mut self, tx_id: TxId) -> Result<&mut Transaction> {
        if !self.active.contains_key(&tx_id) {
            return Err(self.not_active_error(tx_id));
        }
        self.active
            .get_mut(&tx_id)
            .ok_or(Error::TransactionNotFound { id: tx_id })
    }

    /// Drop every lock of `tx_id`, transaction set first so the set never
    /// names a lock the table lacks.
    fn release_all_locks(&mut self, tx_id: TxId) -> usize {
        let resources: Vec<ResourceId> = match self.active.get_mut(&tx_id) {
            Some(tx) => tx.locks.drain().collect(),
            None => Vec::new(),
        };
        let released = resources
            .iter()
            .map(|resource| self.locks.release(resource, tx_id))
            .sum();
        self.wait_graph.remove_transaction(tx_id);
        released
    }

    /// Move a transaction from the registry into history.
    fn retire(
        &mut self,
        tx_id: TxId,
        final_state: TransactionState,
        end_reason: Option<String>,
        abort_cause: Option<AbortCause>,
    ) -> Option<TransactionStatus> {
        let mut tx = self.active.remove(&tx_id)?;
        tx.state = final_state;
        tx.ended_at = Some(SystemTime::now());
        let status = tx.status(end_reason, abort_cause);

        self.wait_graph.remove_transaction(tx_id);
        self.counters.finished_duration += status.duration;
        match final_state {
            TransactionState::Committed => self.counters.committed += 1,
            TransactionState::RolledBack => self.counters.rolled_back += 1,
            TransactionState::Aborted => self.counters.aborted += 1,
            TransactionState::Pending | TransactionState::Active => {}
        }

        self.history.push_back(status.clone());
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
        Some(status)
    }
}

/// Coordinates transactions over a shared node tree.
pub struct TransactionManager {
    config: TransactionManagerConfig,
    store: Arc<dyn NodeStore>,
    persistence: Arc<dyn Persistence>,
    state: Mutex<ManagerState>,
    lock_released: Condvar,
    hooks: LifecycleHooks,
    next_tx_id: AtomicU64,
    next_op_id: AtomicU64,
    shutdown: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TransactionManager {
    pub fn new(
        config: TransactionManagerConfig,
        store: Arc<dyn NodeStore>,
        persistence: Arc<dyn Persistence>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let state = ManagerState {
            active: HashMap::new(),
            history: VecDeque::new(),
            history_limit: config.history_limit,
            locks: LockTable::new(),
            wait_graph: WaitForGraph::new(),
            detector: DeadlockDetector::new(config.deadlock_strategy),
            last_detection: Instant::now(),
            counters: Counters::default(),
        };

        let manager = Arc::new(Self {
            config,
            store,
            persistence,
            state: Mutex::new(state),
            lock_released: Condvar::new(),
            hooks: LifecycleHooks::new(),
            next_tx_id: AtomicU64::new(0),
            next_op_id: AtomicU64::new(0),
            shutdown: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        });

        if manager.config.enable_background_worker {
            Self::spawn_worker(&manager)?;
        }

        info!(
            "Transaction manager started (detection={}, strategy={:?}, worker={})",
            manager.config.enable_deadlock_detection,
            manager.config.deadlock_strategy,
            manager.config.enable_background_worker
        );
        Ok(manager)
    }

    fn spawn_worker(manager: &Arc<Self>) -> Result<()> {
        let weak: Weak<Self> = Arc::downgrade(manager);
        let shutdown = Arc::clone(&manager.shutdown);
        let tick = manager.config.maintenance_tick;

        let handle = thread::Builder::new()
            .name("txn-maintenance".to_string())
            .spawn(move || {
                while !shutdown.load(Ordering::Acquire) {
                    thread::sleep(tick);
                    let Some(manager) = weak.upgrade() else {
                        break;
                    };
                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    manager.run_maintenance();
                }
                debug!("Transaction maintenance worker stopped");
            })?;

        *manager.worker.lock() = Some(handle);
        Ok(())
    }

    pub fn config(&self) -> &TransactionManagerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    /// Start a transaction and return its id.
    pub fn begin_transaction(&self, config: TransactionConfig) -> Result<TxId> {
        let mut state = self.state.lock();

        if state.active.len() >= self.config.max_active_transactions {
            warn!(
                "Refusing to begin: {} active transactions",
                state.active.len()
            );
            return Err(Error::TransactionLimitReached {
                limit: self.config.max_active_transactions,
            });
        }

        if let Some(parent) = config.parent {
            if !state.active.contains_key(&parent) && state.finished(parent).is_none() {
                return Err(Error::TransactionNotFound { id: parent });
            }
        }

        let snapshot = config
            .isolation
            .uses_read_snapshot()
            .then(ReadSnapshot::new);

        let tx_id = self.next_tx_id.fetch_add(1, Ordering::Relaxed) + 1;
        let timeout = config.timeout.unwrap_or(self.config.default_timeout);
        let lock_timeout = config.lock_timeout.unwrap_or(self.config.default_lock_timeout);

        let mut tx = Transaction::new(tx_id, &config, timeout, lock_timeout, snapshot);
        tx.activate();

        if let Some(parent) = config.parent.and_then(|p| state.active.get_mut(&p)) {
            parent.children.insert(tx_id);
        }
        state.active.insert(tx_id, tx);
        state.counters.started += 1;
        drop(state);

        if let Err(e) = self.capture_snapshot(tx_id, &config.snapshot_resources) {
            warn!("Snapshot capture for tx={} failed: {}", tx_id, e);
            if let Err(undo) = self.rollback_transaction(tx_id) {
                debug!("tx={} already gone after failed capture: {}", tx_id, undo);
            }
            return Err(e);
        }

        info!(
            "Started transaction {} ({}, timeout {:?}{})",
            tx_id,
            config.isolation,
            timeout,
            if config.read_only { ", read-only" } else { "" }
        );
        Ok(tx_id)
    }

    /// Read the declared resources into the snapshot at begin.
    fn capture_snapshot(&self, tx_id: TxId, resources: &[ResourceId]) -> Result<()> {
        for resource in resources {
            let value = self.read_committed_value(tx_id, resource)?;
            let mut state = self.state.lock();
            if let Some(snapshot) = state.active_mut(tx_id)?.snapshot.as_mut() {
                snapshot.observe(resource, value);
            }
        }
        Ok(())
    }

    /// Run a unit of work inside an active transaction. An error from `f`
    /// rolls the transaction back before it is returned.
    pub fn execute_in_transaction<T, F>(&self, tx_id: TxId, f: F) -> Result<T>
    where
        F: FnOnce(&TxOps<'_>) -> Result<T>,
    {
        self.run_unit(tx_id, None, f)
    }

    /// Like [`execute_in_transaction`](Self::execute_in_transaction), tagging
    /// every logged operation with `label`.
    pub fn execute_labeled<T, F>(&self, tx_id: TxId, label: &str, f: F) -> Result<T>
    where
        F: FnOnce(&TxOps<'_>) -> Result<T>,
    {
        self.run_unit(tx_id, Some(label), f)
    }

    fn run_unit<T, F>(&self, tx_id: TxId, label: Option<&str>, f: F) -> Result<T>
    where
        F: FnOnce(&TxOps<'_>) -> Result<T>,
    {
        {
            let mut state = self.state.lock();
            state.active_mut(tx_id)?;
            if state.wait_graph.is_on_cycle(tx_id) {
                let cycle = state
                    .wait_graph
                    .find_cycles()
                    .into_iter()
                    .find(|cycle| cycle.contains(&tx_id))
                    .unwrap_or_else(|| vec![tx_id]);
                return Err(Error::DeadlockDetected { tx_id, cycle });
            }
        }

        let ops = TxOps::new(self, tx_id, label);
        match f(&ops) {
            Ok(value) => Ok(value),
            Err(e) => {
                self.auto_rollback(tx_id, &e);
                Err(e)
            }
        }
    }

    fn auto_rollback(&self, tx_id: TxId, cause: &Error) {
        let mut state = self.state.lock();
        // Already gone when the failure was a forced abort.
        if !state.active.contains_key(&tx_id) {
            return;
        }
        warn!("Rolling back tx={} after failure: {}", tx_id, cause);
        let status = self.rollback_locked(&mut state, tx_id, format!("operation failed: {}", cause));
        state.counters.auto_rollbacks += 1;
        drop(state);
        self.lock_released.notify_all();

        if let Some(status) = status {
            self.hooks.fire_rollback(&status);
        }
    }

    /// Begin a transaction, run each unit in order and commit. The first
    /// failure rolls everything back and is returned.
    pub fn execute_batch<T, F, I>(&self, operations: I, config: TransactionConfig) -> Result<Vec<T>>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce(&TxOps<'_>) -> Result<T>,
    {
        let tx_id = self.begin_transaction(config)?;
        let mut results = Vec::new();
        for operation in operations {
            match self.execute_in_transaction(tx_id, operation) {
                Ok(value) => results.push(value),
                Err(e) => {
                    self.auto_rollback(tx_id, &e);
                    return Err(e);
                }
            }
        }
        self.commit_transaction(tx_id)?;
        Ok(results)
    }

    /// Apply `mutation` under an exclusive lock and log it for undo.
    pub fn apply_mutation(
        &self,
        tx_id: TxId,
        mutation: Mutation,
        label: Option<&str>,
    ) -> Result<Operation> {
        {
            let mut state = self.state.lock();
            if state.active_mut(tx_id)?.read_only {
                return Err(Error::ReadOnlyTransaction { id: tx_id });
            }
        }

        for (resource, lock_type) in mutation.lock_requests() {
            self.acquire_lock(tx_id, resource, lock_type, None)?;
        }

        let mut state = self.state.lock();
        let tx = state.active_mut(tx_id)?;
        let op_id = self.next_op_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut op = mutation.apply(self.store.as_ref(), op_id)?;
        if let Some(label) = label {
            op = op.with_metadata("label", label);
        }
        tx.log.append(op.clone());
        Ok(op)
    }

    /// Read a node the way the transaction's isolation level prescribes.
    pub fn read(&self, tx_id: TxId, resource: &str) -> Result<Option<NodeValue>> {
        let policy = {
            let mut state = self.state.lock();
            state.active_mut(tx_id)?.isolation.read_lock_policy()
        };

        match policy {
            ReadLockPolicy::None => {
                let mut state = self.state.lock();
                state.active_mut(tx_id)?;
                self.store.read_value(resource)
            }
            ReadLockPolicy::ShortShared => self.read_committed_value(tx_id, resource),
            ReadLockPolicy::Snapshot => {
                {
                    let mut state = self.state.lock();
                    let tx = state.active_mut(tx_id)?;
                    if tx.log.touches(resource) {
                        return self.store.read_value(resource);
                    }
                    if let Some(seen) = tx.snapshot.as_ref().and_then(|s| s.get(resource)) {
                        return Ok(seen.clone());
                    }
                }

                // First observation: only a committed value may enter the snapshot.
                let current = self.read_committed_value(tx_id, resource)?;
                let mut state = self.state.lock();
                let tx = state.active_mut(tx_id)?;
                Ok(tx
                    .snapshot
                    .get_or_insert_with(ReadSnapshot::new)
                    .observe(resource, current))
            }
        }
    }

    /// Read under a short shared lock, reusing any lock the transaction
    /// already holds on `resource`.
    fn read_committed_value(&self, tx_id: TxId, resource: &str) -> Result<Option<NodeValue>> {
        let already_locked = self.state.lock().locks.holds_any(resource, tx_id);
        if already_locked {
            return self.store.read_value(resource);
        }
        self.acquire_lock(tx_id, resource, LockType::Shared, None)?;
        let value = self.store.read_value(resource);
        if let Err(e) = self.release_lock(tx_id, resource) {
            debug!("Short read lock on {} not released for tx={}: {}", resource, tx_id, e);
        }
        value
    }

    pub fn create_savepoint(&self, tx_id: TxId, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        let tx = state.active_mut(tx_id)?;
        tx.log.create_savepoint(name);
        debug!("Savepoint '{}' in tx={} at {} operation(s)", name, tx_id, tx.log.len());
        Ok(())
    }

    /// Undo everything logged after `name`. Locks stay held and the
    /// transaction stays active.
    pub fn rollback_to_savepoint(&self, tx_id: TxId, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        let tx = state.active_mut(tx_id)?;
        let undone = tx
            .log
            .split_off_savepoint(name)
            .ok_or_else(|| Error::SavepointNotFound {
                id: tx_id,
                name: name.to_string(),
            })?;

        let report = undo_operations(&undone, self.store.as_ref());
        if !report.is_clean() {
            warn!(
                "Rollback of tx={} to '{}' left {} operation(s) not undone",
                tx_id,
                name,
                report.failed.len()
            );
        }
        info!(
            "Rolled back tx={} to savepoint '{}' ({} operation(s) undone)",
            tx_id, name, report.undone
        );
        Ok(())
    }

    pub fn release_savepoint(&self, tx_id: TxId, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.active_mut(tx_id)?.log.release_savepoint(name) {
            Ok(())
        } else {
            Err(Error::SavepointNotFound {
                id: tx_id,
                name: name.to_string(),
            })
        }
    }

    /// Run `f` inside a savepoint scope. On error only the scope is undone;
    /// the transaction stays active and the error is returned.
    pub fn with_savepoint<T, F>(&self, tx_id: TxId, name: &str, f: F) -> Result<T>
    where
        F: FnOnce(&TxOps<'_>) -> Result<T>,
    {
        self.create_savepoint(tx_id, name)?;
        let ops = TxOps::new(self, tx_id, None);
        let result = f(&ops);
        if let Err(e) = &result {
            debug!("Savepoint scope '{}' in tx={} failed: {}", name, tx_id, e);
            if let Err(undo) = self.rollback_to_savepoint(tx_id, name) {
                warn!("Could not undo savepoint scope '{}' in tx={}: {}", name, tx_id, undo);
                return result;
            }
        }
        if let Err(e) = self.release_savepoint(tx_id, name) {
            debug!("Savepoint '{}' already gone in tx={}: {}", name, tx_id, e);
        }
        result
    }

    /// Acquire `lock_type` on `resource`, waiting for conflicting holders to
    /// go away. Gives up with `LockTimeout` after `timeout` (or the
    /// transaction's lock timeout); the transaction itself stays active.
    pub fn acquire_lock(
        &self,
        tx_id: TxId,
        resource: &str,
        lock_type: LockType,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let started = Instant::now();
        let mut state = self.state.lock();
        let timeout = match timeout {
            Some(timeout) => timeout,
            None => state.active_mut(tx_id)?.lock_timeout,
        };
        let deadline = started + timeout;
        let mut waited = false;

        loop {
            if !state.active.contains_key(&tx_id) {
                state.wait_graph.clear_waits(tx_id);
                return Err(state.wait_interrupted_error(tx_id));
            }

            let blockers = state.locks.conflicting_owners(resource, tx_id, lock_type);
            if blockers.is_empty() {
                state.wait_graph.clear_waits(tx_id);
                state.locks.grant(resource, tx_id, lock_type, timeout);
                state.active_mut(tx_id)?.locks.insert(resource.to_string());
                if waited {
                    debug!(
                        "tx={} got {:?} on {} after {:?}",
                        tx_id,
                        lock_type,
                        resource,
                        started.elapsed()
                    );
                }
                return Ok(());
            }

            state.wait_graph.set_waits(tx_id, &blockers);
            if !waited {
                waited = true;
                state.counters.lock_waits += 1;
                debug!(
                    "tx={} waits for {:?} on {} held by {:?}",
                    tx_id, lock_type, resource, blockers
                );
            }

            let now = Instant::now();
            if now >= deadline {
                state.wait_graph.clear_waits(tx_id);
                state.counters.lock_timeouts += 1;
                warn!(
                    "Lock timeout: tx={} {:?} on {} after {:?} (holders {:?})",
                    tx_id,
                    lock_type,
                    resource,
                    now - started,
                    blockers
                );
                return Err(Error::LockTimeout {
                    tx_id,
                    resource: resource.to_string(),
                    lock_type,
                    waited: now - started,
                });
            }

            let wait = (deadline - now).min(self.config.lock_poll_interval);
            self.lock_released.wait_for(&mut state, wait);
        }
    }

    /// Release every lock `tx_id` holds on `resource`. Releasing a lock that
    /// is not held is a no-op.
    pub fn release_lock(&self, tx_id: TxId, resource: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.active_mut(tx_id)?.locks.remove(resource);
        let released = state.locks.release(resource, tx_id);
        drop(state);
        if released > 0 {
            self.lock_released.notify_all();
        }
        Ok(())
    }

    /// Validate, persist, release locks, mark committed, then run commit
    /// hooks. A validation or persistence failure rolls the transaction
    /// back and is returned unchanged.
    pub fn commit_transaction(&self, tx_id: TxId) -> Result<()> {
        let mut state = self.state.lock();
        state.active_mut(tx_id)?;

        if let Err(e) = self.validate_and_persist(&mut state, tx_id) {
            warn!("Commit of tx={} failed, rolling back: {}", tx_id, e);
            let status = self.rollback_locked(&mut state, tx_id, format!("commit failed: {}", e));
            state.counters.auto_rollbacks += 1;
            drop(state);
            self.lock_released.notify_all();
            if let Some(status) = status {
                self.hooks.fire_rollback(&status);
            }
            return Err(e);
        }

        let released = state.release_all_locks(tx_id);
        let status = state.retire(tx_id, TransactionState::Committed, None, None);
        drop(state);
        self.lock_released.notify_all();

        if let Some(status) = status {
            info!(
                "Committed transaction {} ({} operation(s), {} lock(s) released, {:?})",
                tx_id, status.operation_count, released, status.duration
            );
            self.hooks.fire_commit(&status);
        }
        Ok(())
    }

    fn validate_and_persist(&self, state: &mut ManagerState, tx_id: TxId) -> Result<()> {
        let tx = state.active_mut(tx_id)?;

        if tx.isolation.validates_on_commit() {
            if let Some(snapshot) = &tx.snapshot {
                for (resource, seen) in snapshot.iter() {
                    let before_own_writes = match tx.log.first_touching(resource) {
                        Some(op) if matches!(op.kind, OperationType::Update | OperationType::Delete) => {
                            op.old_value.clone()
                        }
                        Some(op) if matches!(op.kind, OperationType::Create | OperationType::Copy) => None,
                        _ => self.store.read_value(resource)?,
                    };
                    if before_own_writes != *seen {
                        return Err(Error::CommitValidationFailed {
                            id: tx_id,
                            resource: resource.clone(),
                        });
                    }
                }
            }
        }

        if tx.log.is_empty() {
            return Ok(());
        }
        self.persistence
            .persist(tx_id, tx.log.entries())
            .inspect_err(|e| error!("Persisting tx={} failed: {}", tx_id, e))
    }

    /// Undo the whole log in reverse, release every lock and retire as
    /// rolled back. Undo failures are logged and do not stop the release.
    fn rollback_locked(
        &self,
        state: &mut ManagerState,
        tx_id: TxId,
        reason: String,
    ) -> Option<TransactionStatus> {
        let report = undo_operations(state.active.get(&tx_id)?.log.entries(), self.store.as_ref());
        if !report.is_clean() {
            warn!(
                "Rollback of tx={} left {} operation(s) not undone",
                tx_id,
                report.failed.len()
            );
        }
        state.release_all_locks(tx_id);
        state.retire(tx_id, TransactionState::RolledBack, Some(reason), None)
    }

    /// Forced termination: locks go first, then best-effort undo.
    fn abort_locked(
        &self,
        state: &mut ManagerState,
        tx_id: TxId,
        cause: AbortCause,
    ) -> Option<TransactionStatus> {
        state.release_all_locks(tx_id);
        let report = undo_operations(state.active.get(&tx_id)?.log.entries(), self.store.as_ref());
        if !report.is_clean() {
            warn!(
                "Abort of tx={} left {} operation(s) not undone",
                tx_id,
                report.failed.len()
            );
        }
        state.retire(
            tx_id,
            TransactionState::Aborted,
            Some(cause.to_string()),
            Some(cause),
        )
    }

    pub fn rollback_transaction(&self, tx_id: TxId) -> Result<()> {
        let mut state = self.state.lock();
        state.active_mut(tx_id)?;
        let status = self.rollback_locked(&mut state, tx_id, "rollback requested".to_string());
        drop(state);
        self.lock_released.notify_all();

        if let Some(status) = status {
            info!(
                "Rolled back transaction {} ({} operation(s))",
                tx_id, status.operation_count
            );
            self.hooks.fire_rollback(&status);
        }
        Ok(())
    }

    /// Force-terminate a transaction. Aborting one that already finished is
    /// a no-op.
    pub fn abort_transaction(&self, tx_id: TxId, reason: &str) -> Result<()> {
        self.abort_with(tx_id, AbortCause::Requested(reason.to_string()))
    }

    fn abort_with(&self, tx_id: TxId, cause: AbortCause) -> Result<()> {
        let mut state = self.state.lock();
        if !state.active.contains_key(&tx_id) {
            return match state.finished(tx_id) {
                Some(status) => {
                    debug!("Abort of tx={} ignored, already {}", tx_id, status.state);
                    Ok(())
                }
                None => Err(Error::TransactionNotFound { id: tx_id }),
            };
        }

        let status = self.abort_locked(&mut state, tx_id, cause.clone());
        if cause == AbortCause::Timeout {
            state.counters.timed_out += 1;
        }
        drop(state);
        self.lock_released.notify_all();

        if let Some(status) = status {
            warn!("Aborted transaction {}: {}", tx_id, cause);
            self.hooks.fire_abort(&status, &cause);
        }
        Ok(())
    }

    /// Status of a live or recently finished transaction.
    pub fn get_transaction_status(&self, tx_id: TxId) -> Result<TransactionStatus> {
        let state = self.state.lock();
        if let Some(tx) = state.active.get(&tx_id) {
            return Ok(tx.status(None, None));
        }
        state
            .finished(tx_id)
            .cloned()
            .ok_or(Error::TransactionNotFound { id: tx_id })
    }

    pub fn get_active_transactions(&self) -> Vec<TransactionStatus> {
        let state = self.state.lock();
        let mut statuses: Vec<TransactionStatus> =
            state.active.values().map(|tx| tx.status(None, None)).collect();
        statuses.sort_by_key(|status| status.id);
        statuses
    }

    pub fn get_statistics(&self) -> TransactionStatistics {
        let state = self.state.lock();
        let counters = &state.counters;
        let finished = counters.committed + counters.rolled_back + counters.aborted;
        let average_duration = if finished == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(counters.finished_duration.as_secs_f64() / finished as f64)
        };
        let waiting: HashSet<TxId> = state
            .wait_graph
            .edges()
            .into_iter()
            .map(|(waiter, _)| waiter)
            .collect();

        TransactionStatistics {
            active_transactions: state.active.len(),
            started: counters.started,
            committed: counters.committed,
            rolled_back: counters.rolled_back,
            aborted: counters.aborted,
            auto_rollbacks: counters.auto_rollbacks,
            timed_out: counters.timed_out,
            average_duration,
            outstanding_locks: state.locks.total_locks(),
            waiting_transactions: waiting.len(),
            lock_waits: counters.lock_waits,
            lock_timeouts: counters.lock_timeouts,
            deadlocks: state.detector.stats(),
        }
    }

    /// Resource → current holders
    pub fn lock_info(&self) -> BTreeMap<ResourceId, Vec<LockHolder>> {
        self.state.lock().locks.lock_info()
    }

    /// Current `(waiter, holder)` pairs
    pub fn wait_for_edges(&self) -> Vec<(TxId, TxId)> {
        self.state.lock().wait_graph.edges()
    }

    pub fn on_commit<F>(&self, hook: F) -> HookId
    where
        F: Fn(&TransactionStatus) -> Result<()> + Send + Sync + 'static,
    {
        self.hooks.register_commit(Arc::new(hook))
    }

    pub fn on_rollback<F>(&self, hook: F) -> HookId
    where
        F: Fn(&TransactionStatus) -> Result<()> + Send + Sync + 'static,
    {
        self.hooks.register_rollback(Arc::new(hook))
    }

    pub fn on_abort<F>(&self, hook: F) -> HookId
    where
        F: Fn(&TransactionStatus, &AbortCause) -> Result<()> + Send + Sync + 'static,
    {
        self.hooks.register_abort(Arc::new(hook))
    }

    pub fn remove_hook(&self, id: HookId) -> bool {
        self.hooks.remove(id)
    }

    /// One scan of the wait-for graph. Every victim is aborted before this
    /// returns.
    pub fn detect_deadlocks(&self) -> Vec<DeadlockReport> {
        let reports = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.last_detection = Instant::now();
            let candidates: HashMap<TxId, VictimCandidate> = state
                .active
                .values()
                .map(|tx| {
                    (
                        tx.id,
                        VictimCandidate {
                            tx_id: tx.id,
                            start_time: tx.started,
                            locks_held: tx.locks.len(),
                            work_done: tx.log.len(),
                        },
                    )
                })
                .collect();
            state.detector.detect(&state.wait_graph, &candidates)
        };

        for report in &reports {
            let cause = AbortCause::Deadlock {
                cycle: report.cycle.clone(),
            };
            if let Err(e) = self.abort_with(report.victim, cause) {
                debug!("Deadlock victim {} already gone: {}", report.victim, e);
            }
        }
        reports
    }

    /// Abort expired transactions and, when due, scan for deadlocks. The
    /// background worker calls this on every tick.
    pub fn run_maintenance(&self) -> MaintenanceReport {
        let now = Instant::now();
        let mut expired: Vec<TxId> = {
            let state = self.state.lock();
            state
                .active
                .values()
                .filter(|tx| tx.is_expired(now))
                .map(|tx| tx.id)
                .collect()
        };
        expired.sort_unstable();

        for &tx_id in &expired {
            warn!("Transaction {} exceeded its timeout", tx_id);
            if let Err(e) = self.abort_with(tx_id, AbortCause::Timeout) {
                debug!("Timed out tx={} already gone: {}", tx_id, e);
            }
        }

        let detection_due = self.config.enable_deadlock_detection
            && self.state.lock().last_detection.elapsed() >= self.config.deadlock_detection_interval;
        let deadlocks = if detection_due {
            self.detect_deadlocks()
        } else {
            Vec::new()
        };

        MaintenanceReport { expired, deadlocks }
    }

    /// Stop the background worker. Transactions are left as they are.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.worker.lock().take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("Transaction maintenance worker panicked");
            }
        }
        info!("Transaction manager shut down");
    }
}

impl Drop for TransactionManager {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.worker.get_mut().take() {
            // The worker itself may hold the last reference.
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("Transaction maintenance worker panicked");
            }
        }
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("config", &self.config)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::node_store::MemoryNodeStore;
    use crate::core::persistence::MemoryPersistence;
    use crate::features::transactions::IsolationLevel;
    use serde_json::json;

    fn manager() -> (Arc<TransactionManager>, Arc<MemoryNodeStore>, Arc<MemoryPersistence>) {
        let store = Arc::new(MemoryNodeStore::new());
        let persistence = Arc::new(MemoryPersistence::new());
        let config = TransactionManagerConfig::builder()
            .background_worker(false)
            .default_lock_timeout(Duration::from_millis(50))
            .build()
            .unwrap();
        let manager = TransactionManager::new(config, store.clone(), persistence.clone()).unwrap();
        (manager, store, persistence)
    }

    #[test]
    fn test_commit_persists_and_releases() {
        let (manager, store, persistence) = manager();
        let tx = manager.begin_transaction(TransactionConfig::default()).unwrap();
        manager
            .execute_in_transaction(tx, |ops| ops.create("a", json!(1)))
            .unwrap();
        assert_eq!(manager.lock_info().len(), 1);

        manager.commit_transaction(tx).unwrap();
        assert_eq!(store.read_value("a").unwrap(), Some(json!(1)));
        assert_eq!(persistence.batch_count(), 1);
        assert!(manager.lock_info().is_empty());

        let status = manager.get_transaction_status(tx).unwrap();
        assert_eq!(status.state, TransactionState::Committed);
        assert_eq!(status.operation_count, 1);
        assert!(status.ended_at.is_some());
    }

    #[test]
    fn test_state_checks() {
        let (manager, _, _) = manager();
        assert!(matches!(
            manager.commit_transaction(99),
            Err(Error::TransactionNotFound { id: 99 })
        ));

        let tx = manager.begin_transaction(TransactionConfig::default()).unwrap();
        manager.rollback_transaction(tx).unwrap();
        let err = manager
            .execute_in_transaction(tx, |_| Ok(()))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::TransactionInvalidState {
                state: TransactionState::RolledBack,
                ..
            }
        ));
        // Aborting a finished transaction is a no-op.
        manager.abort_transaction(tx, "late").unwrap();
    }

    #[test]
    fn test_read_only_rejects_mutations() {
        let (manager, store, _) = manager();
        let tx = manager
            .begin_transaction(TransactionConfig::new().read_only(true))
            .unwrap();
        let err = manager
            .apply_mutation(
                tx,
                Mutation::Create {
                    resource: "x".into(),
                    value: json!(0),
                },
                None,
            )
            .unwrap_err();
        assert!(matches!(err, Error::ReadOnlyTransaction { .. }));
        assert!(store.is_empty());
        assert!(manager.lock_info().is_empty());
    }

    #[test]
    fn test_read_committed_releases_short_lock() {
        let (manager, store, _) = manager();
        store.create("r", json!("v")).unwrap();
        let tx = manager.begin_transaction(TransactionConfig::default()).unwrap();
        assert_eq!(manager.read(tx, "r").unwrap(), Some(json!("v")));
        assert!(manager.lock_info().is_empty());
    }

    #[test]
    fn test_repeatable_read_serves_snapshot() {
        let (manager, store, _) = manager();
        store.create("r", json!(1)).unwrap();

        let reader = manager
            .begin_transaction(TransactionConfig::new().isolation(IsolationLevel::RepeatableRead))
            .unwrap();
        assert_eq!(manager.read(reader, "r").unwrap(), Some(json!(1)));

        let writer = manager.begin_transaction(TransactionConfig::default()).unwrap();
        manager
            .execute_in_transaction(writer, |ops| ops.update("r", json!(2)))
            .unwrap();
        manager.commit_transaction(writer).unwrap();

        assert_eq!(manager.read(reader, "r").unwrap(), Some(json!(1)));
        manager.commit_transaction(reader).unwrap();
    }

    #[test]
    fn test_labels_tag_operations() {
        let (manager, _, persistence) = manager();
        let tx = manager.begin_transaction(TransactionConfig::default()).unwrap();
        manager
            .execute_labeled(tx, "import", |ops| ops.create("n", json!(null)))
            .unwrap();
        manager.commit_transaction(tx).unwrap();

        let batches = persistence.batches();
        assert_eq!(batches[0].operations[0].label(), Some("import"));
    }

    #[test]
    fn test_empty_commit_skips_persistence() {
        let (manager, _, persistence) = manager();
        let tx = manager.begin_transaction(TransactionConfig::default()).unwrap();
        manager.commit_transaction(tx).unwrap();
        assert_eq!(persistence.batch_count(), 0);
    }

    #[test]
    fn test_transaction_limit() {
        let store = Arc::new(MemoryNodeStore::new());
        let config = TransactionManagerConfig::builder()
            .background_worker(false)
            .max_active_transactions(1)
            .build()
            .unwrap();
        let manager =
            TransactionManager::new(config, store, Arc::new(MemoryPersistence::new())).unwrap();
        manager.begin_transaction(TransactionConfig::default()).unwrap();
        assert!(matches!(
            manager.begin_transaction(TransactionConfig::default()),
            Err(Error::TransactionLimitReached { limit: 1 })
        ));
    }

    #[test]
    fn test_release_lock_is_idempotent() {
        let (manager, _, _) = manager();
        let tx = manager.begin_transaction(TransactionConfig::default()).unwrap();
        manager.acquire_lock(tx, "r", LockType::Shared, None).unwrap();
        manager.release_lock(tx, "r").unwrap();
        manager.release_lock(tx, "r").unwrap();
        assert!(manager.lock_info().is_empty());
        assert_eq!(manager.get_transaction_status(tx).unwrap().lock_count, 0);
    }

    #[test]
    fn test_drop_stops_worker() {
        let store = Arc::new(MemoryNodeStore::new());
        let config = TransactionManagerConfig::builder()
            .maintenance_tick(Duration::from_millis(1))
            .build()
            .unwrap();
        let manager =
            TransactionManager::new(config, store.clone(), Arc::new(MemoryPersistence::new()))
                .unwrap();
        manager.begin_transaction(TransactionConfig::default()).unwrap();
        let weak = Arc::downgrade(&manager);
        drop(manager);

        // The worker may be mid-tick and release the last reference itself.
        let deadline = Instant::now() + Duration::from_secs(2);
        while weak.strong_count() > 0 || Arc::strong_count(&store) > 1 {
            assert!(Instant::now() < deadline, "manager outlived its drop");
            thread::sleep(Duration::from_millis(1));
        }
    }
}
