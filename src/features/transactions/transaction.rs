use super::config::TransactionConfig;
use super::isolation::{IsolationLevel, ReadSnapshot, ResourceId, TxId};
use super::operation_log::OperationLog;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant, SystemTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionState {
    Pending,
    Active,
    Committed,
    Aborted,
    RolledBack,
}

impl TransactionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Aborted | TransactionState::RolledBack
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::Pending => write!(f, "PENDING"),
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Aborted => write!(f, "ABORTED"),
            TransactionState::RolledBack => write!(f, "ROLLED_BACK"),
        }
    }
}

/// Why a transaction was force-terminated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortCause {
    /// Caller asked for it
    Requested(String),
    /// The transaction outlived its timeout
    Timeout,
    /// Chosen as the victim of a wait-for cycle
    Deadlock { cycle: Vec<TxId> },
}

impl fmt::Display for AbortCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortCause::Requested(reason) => write!(f, "{}", reason),
            AbortCause::Timeout => write!(f, "transaction timeout"),
            AbortCause::Deadlock { .. } => write!(f, "deadlock resolution"),
        }
    }
}

/// Read-only view of a transaction, live or finished.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionStatus {
    pub id: TxId,
    pub state: TransactionState,
    pub isolation: IsolationLevel,
    pub read_only: bool,
    pub operation_count: usize,
    pub lock_count: usize,
    pub duration: Duration,
    pub started_at: SystemTime,
    pub ended_at: Option<SystemTime>,
    pub parent: Option<TxId>,
    pub children: Vec<TxId>,
    pub savepoints: Vec<String>,
    pub end_reason: Option<String>,
    pub abort_cause: Option<AbortCause>,
}

/// Registry entry for a live transaction. Only the manager touches these,
/// always under its state lock.
#[derive(Debug)]
pub(crate) struct Transaction {
    pub id: TxId,
    pub state: TransactionState,
    pub isolation: IsolationLevel,
    pub read_only: bool,
    pub started: Instant,
    pub started_at: SystemTime,
    pub ended_at: Option<SystemTime>,
    pub timeout: Duration,
    pub deadline: Instant,
    pub lock_timeout: Duration,
    pub log: OperationLog,
    pub locks: HashSet<ResourceId>,
    pub parent: Option<TxId>,
    pub children: HashSet<TxId>,
    pub snapshot: Option<ReadSnapshot>,
}

impl Transaction {
    pub fn new(
        id: TxId,
        config: &TransactionConfig,
        timeout: Duration,
        lock_timeout: Duration,
        snapshot: Option<ReadSnapshot>,
    ) -> Self {
        let started = Instant::now();
        Self {
            id,
            state: TransactionState::Pending,
            isolation: config.isolation,
            read_only: config.read_only,
            started,
            started_at: SystemTime::now(),
            ended_at: None,
            timeout,
            deadline: started + timeout,
            lock_timeout,
            log: OperationLog::new(),
            locks: HashSet::new(),
            parent: config.parent,
            children: HashSet::new(),
            snapshot,
        }
    }

    /// PENDING -> ACTIVE. The timeout counts from here.
    pub fn activate(&mut self) {
        self.started = Instant::now();
        self.deadline = self.started + self.timeout;
        self.state = TransactionState::Active;
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.state == TransactionState::Active && now >= self.deadline
    }

    pub fn status(&self, end_reason: Option<String>, abort_cause: Option<AbortCause>) -> TransactionStatus {
        let mut children: Vec<TxId> = self.children.iter().copied().collect();
        children.sort_unstable();
        TransactionStatus {
            id: self.id,
            state: self.state,
            isolation: self.isolation,
            read_only: self.read_only,
            operation_count: self.log.len(),
            lock_count: self.locks.len(),
            duration: self.started.elapsed(),
            started_at: self.started_at,
            ended_at: self.ended_at,
            parent: self.parent,
            children,
            savepoints: self.log.savepoint_names(),
            end_reason,
            abort_cause,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!TransactionState::Pending.is_terminal());
        assert!(!TransactionState::Active.is_terminal());
        assert!(TransactionState::Committed.is_terminal());
        assert!(TransactionState::Aborted.is_terminal());
        assert!(TransactionState::RolledBack.is_terminal());
        assert_eq!(TransactionState::RolledBack.to_string(), "ROLLED_BACK");
    }

    #[test]
    fn test_lifecycle_and_expiry() {
        let config = TransactionConfig::default();
        let mut tx = Transaction::new(1, &config, Duration::from_millis(5), Duration::from_millis(1), None);
        assert_eq!(tx.state, TransactionState::Pending);
        assert!(!tx.is_expired(Instant::now() + Duration::from_secs(1)));

        tx.activate();
        assert_eq!(tx.state, TransactionState::Active);
        assert!(!tx.is_expired(tx.started));
        assert!(tx.is_expired(tx.started + Duration::from_millis(5)));

        let status = tx.status(None, None);
        assert_eq!(status.id, 1);
        assert_eq!(status.isolation, IsolationLevel::ReadCommitted);
        assert_eq!(status.operation_count, 0);
    }

    #[test]
    fn test_abort_cause_display() {
        assert_eq!(AbortCause::Timeout.to_string(), "transaction timeout");
        assert_eq!(
            AbortCause::Deadlock { cycle: vec![1, 2] }.to_string(),
            "deadlock resolution"
        );
        assert_eq!(AbortCause::Requested("shutdown".into()).to_string(), "shutdown");
    }
}
