use super::isolation::{DeadlockResolutionStrategy, IsolationLevel, ResourceId, TxId};
use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Manager-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionManagerConfig {
    /// Transaction timeout used when a transaction does not set its own
    pub default_timeout: Duration,
    /// How long a single lock request may wait
    pub default_lock_timeout: Duration,
    /// Upper bound on one wait between conflict re-checks
    pub lock_poll_interval: Duration,
    pub enable_deadlock_detection: bool,
    pub deadlock_detection_interval: Duration,
    pub deadlock_strategy: DeadlockResolutionStrategy,
    /// Run timeouts and deadlock scans on a background thread. With this off
    /// the owner has to call `run_maintenance` itself.
    pub enable_background_worker: bool,
    pub maintenance_tick: Duration,
    pub max_active_transactions: usize,
    /// Finished transactions kept for status lookups
    pub history_limit: usize,
}

impl Default for TransactionManagerConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            default_lock_timeout: Duration::from_secs(5),
            lock_poll_interval: Duration::from_millis(10),
            enable_deadlock_detection: true,
            deadlock_detection_interval: Duration::from_secs(1),
            deadlock_strategy: DeadlockResolutionStrategy::AbortYoungest,
            enable_background_worker: true,
            maintenance_tick: Duration::from_millis(10),
            max_active_transactions: 10_000,
            history_limit: 1_000,
        }
    }
}

impl TransactionManagerConfig {
    pub fn builder() -> TransactionManagerConfigBuilder {
        TransactionManagerConfigBuilder::new()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("default_timeout", self.default_timeout),
            ("default_lock_timeout", self.default_lock_timeout),
            ("lock_poll_interval", self.lock_poll_interval),
            ("deadlock_detection_interval", self.deadlock_detection_interval),
            ("maintenance_tick", self.maintenance_tick),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(Error::Config(format!("{} must be greater than zero", name)));
            }
        }
        if self.max_active_transactions == 0 {
            return Err(Error::Config(
                "max_active_transactions must be greater than zero".to_string(),
            ));
        }
        if self.history_limit == 0 {
            return Err(Error::Config("history_limit must be greater than zero".to_string()));
        }
        Ok(())
    }
}

pub struct TransactionManagerConfigBuilder {
    config: TransactionManagerConfig,
}

impl TransactionManagerConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: TransactionManagerConfig::default(),
        }
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = timeout;
        self
    }

    pub fn default_lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_lock_timeout = timeout;
        self
    }

    pub fn lock_poll_interval(mut self, interval: Duration) -> Self {
        self.config.lock_poll_interval = interval;
        self
    }

    pub fn deadlock_detection(mut self, enabled: bool) -> Self {
        self.config.enable_deadlock_detection = enabled;
        self
    }

    pub fn deadlock_detection_interval(mut self, interval: Duration) -> Self {
        self.config.deadlock_detection_interval = interval;
        self
    }

    pub fn deadlock_strategy(mut self, strategy: DeadlockResolutionStrategy) -> Self {
        self.config.deadlock_strategy = strategy;
        self
    }

    pub fn background_worker(mut self, enabled: bool) -> Self {
        self.config.enable_background_worker = enabled;
        self
    }

    pub fn maintenance_tick(mut self, tick: Duration) -> Self {
        self.config.maintenance_tick = tick;
        self
    }

    pub fn max_active_transactions(mut self, limit: usize) -> Self {
        self.config.max_active_transactions = limit;
        self
    }

    pub fn history_limit(mut self, limit: usize) -> Self {
        self.config.history_limit = limit;
        self
    }

    pub fn build(self) -> Result<TransactionManagerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for TransactionManagerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Options for a single transaction. Unset timeouts fall back to the
/// manager defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    pub isolation: IsolationLevel,
    pub timeout: Option<Duration>,
    pub read_only: bool,
    pub lock_timeout: Option<Duration>,
    pub parent: Option<TxId>,
    /// Resources read into the snapshot at begin (REPEATABLE READ and up)
    pub snapshot_resources: Vec<ResourceId>,
}

impl TransactionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = level;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    pub fn parent(mut self, parent: TxId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn snapshot<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ResourceId>,
    {
        self.snapshot_resources.extend(resources.into_iter().map(Into::into));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = TransactionManagerConfig::default();
        assert_eq!(config.default_timeout, Duration::from_secs(30));
        assert_eq!(config.default_lock_timeout, Duration::from_secs(5));
        assert_eq!(config.deadlock_detection_interval, Duration::from_secs(1));
        assert_eq!(config.deadlock_strategy, DeadlockResolutionStrategy::AbortYoungest);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_rejects_zero_values() {
        let err = TransactionManagerConfig::builder()
            .lock_poll_interval(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        assert!(TransactionManagerConfig::builder()
            .history_limit(0)
            .build()
            .is_err());

        let config = TransactionManagerConfig::builder()
            .default_lock_timeout(Duration::from_millis(50))
            .background_worker(false)
            .build()
            .unwrap();
        assert_eq!(config.default_lock_timeout, Duration::from_millis(50));
        assert!(!config.enable_background_worker);
    }

    #[test]
    fn test_json_partial_override() {
        let config = TransactionManagerConfig::from_json_str(
            r#"{"max_active_transactions": 4, "deadlock_strategy": "AbortLeastWork"}"#,
        )
        .unwrap();
        assert_eq!(config.max_active_transactions, 4);
        assert_eq!(config.deadlock_strategy, DeadlockResolutionStrategy::AbortLeastWork);
        assert_eq!(config.default_timeout, Duration::from_secs(30));

        assert!(TransactionManagerConfig::from_json_str(r#"{"history_limit": 0}"#).is_err());
        assert!(matches!(
            TransactionManagerConfig::from_json_str("not json"),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let json = serde_json::to_string(&TransactionManagerConfig::default()).unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let loaded = TransactionManagerConfig::from_json_file(file.path()).unwrap();
        assert_eq!(loaded, TransactionManagerConfig::default());

        let missing = TransactionManagerConfig::from_json_file("/nonexistent/txn.json");
        assert!(matches!(missing, Err(Error::Config(_))));
    }

    #[test]
    fn test_transaction_config_builder() {
        let config = TransactionConfig::new()
            .isolation(IsolationLevel::Serializable)
            .timeout(Duration::from_millis(200))
            .read_only(true)
            .snapshot(["a", "b"]);
        assert_eq!(config.isolation, IsolationLevel::Serializable);
        assert_eq!(config.timeout, Some(Duration::from_millis(200)));
        assert!(config.read_only);
        assert_eq!(config.snapshot_resources, vec!["a".to_string(), "b".to_string()]);
    }
}
