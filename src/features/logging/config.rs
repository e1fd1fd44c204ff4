use serde::{Deserialize, Serialize};
use tracing::Level;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub with_thread_ids: bool,
    pub with_line_numbers: bool,
    pub with_target: bool,
    /// Directive used when `RUST_LOG` is not set. `{level}` is replaced with
    /// the configured level.
    pub default_directive: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    Json,
    Compact,
    Pretty,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            with_thread_ids: true,
            with_line_numbers: true,
            with_target: true,
            default_directive: "nodestore_txn={level},warn".to_string(),
        }
    }
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl LoggingConfig {
    /// Defaults overridden by `NODESTORE_LOG_LEVEL` and `NODESTORE_LOG_FORMAT`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(level) = std::env::var("NODESTORE_LOG_LEVEL") {
            config.level = match level.to_lowercase().as_str() {
                "trace" => LogLevel::Trace,
                "debug" => LogLevel::Debug,
                "info" => LogLevel::Info,
                "warn" => LogLevel::Warn,
                "error" => LogLevel::Error,
                _ => LogLevel::Info,
            };
        }

        if let Ok(format) = std::env::var("NODESTORE_LOG_FORMAT") {
            config.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                _ => LogFormat::Compact,
            };
        }

        config
    }

    pub fn filter_directive(&self) -> String {
        let level: Level = self.level.into();
        self.default_directive
            .replace("{level}", &level.to_string().to_lowercase())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.default_directive.trim().is_empty() {
            return Err("default_directive must not be empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive() {
        let config = LoggingConfig {
            level: LogLevel::Debug,
            ..LoggingConfig::default()
        };
        assert_eq!(config.filter_directive(), "nodestore_txn=debug,warn");
        assert!(config.validate().is_ok());

        let empty = LoggingConfig {
            default_directive: " ".to_string(),
            ..LoggingConfig::default()
        };
        assert!(empty.validate().is_err());
    }
}
