//! Logging configuration module
//!
//! Console output plus an optional rolling JSON log file.

use serde::{Deserialize, Serialize};
use std::io;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const LOG_FILE_NAME: &str = "clusterops.log";

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    pub level: String,
    /// Directory for the rolling log file; console only when unset
    pub file_path: Option<String>,
    pub rotation: LogRotation,
    /// JSON console output
    pub json_format: bool,
}

/// Log rotation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Hourly,
    Daily,
    Never,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            rotation: LogRotation::Daily,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Initialize logging based on configuration.
    ///
    /// The returned guard flushes the file writer when dropped and must be
    /// kept alive for as long as the process logs.
    pub fn init(&self) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
        let env_filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(&self.level)?,
        };

        let console_layer = if self.json_format {
            fmt::layer()
                .with_target(true)
                .json()
                .with_writer(io::stderr)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(true)
                .with_writer(io::stderr)
                .boxed()
        };

        let (file_layer, guard) = match &self.file_path {
            Some(path) => {
                let file_appender = match self.rotation {
                    LogRotation::Hourly => rolling::hourly(path, LOG_FILE_NAME),
                    LogRotation::Daily => rolling::daily(path, LOG_FILE_NAME),
                    LogRotation::Never => rolling::never(path, LOG_FILE_NAME),
                };
                let (writer, guard) = non_blocking(file_appender);

                let layer = fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_ansi(false)
                    .json()
                    .with_writer(writer);
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()?;

        tracing::debug!("Logging initialized - level: {}", self.level);

        Ok(guard)
    }

    /// Apply `CLUSTEROPS_LOG_*` environment overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("CLUSTEROPS_LOG_LEVEL") {
            self.level = level;
        }
        if let Ok(path) = std::env::var("CLUSTEROPS_LOG_PATH") {
            self.file_path = Some(path);
        }
        if let Ok(json) = std::env::var("CLUSTEROPS_LOG_JSON") {
            self.json_format = json == "1" || json.eq_ignore_ascii_case("true");
        }
    }
}

/// Log a step of a scale or upgrade run
#[macro_export]
macro_rules! log_scale_step {
    ($step:expr, $pool:expr) => {
        tracing::info!(
            operation = $step,
            pool = %$pool,
            "Scale step"
        )
    };
    ($step:expr, $pool:expr, $($key:ident = $value:expr),+) => {
        tracing::info!(
            operation = $step,
            pool = %$pool,
            $($key = $value),+,
            "Scale step"
        )
    };
}

/// Log an operation on a single node
#[macro_export]
macro_rules! log_node_operation {
    ($op:expr, $node:expr) => {
        tracing::info!(
            operation = $op,
            node = %$node,
            "Node operation"
        )
    };
    ($op:expr, $node:expr, $($key:ident = $value:expr),+) => {
        tracing::info!(
            operation = $op,
            node = %$node,
            $($key = $value),+,
            "Node operation"
        )
    };
}

/// Log performance metric
#[macro_export]
macro_rules! log_performance {
    ($operation:expr, $duration_ms:expr) => {
        tracing::info!(
            operation = $operation,
            duration_ms = $duration_ms,
            "Performance metric"
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert!(config.file_path.is_none());
        assert_eq!(config.rotation, LogRotation::Daily);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: LoggingConfig = toml::from_str(
            r#"
            level = "debug"
            rotation = "hourly"
            "#,
        )
        .unwrap();
        assert_eq!(config.level, "debug");
        assert_eq!(config.rotation, LogRotation::Hourly);
        assert!(!config.json_format);
    }
}
