//! Configuration management for the clusterops engine
//!
//! Settings are loaded from:
//! 1. Environment variables (highest priority)
//! 2. Configuration file (TOML format)
//! 3. Default values (lowest priority)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::logging::LoggingConfig;
use crate::secrets::VaultConfig;
use crate::upgrade::versions::DEFAULT_SUPPORTED_VERSIONS;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Cloud API configuration
    pub cloud: CloudConfig,
    /// Node drain configuration
    pub drain: DrainConfig,
    /// Upgrade configuration
    pub upgrade: UpgradeConfig,
    /// Specification and artifact storage
    pub store: StoreConfig,
    /// Vault configuration
    pub vault: VaultConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Cloud API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// Resource Manager endpoint
    pub endpoint: String,
    /// Token authority
    pub authority: String,
    /// Audience of requested tokens
    pub resource: String,
    pub tenant_id: String,
    pub subscription_id: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Interval between deployment status polls in seconds
    pub poll_interval_secs: u64,
}

/// Node drain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DrainConfig {
    /// Upper bound on draining one node, in minutes
    pub timeout_minutes: u64,
    /// Grace period handed to pod evictions
    pub grace_period_seconds: Option<u32>,
}

/// Upgrade configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeConfig {
    /// Upper bound on each node replacement, in minutes; unbounded when unset
    pub step_timeout_minutes: Option<u64>,
    /// Kubernetes versions clusters can be upgraded to
    pub supported_versions: Vec<String>,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding one `<cluster>.json` specification per cluster
    pub spec_dir: PathBuf,
    /// Directory holding generated deployment artifacts, one subdirectory per cluster
    pub artifacts_dir: PathBuf,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://management.azure.com".to_string(),
            authority: "https://login.microsoftonline.com".to_string(),
            resource: "https://management.core.windows.net/".to_string(),
            tenant_id: String::new(),
            subscription_id: String::new(),
            request_timeout_secs: 120,
            poll_interval_secs: 30,
        }
    }
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: 60,
            grace_period_seconds: None,
        }
    }
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            step_timeout_minutes: None,
            supported_versions: DEFAULT_SUPPORTED_VERSIONS
                .iter()
                .map(|v| v.to_string())
                .collect(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from("/var/lib/clusterops");
        Self {
            spec_dir: data_dir.join("clusters"),
            artifacts_dir: data_dir.join("artifacts"),
        }
    }
}

impl DrainConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes * 60)
    }
}

impl UpgradeConfig {
    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_minutes.map(|m| Duration::from_secs(m * 60))
    }
}

impl CloudConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl EngineConfig {
    /// Load configuration from environment variables and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Like [`EngineConfig::load`], reading `path` instead of searching the
    /// standard locations when it is given
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path.map(Path::to_path_buf).or_else(Self::find_config_file) {
            Some(path) => Self::load_from_file(&path)?,
            None => Self::default(),
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.clone(), e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            std::env::var("CLUSTEROPS_CONFIG").ok().map(PathBuf::from),
            Some(PathBuf::from("/etc/clusterops/config.toml")),
            Some(PathBuf::from("./clusterops.toml")),
        ];

        paths.into_iter().flatten().find(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // Cloud
        if let Ok(endpoint) = std::env::var("CLUSTEROPS_CLOUD_ENDPOINT") {
            self.cloud.endpoint = endpoint;
        }
        if let Ok(tenant) = std::env::var("CLUSTEROPS_TENANT_ID") {
            self.cloud.tenant_id = tenant;
        }
        if let Ok(subscription) = std::env::var("CLUSTEROPS_SUBSCRIPTION_ID") {
            self.cloud.subscription_id = subscription;
        }

        // Drain
        if let Ok(minutes) = std::env::var("CLUSTEROPS_DRAIN_TIMEOUT_MINUTES") {
            if let Ok(minutes) = minutes.parse() {
                self.drain.timeout_minutes = minutes;
            }
        }

        // Upgrade
        if let Ok(minutes) = std::env::var("CLUSTEROPS_UPGRADE_STEP_TIMEOUT_MINUTES") {
            self.upgrade.step_timeout_minutes = minutes.parse().ok();
        }

        // Store
        if let Ok(path) = std::env::var("CLUSTEROPS_SPEC_DIR") {
            self.store.spec_dir = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("CLUSTEROPS_ARTIFACTS_DIR") {
            self.store.artifacts_dir = PathBuf::from(path);
        }

        // Vault
        if let Ok(address) = std::env::var("CLUSTEROPS_VAULT_ADDR") {
            self.vault.address = address;
            self.vault.enabled = true;
        }

        // Logging
        self.logging.apply_env_overrides();
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cloud.endpoint.is_empty() {
            return Err(ConfigError::Validation(
                "Cloud endpoint cannot be empty".to_string(),
            ));
        }
        url::Url::parse(&self.cloud.endpoint).map_err(|e| {
            ConfigError::Validation(format!("Invalid cloud endpoint: {}", e))
        })?;

        if self.drain.timeout_minutes == 0 {
            return Err(ConfigError::Validation(
                "Drain timeout cannot be 0".to_string(),
            ));
        }

        if self.upgrade.step_timeout_minutes == Some(0) {
            return Err(ConfigError::Validation(
                "Upgrade step timeout cannot be 0".to_string(),
            ));
        }

        if self.upgrade.supported_versions.is_empty() {
            return Err(ConfigError::Validation(
                "At least one supported version is required".to_string(),
            ));
        }

        if self.vault.enabled && self.vault.address.is_empty() {
            return Err(ConfigError::Validation(
                "Vault address cannot be empty when vault is enabled".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// Failed to read configuration file
    FileRead(PathBuf, String),
    /// Failed to parse configuration
    Parse(String),
    /// Configuration validation failed
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, err) => {
                write!(f, "Failed to read config file {:?}: {}", path, err)
            }
            ConfigError::Parse(err) => write!(f, "Failed to parse config: {}", err),
            ConfigError::Validation(err) => write!(f, "Config validation failed: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.cloud.endpoint, "https://management.azure.com");
        assert_eq!(config.drain.timeout(), Duration::from_secs(3600));
        assert_eq!(config.upgrade.step_timeout(), None);
        assert_eq!(config.store.spec_dir, PathBuf::from("/var/lib/clusterops/clusters"));
    }

    #[test]
    fn test_config_validation() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());

        let mut invalid = EngineConfig::default();
        invalid.drain.timeout_minutes = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = EngineConfig::default();
        invalid.cloud.endpoint = String::new();
        assert!(invalid.validate().is_err());

        let mut invalid = EngineConfig::default();
        invalid.upgrade.step_timeout_minutes = Some(0);
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_generate_sample_config() {
        let sample = EngineConfig::generate_sample();
        assert!(sample.contains("[cloud]"));
        assert!(sample.contains("[drain]"));
        assert!(sample.contains("[upgrade]"));
        assert!(sample.contains("[store]"));
        assert!(sample.contains("[vault]"));
        assert!(sample.contains("[logging]"));
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clusterops.toml");
        std::fs::write(
            &path,
            r#"
            [cloud]
            subscription_id = "sub-1"

            [upgrade]
            step_timeout_minutes = 45
            "#,
        )
        .unwrap();

        let config = EngineConfig::load_from_file(&path).unwrap();
        assert_eq!(config.cloud.subscription_id, "sub-1");
        assert_eq!(config.cloud.endpoint, "https://management.azure.com");
        assert_eq!(config.upgrade.step_timeout(), Some(Duration::from_secs(45 * 60)));
        assert_eq!(config.drain.timeout_minutes, 60);
    }
}
