//! CLI configuration management

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub default_output: String,
    /// Engine configuration used when `--config` is not given
    pub engine_config: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_output: "table".to_string(),
            engine_config: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(config_path)?;
        let config: Config = toml::from_str(&contents)?;

        Ok(config)
    }

    fn config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME")?;
        Ok(PathBuf::from(home).join(".config/clusterops/cli.toml"))
    }
}
