use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::strategy::StrategyKind;

/// Per-attempt deadline used when the config file does not set one.
pub const DEFAULT_ATTEMPT_TIMEOUT_MS: u64 = 3000;

/// Pause before each attempt so the adapter can drop the previous association.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 800;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub default_interface: Option<String>,
    #[serde(default)]
    pub strategy: StrategyKind,
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default)]
    pub history_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_interface: None,
            strategy: StrategyKind::default(),
            attempt_timeout_ms: DEFAULT_ATTEMPT_TIMEOUT_MS,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            history_path: None,
        }
    }
}

fn default_attempt_timeout_ms() -> u64 {
    DEFAULT_ATTEMPT_TIMEOUT_MS
}

fn default_settle_delay_ms() -> u64 {
    DEFAULT_SETTLE_DELAY_MS
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = config_path()?;
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Location of the failure history, honouring the `history_path` override.
    pub fn history_path(&self) -> Result<PathBuf> {
        match &self.history_path {
            Some(path) => Ok(path.clone()),
            None => default_history_path(),
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Could not determine config directory")?;
    Ok(config_dir.join("wifi-autoconnect").join("config.toml"))
}

pub fn default_history_path() -> Result<PathBuf> {
    let data_dir = dirs::data_local_dir()
        .context("Could not determine data directory")?;
    Ok(data_dir.join("wifi-autoconnect").join("history.json"))
}
