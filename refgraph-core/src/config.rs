//! TOML configuration for the store and the list iterators.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "refgraph.toml";

/// Batch size used by list iterators and the log walk.
pub const DEFAULT_PREFETCH_SIZE: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub iteration: IterationConfig,
}

impl Config {
    /// Load `refgraph.toml` from `dir`, falling back to defaults when absent.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to serialize config: {}", e)))?;
        fs::write(dir.join(CONFIG_FILE_NAME), content)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.iteration.prefetch_size == 0 {
            return Err(Error::Config("iteration.prefetch_size must be positive".to_string()));
        }
        if self.storage.pool_size == 0 {
            return Err(Error::Config("storage.pool_size must be positive".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    /// How long SQLite waits on a locked database before failing.
    pub busy_timeout_ms: u64,

    /// Idle connections kept for reuse.
    pub pool_size: usize,
}

impl StorageConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5000,
            pool_size: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IterationConfig {
    pub prefetch_size: usize,
}

impl Default for IterationConfig {
    fn default() -> Self {
        Self {
            prefetch_size: DEFAULT_PREFETCH_SIZE,
        }
    }
}
