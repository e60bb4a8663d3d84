//! Configuration module for thumbcache

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::debounce::DebounceTiming;
use crate::paths;
use crate::pool::DEFAULT_LIMIT;
use crate::store::StoreOptions;

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Whether thumbnails are read from and written to disk
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Directory holding the thumbnail database (None = application data dir)
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Target number of populated thumbnails kept in memory
    #[serde(default = "default_pool_limit")]
    pub pool_limit: usize,

    /// Idle period before pending writes are flushed, in milliseconds
    #[serde(default = "default_min_idle_ms")]
    pub min_idle_ms: u64,

    /// Longest a pending write may wait, in milliseconds
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_pool_limit() -> usize {
    DEFAULT_LIMIT
}

fn default_min_idle_ms() -> u64 {
    500
}

fn default_max_wait_ms() -> u64 {
    2000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            directory: None,
            pool_limit: default_pool_limit(),
            min_idle_ms: default_min_idle_ms(),
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Result<PathBuf> {
        paths::config_path().context("Could not determine config directory")
    }

    /// Load config from the default path or create default
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        Self::load_from(&path)
    }

    /// Load config from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to the default path
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path()?;
        self.save_to(&path)
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Debounce timing for background writes
    pub fn debounce_timing(&self) -> DebounceTiming {
        DebounceTiming {
            min_idle: Duration::from_millis(self.min_idle_ms),
            max_wait: Duration::from_millis(self.max_wait_ms.max(self.min_idle_ms)),
        }
    }

    /// Options for opening a [`crate::ThumbnailStore`]
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            enabled: self.enabled,
            directory: self.directory.clone(),
            timing: self.debounce_timing(),
            ..StoreOptions::default()
        }
    }
}
