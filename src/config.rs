//! Configuration for Keep
//!
//! Settings live in `<config dir>/keep/config.toml`. Every field has a default, so
//! a missing file or a partial one is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cache::{CacheOptions, DEFAULT_CAPACITY, DEFAULT_LIFETIME_SECS, MAX_LIFETIME_SECS};
use crate::error::KeepError;
use crate::logging::Severity;

/// Which sink a [`crate::Keep`] instance writes to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkKind {
    /// A JSON array in `file_name`, inside the log directory
    File { file_name: String },
    /// An in-process expiring cache
    Memory,
}

impl Default for SinkKind {
    fn default() -> Self {
        SinkKind::File {
            file_name: default_file_name(),
        }
    }
}

/// Sizing of the memory sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Seconds a record stays in memory (default: 43200 = 12 hours)
    #[serde(default = "default_lifetime_secs")]
    pub lifetime_secs: u64,

    /// Maximum records held in memory (default: 50)
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            lifetime_secs: default_lifetime_secs(),
            capacity: default_capacity(),
        }
    }
}

impl CacheConfig {
    pub fn options(&self) -> CacheOptions {
        let secs = self.lifetime_secs.min(MAX_LIFETIME_SECS as u64) as i64;
        CacheOptions::new(chrono::Duration::seconds(secs), self.capacity)
    }
}

/// Settings for one Keep instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepConfig {
    /// Records below this severity are dropped (default: trace, keep everything)
    #[serde(default = "default_min_level")]
    pub min_level: Severity,

    /// Directory for the file sink (default: the platform data directory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    /// Quiet period before a search term is applied (default: 300ms)
    #[serde(default = "default_search_debounce_ms")]
    pub search_debounce_ms: u64,

    #[serde(default)]
    pub sink: SinkKind,

    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_file_name() -> String {
    "log.json".to_string()
}

fn default_lifetime_secs() -> u64 {
    DEFAULT_LIFETIME_SECS as u64
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_min_level() -> Severity {
    Severity::Trace
}

fn default_search_debounce_ms() -> u64 {
    300
}

impl Default for KeepConfig {
    fn default() -> Self {
        Self {
            min_level: default_min_level(),
            log_dir: None,
            search_debounce_ms: default_search_debounce_ms(),
            sink: SinkKind::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl KeepConfig {
    /// File sink writing `file_name` in the default log directory
    pub fn file(file_name: impl Into<String>) -> Self {
        Self {
            sink: SinkKind::File {
                file_name: file_name.into(),
            },
            ..Self::default()
        }
    }

    /// Memory sink with default cache sizing
    pub fn memory() -> Self {
        Self {
            sink: SinkKind::Memory,
            ..Self::default()
        }
    }

    pub fn with_min_level(self, min_level: Severity) -> Self {
        Self { min_level, ..self }
    }

    pub fn with_log_dir(self, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: Some(log_dir.into()),
            ..self
        }
    }

    /// Load configuration from the default location, or defaults if there is none
    pub fn load() -> Result<Self> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from `path`, or defaults if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to `path`, creating its directory
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Reject settings no sink can work with
    pub fn validate(&self) -> crate::error::Result<()> {
        if let SinkKind::File { file_name } = &self.sink {
            if file_name.is_empty() {
                return Err(KeepError::Config("log file name is empty".to_string()));
            }
            if file_name.contains('/') || file_name.contains('\\') {
                return Err(KeepError::Config(format!(
                    "log file name must not contain a path separator: {}",
                    file_name
                )));
            }
        }
        if self.cache.lifetime_secs > MAX_LIFETIME_SECS as u64 {
            return Err(KeepError::Config(format!(
                "cache lifetime too long: {}s",
                self.cache.lifetime_secs
            )));
        }
        self.cache.options().validate()
    }

    /// Directory the file sink writes to
    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(data_dir)
    }

    /// Full path of the log file, if this config uses the file sink
    pub fn log_file_path(&self) -> Option<PathBuf> {
        match &self.sink {
            SinkKind::File { file_name } => Some(self.log_dir().join(file_name)),
            SinkKind::Memory => None,
        }
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }
}

/// Get the Keep configuration directory
///
/// Falls back to `.keep` in the current directory if the platform has no
/// configuration directory.
pub fn config_dir() -> PathBuf {
    try_config_dir().unwrap_or_else(|| {
        tracing::warn!("Could not determine config directory, using current directory");
        PathBuf::from(".keep")
    })
}

pub fn try_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("keep"))
}

/// Get the default config file path
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Get the default directory for log files
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("keep"))
        .unwrap_or_else(|| {
            tracing::warn!("Could not determine data directory, using current directory");
            PathBuf::from(".keep")
        })
}
