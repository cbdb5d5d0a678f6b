//! Configuration loading for crossref.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at ~/.config/crossref/config.toml.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::CrossrefError;

/// Change collector timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorSettings {
    /// Quiet period after the last edit before a reindex fires.
    #[serde(default = "default_quiet_period_ms")]
    pub quiet_period_ms: u64,

    /// Hard ceiling since the first unflushed edit.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Minimum interval between two reindexes of one document.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
}

fn default_quiet_period_ms() -> u64 {
    750
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_min_interval_ms() -> u64 {
    5_000
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            quiet_period_ms: default_quiet_period_ms(),
            max_delay_ms: default_max_delay_ms(),
            min_interval_ms: default_min_interval_ms(),
        }
    }
}

impl CollectorSettings {
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_delay_ms < self.quiet_period_ms {
            return Err(format!(
                "max_delay_ms ({}) must be >= quiet_period_ms ({})",
                self.max_delay_ms, self.quiet_period_ms
            ));
        }
        Ok(())
    }
}

/// Indexing pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingSettings {
    /// Nodes processed per chunk before yielding.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Tantivy writer memory budget in megabytes.
    #[serde(default = "default_writer_memory_mb")]
    pub writer_memory_mb: usize,
}

fn default_chunk_size() -> usize {
    100
}

fn default_writer_memory_mb() -> usize {
    50
}

impl Default for IndexingSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            writer_memory_mb: default_writer_memory_mb(),
        }
    }
}

/// Lease timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseSettings {
    /// Seconds of heartbeat silence after which a lease may be stolen.
    #[serde(default = "default_lease_timeout_secs")]
    pub timeout_secs: u64,

    /// Heartbeat period in seconds.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

fn default_lease_timeout_secs() -> u64 {
    15
}

fn default_heartbeat_secs() -> u64 {
    10
}

impl Default for LeaseSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_lease_timeout_secs(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

impl LeaseSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.heartbeat_secs == 0 {
            return Err("heartbeat_secs must be > 0".to_string());
        }
        if self.heartbeat_secs >= self.timeout_secs {
            return Err(format!(
                "heartbeat_secs ({}) must be < timeout_secs ({})",
                self.heartbeat_secs, self.timeout_secs
            ));
        }
        Ok(())
    }
}

/// Query defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    #[serde(default = "default_search_limit")]
    pub default_limit: usize,
}

fn default_search_limit() -> usize {
    20
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            default_limit: default_search_limit(),
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to RocksDB storage directory
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub collector: CollectorSettings,

    #[serde(default)]
    pub indexing: IndexingSettings,

    #[serde(default)]
    pub lease: LeaseSettings,

    #[serde(default)]
    pub search: SearchSettings,
}

fn default_db_path() -> String {
    ProjectDirs::from("", "", "crossref")
        .map(|p| p.data_local_dir().join("db"))
        .unwrap_or_else(|| PathBuf::from("./data"))
        .to_string_lossy()
        .to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_level: default_log_level(),
            collector: CollectorSettings::default(),
            indexing: IndexingSettings::default(),
            lease: LeaseSettings::default(),
            search: SearchSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/crossref/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (CROSSREF_*)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, CrossrefError> {
        let config_dir = ProjectDirs::from("", "", "crossref")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            // 1. Built-in defaults
            .set_default("db_path", default_db_path())
            .map_err(|e| CrossrefError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| CrossrefError::Config(e.to_string()))?
            .set_default("collector.quiet_period_ms", default_quiet_period_ms())
            .map_err(|e| CrossrefError::Config(e.to_string()))?
            .set_default("collector.max_delay_ms", default_max_delay_ms())
            .map_err(|e| CrossrefError::Config(e.to_string()))?
            .set_default("collector.min_interval_ms", default_min_interval_ms())
            .map_err(|e| CrossrefError::Config(e.to_string()))?
            .set_default("indexing.chunk_size", default_chunk_size() as u64)
            .map_err(|e| CrossrefError::Config(e.to_string()))?
            .set_default("indexing.writer_memory_mb", default_writer_memory_mb() as u64)
            .map_err(|e| CrossrefError::Config(e.to_string()))?
            .set_default("lease.timeout_secs", default_lease_timeout_secs())
            .map_err(|e| CrossrefError::Config(e.to_string()))?
            .set_default("lease.heartbeat_secs", default_heartbeat_secs())
            .map_err(|e| CrossrefError::Config(e.to_string()))?
            .set_default("search.default_limit", default_search_limit() as u64)
            .map_err(|e| CrossrefError::Config(e.to_string()))?
            // 2. Default config file (~/.config/crossref/config.toml)
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        // 3. CLI-specified config file (higher precedence than default)
        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // 4. Environment variables (highest precedence before CLI flags)
        // Format: CROSSREF_DB_PATH, CROSSREF_COLLECTOR__QUIET_PERIOD_MS, etc.
        builder = builder.add_source(
            Environment::with_prefix("CROSSREF")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| CrossrefError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| CrossrefError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate nested sections.
    pub fn validate(&self) -> Result<(), CrossrefError> {
        self.collector.validate().map_err(CrossrefError::Config)?;
        self.lease.validate().map_err(CrossrefError::Config)?;
        if self.indexing.chunk_size == 0 {
            return Err(CrossrefError::Config("indexing.chunk_size must be > 0".into()));
        }
        Ok(())
    }

    /// Expand ~ in db_path to actual home directory
    pub fn expanded_db_path(&self) -> PathBuf {
        if let Some(rest) = self.db_path.strip_prefix("~/") {
            if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
                return home.join(rest);
            }
        }
        PathBuf::from(&self.db_path)
    }
}
