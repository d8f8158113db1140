//! Pipeline configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) is valid. CLI flags
//! are applied on top of the loaded value by the binary.
//!
//! ```toml
//! output_root = "data"
//! existing_dir = "/mnt/legacy/NSE_RawData"
//! holiday_feed = "config/nse_holidays.csv"
//! workers = 1
//! request_interval_ms = 2000
//!
//! [retry]
//! max_attempts = 3
//!
//! [fetch]
//! absent_statuses = [404]
//!
//! [curation]
//! required_columns = ["SYMBOL", "SERIES", "DATE1", "CLOSE_PRICE"]
//! ```

use bhavcopy_core::{HolidayFeed, NseSourceConfig, RetryPolicy, DEFAULT_REQUIRED_COLUMNS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurationConfig {
    pub required_columns: Vec<String>,
    /// Filename glob for the standalone `curate` command.
    pub pattern: String,
}

impl Default for CurationConfig {
    fn default() -> Self {
        Self {
            required_columns: DEFAULT_REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect(),
            pattern: "sec_bhavdata_full_*.csv".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub output_root: PathBuf,
    /// Defaults to `{output_root}/logs`.
    pub log_dir: Option<PathBuf>,
    pub category: String,
    /// Legacy download tree (`{dir}/{YYYYMM}/…csv`); files there count as acquired.
    pub existing_dir: Option<PathBuf>,
    /// Holiday list path or URL. Empty means recurring holidays only.
    pub holiday_feed: String,
    pub workers: usize,
    /// Pause after every date that touched the network.
    pub request_interval_ms: u64,
    pub retry: RetryPolicy,
    pub fetch: NseSourceConfig,
    pub curation: CurationConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("data"),
            log_dir: None,
            category: "cm".into(),
            existing_dir: None,
            holiday_feed: String::new(),
            workers: 1,
            request_interval_ms: 2_000,
            retry: RetryPolicy::default(),
            fetch: NseSourceConfig::default(),
            curation: CurationConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse from a TOML string and validate.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.category.trim().is_empty() {
            return Err(ConfigError::Invalid("category must not be empty".into()));
        }
        if self.curation.required_columns.is_empty() {
            return Err(ConfigError::Invalid(
                "curation.required_columns must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| self.output_root.join("logs"))
    }

    pub fn holiday_feed(&self) -> HolidayFeed {
        HolidayFeed::parse(&self.holiday_feed)
    }
}
