//! Configuration management for pixseek
//!
//! A TOML file with one section per concern. Missing files fall back to
//! defaults; environment variables (`PIXSEEK_SECTION__KEY`) and command-line
//! flags override file values.

use crate::error::{PixseekError, Result};
use crate::imaging::DownloadLimits;
use crate::indexing::IndexOptions;
use crate::scanner::{ExcludeDirs, DEFAULT_EXCLUDED_DIRS};
use crate::storage::DB_FILE_NAME;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

/// Current config file schema version
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";

const ENV_PREFIX: &str = "PIXSEEK_";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub indexing: IndexingConfig,
    pub search: SearchConfig,
    pub embedding: EmbeddingConfig,
    pub download: DownloadConfig,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Where the image store lives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub db_file: String,
}

/// Sweep settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    pub batch_size: usize,
    pub commit_interval: u64,
    pub count_update_every: u64,
    pub exclude_dirs: Vec<String>,
    pub raw_support: bool,
}

/// Search settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub top_k: usize,
}

/// Embedding model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    pub cache_dir: PathBuf,
}

/// URL query download limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    pub max_size_bytes: u64,
    pub timeout: String,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PixseekError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            PixseekError::io(e, format!("Failed to read config file: {:?}", path))
        })?;
        let mut config: Config = toml::from_str(&content)?;

        // Apply environment variable overrides
        config.apply_env_overrides();

        // Validate configuration
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Load an explicit file, or the default file if it exists, or defaults
    ///
    /// Only an explicitly named file is required to exist.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let path = Self::default_path()?;
        if path.exists() {
            return Self::load(&path);
        }

        tracing::debug!("No config file at {:?}, using defaults", path);
        let mut config = Config::default();
        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PixseekError::io(e, format!("Failed to create config directory: {:?}", parent))
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| {
            PixseekError::io(e, format!("Failed to write config file: {:?}", path))
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: PIXSEEK_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(std::env::vars());
    }

    /// Apply `PIXSEEK_*` overrides from any key/value source
    pub fn apply_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(config_key) = key.strip_prefix(ENV_PREFIX) {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "DATADIR" | "STORAGE__DATA_DIR" => {
                self.storage.data_dir = PathBuf::from(value);
            }
            "STORAGE__DB_FILE" => {
                self.storage.db_file = value.to_string();
            }
            "INDEXING__BATCH_SIZE" => {
                self.indexing.batch_size = parse_env(path, value)?;
            }
            "INDEXING__COMMIT_INTERVAL" => {
                self.indexing.commit_interval = parse_env(path, value)?;
            }
            "INDEXING__COUNT_UPDATE_EVERY" => {
                self.indexing.count_update_every = parse_env(path, value)?;
            }
            "INDEXING__EXCLUDE_DIRS" => {
                self.indexing.exclude_dirs = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect();
            }
            "INDEXING__RAW_SUPPORT" => {
                self.indexing.raw_support = parse_env(path, value)?;
            }
            "SEARCH__TOP_K" => {
                self.search.top_k = parse_env(path, value)?;
            }
            "EMBEDDING__MODEL" => {
                self.embedding.model = value.to_string();
            }
            "EMBEDDING__CACHE_DIR" => {
                self.embedding.cache_dir = PathBuf::from(value);
            }
            "DOWNLOAD__MAX_SIZE_BYTES" => {
                self.download.max_size_bytes = parse_env(path, value)?;
            }
            "DOWNLOAD__TIMEOUT" => {
                self.download.timeout = value.to_string();
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| PixseekError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("pixseek").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> PathBuf {
        match dirs::data_dir() {
            Some(dir) => dir.join("pixseek"),
            None => PathBuf::from("~/.pixseek"),
        }
    }

    /// Data directory with `~/` expanded
    pub fn data_dir(&self) -> PathBuf {
        expand_home(&self.storage.data_dir)
    }

    /// Store file inside the data directory
    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join(&self.storage.db_file)
    }

    /// Model cache directory with `~/` expanded
    pub fn model_cache_dir(&self) -> PathBuf {
        expand_home(&self.embedding.cache_dir)
    }

    pub fn exclude_dirs(&self) -> ExcludeDirs {
        ExcludeDirs::new(self.indexing.exclude_dirs.iter().cloned())
    }

    pub fn index_options(&self) -> IndexOptions {
        IndexOptions {
            batch_size: self.indexing.batch_size,
            commit_interval: self.indexing.commit_interval,
            count_update_every: self.indexing.count_update_every,
            exclude_dirs: self.exclude_dirs(),
            raw_support: self.indexing.raw_support,
        }
    }

    pub fn download_limits(&self) -> Result<DownloadLimits> {
        let timeout = parse_duration(&self.download.timeout).ok_or_else(|| {
            PixseekError::InvalidConfigValue {
                path: "download.timeout".to_string(),
                message: format!("Invalid duration format: {}", self.download.timeout),
            }
        })?;
        Ok(DownloadLimits {
            max_size_bytes: self.download.max_size_bytes,
            timeout,
        })
    }

    /// Look up one section rendered as TOML
    pub fn section_toml(&self, section: &str) -> Result<String> {
        let rendered = match section {
            "_meta" | "meta" => toml::to_string_pretty(&self.meta)?,
            "storage" => toml::to_string_pretty(&self.storage)?,
            "indexing" => toml::to_string_pretty(&self.indexing)?,
            "search" => toml::to_string_pretty(&self.search)?,
            "embedding" => toml::to_string_pretty(&self.embedding)?,
            "download" => toml::to_string_pretty(&self.download)?,
            other => {
                return Err(PixseekError::Config(format!(
                    "Unknown config section '{}'",
                    other
                )))
            }
        };
        Ok(rendered)
    }
}

fn parse_env<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| PixseekError::InvalidConfigValue {
            path: path.to_string(),
            message: format!("Cannot parse '{}'", value),
        })
}

/// Parse `"500ms"`, `"60s"`, `"5m"`, `"1h"` or bare seconds
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (number, unit_ms) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1_000)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60_000)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3_600_000)
    } else {
        (s, 1_000)
    };
    let value: u64 = number.trim().parse().ok()?;
    value.checked_mul(unit_ms).map(Duration::from_millis)
}

/// Expand a leading `~/` to the home directory
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION.to_string(),
            created_at: current_timestamp(),
            last_modified: current_timestamp(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: Config::default_data_dir(),
            db_file: DB_FILE_NAME.to_string(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        let options = IndexOptions::default();
        Self {
            batch_size: options.batch_size,
            commit_interval: options.commit_interval,
            count_update_every: options.count_update_every,
            exclude_dirs: DEFAULT_EXCLUDED_DIRS.iter().map(|d| d.to_string()).collect(),
            raw_support: options.raw_support,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { top_k: 10 }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: crate::embedding::CLIP_MODEL_NAME.to_string(),
            cache_dir: crate::embedding::default_cache_dir(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        let limits = DownloadLimits::default();
        Self {
            max_size_bytes: limits.max_size_bytes,
            timeout: format!("{}s", limits.timeout.as_secs()),
        }
    }
}
