use std::path::PathBuf;
use thiserror::Error;

use crate::embedding::EmbeddingError;

/// Main error type for pixseek
#[derive(Error, Debug)]
pub enum PixseekError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The store was written by a newer release
    #[error(
        "found index version {found}, newer than the supported version {supported}; please update pixseek"
    )]
    StoreVersionTooNew { found: i64, supported: i64 },

    /// No migration path between two store versions
    #[error("migration of the index from version {from} to version {to} isn't implemented")]
    MigrationNotImplemented { from: i64, to: i64 },

    /// A stored row could not be decoded
    #[error("Corrupt record {id}: {message}")]
    CorruptRecord { id: i64, message: String },

    /// A query references a local file that does not exist
    #[error("File not found: {path}")]
    QueryFileNotFound { path: PathBuf },

    /// A query references something that is not a decodable image
    #[error("Cannot identify image file: {path}")]
    NotAnImage { path: String },

    /// Fetching an image URL failed
    #[error("Failed to download {url}: {message}")]
    Download { url: String, message: String },

    /// The image behind a URL is larger than allowed
    #[error("Avoiding download of large ({size} byte) file from {url} (limit: {limit} bytes)")]
    DownloadTooLarge { url: String, size: u64, limit: u64 },

    /// Embedding model errors
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Store merge errors
    #[error("Merge error: {0}")]
    Merge(String),

    /// Invalid user input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PixseekError {
    /// Wrap an IO error with a description of what was being attempted
    pub fn io(source: std::io::Error, context: impl Into<String>) -> Self {
        Self::Io {
            source,
            context: context.into(),
        }
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for pixseek operations
pub type Result<T> = std::result::Result<T, PixseekError>;
