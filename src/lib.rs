//! Shelfscan: an incremental book-catalogue crawler
//!
//! This crate walks a paginated book catalogue, extracts one record per book,
//! and persists the records with hash-based change detection against earlier
//! crawls. Every fetched page is archived, every change is recorded in the
//! book's history, and the listing traversal is checkpointed so an interrupted
//! crawl picks up where it left off.

pub mod catalog;
pub mod config;
pub mod crawler;
pub mod output;
pub mod storage;

use thiserror::Error;

/// Main error type for Shelfscan operations
#[derive(Debug, Error)]
pub enum ShelfError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Parse error: {0}")]
    Parse(#[from] crawler::ParseError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("A crawl run is already in progress")]
    AlreadyRunning,

    #[error("Crawl task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Report error: {0}")]
    Report(#[from] csv::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Missing required settings: {}", .0.join(", "))]
    MissingSettings(Vec<String>),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Shelfscan operations
pub type Result<T> = std::result::Result<T, ShelfError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use catalog::{BookRecord, ChangeEvent, HistoryEntry, Price, RawSnapshot};
pub use config::Config;
pub use crawler::{Coordinator, CrawlController, CrawlReport, StartMode};
