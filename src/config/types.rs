use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Shelfscan
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    #[serde(rename = "user-agent", default)]
    pub user_agent: UserAgentConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Root URL of the catalogue site
    #[serde(rename = "start-url")]
    pub start_url: String,

    /// Path segment under the root that holds the paginated listing
    #[serde(rename = "catalogue-path", default = "default_catalogue_path")]
    pub catalogue_path: String,

    /// First listing page, relative to the catalogue path
    #[serde(rename = "first-page", default = "default_first_page")]
    pub first_page: String,

    /// Maximum number of in-flight fetches across the whole run
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Attempts per URL before the fetch is given up
    #[serde(rename = "retry-attempts", default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// First backoff delay in milliseconds; doubles after every failed attempt
    #[serde(rename = "retry-backoff-ms", default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Wall-clock timeout for a single request (seconds)
    #[serde(rename = "request-timeout-secs", default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl CrawlerConfig {
    /// Creates a crawler configuration with default tuning for the given start URL
    pub fn with_start_url(start_url: impl Into<String>) -> Self {
        Self {
            start_url: start_url.into(),
            catalogue_path: default_catalogue_path(),
            first_page: default_first_page(),
            concurrency: default_concurrency(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Full User-Agent header value sent with every request
    #[serde(default = "default_user_agent")]
    pub value: String,
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            value: default_user_agent(),
        }
    }
}

/// Content store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// Output configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    /// Directory for per-run change reports; reports are skipped when unset
    #[serde(rename = "report-dir", default)]
    pub report_dir: Option<String>,
}

fn default_catalogue_path() -> String {
    "catalogue/".to_string()
}

fn default_first_page() -> String {
    "page-1.html".to_string()
}

fn default_concurrency() -> u32 {
    5
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    "BooksToScrapeCrawler/1.0 (+https://example.com)".to_string()
}
