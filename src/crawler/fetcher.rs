//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building the HTTP client with the configured user agent and timeout
//! - Bounding in-flight requests with a shared semaphore
//! - Retrying failed attempts with exponential backoff
//! - Classifying each attempt as success, retryable or fatal

use crate::config::{CrawlerConfig, UserAgentConfig};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// A successfully fetched page
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects
    pub final_url: String,
    /// Raw response body
    pub body: Vec<u8>,
}

impl FetchedPage {
    /// Body decoded as text for the parser; invalid UTF-8 is replaced
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Result of a fetch operation
#[derive(Debug)]
pub enum FetchResult {
    /// Successfully fetched the page
    Success(FetchedPage),

    /// Every attempt failed with a retryable error
    Exhausted {
        /// Number of attempts made
        attempts: u32,
        /// Description of the final failure
        last_error: String,
    },

    /// The request can never succeed (e.g. malformed URL); not retried
    Fatal {
        /// Error description
        error: String,
    },
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Outcome of a single attempt
#[derive(Debug)]
enum Attempt {
    Success(FetchedPage),
    Retryable(String),
    Fatal(String),
}

/// Exponential backoff schedule: `base`, `2 * base`, `4 * base`, ...
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `user_agent` - The user agent configuration
/// * `timeout` - Wall-clock timeout for each request
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(
    user_agent: &UserAgentConfig,
    timeout: Duration,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent.value.as_str())
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Bounded-concurrency HTTP fetcher with retry
///
/// Cloning a `Fetcher` shares its client and its concurrency limiter, so every
/// clone counts against the same permit pool.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    limiter: Arc<Semaphore>,
    capacity: usize,
    retry: RetryPolicy,
}

impl Fetcher {
    /// Creates a fetcher from an existing client
    pub fn new(client: Client, concurrency: usize, retry: RetryPolicy) -> Self {
        let capacity = concurrency.max(1);
        Self {
            client,
            limiter: Arc::new(Semaphore::new(capacity)),
            capacity,
            retry,
        }
    }

    /// Creates a fetcher from the crawler configuration
    pub fn from_config(
        crawler: &CrawlerConfig,
        user_agent: &UserAgentConfig,
    ) -> Result<Self, reqwest::Error> {
        let client = build_http_client(user_agent, crawler.request_timeout())?;
        Ok(Self::new(
            client,
            crawler.concurrency as usize,
            RetryPolicy {
                max_attempts: crawler.retry_attempts,
                base_delay: crawler.retry_backoff(),
            },
        ))
    }

    /// Permit count of the shared limiter
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of fetches currently holding a permit
    pub fn in_flight(&self) -> usize {
        self.capacity - self.limiter.available_permits()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Fetches a URL using the configured number of attempts
    pub async fn fetch(&self, url: &str) -> FetchResult {
        self.fetch_with_attempts(url, self.retry.max_attempts).await
    }

    /// Fetches a URL, retrying up to `max_attempts` times
    ///
    /// # Retry Logic
    ///
    /// | Condition | Action |
    /// |-----------|--------|
    /// | HTTP 200 | Success |
    /// | Any other status | Retry with backoff |
    /// | Timeout / connection error | Retry with backoff |
    /// | Invalid URL / request build error | Fatal, no retry |
    ///
    /// The backoff sleep happens after the permit is released, so waiting
    /// requests never block other fetches.
    pub async fn fetch_with_attempts(&self, url: &str, max_attempts: u32) -> FetchResult {
        let max_attempts = max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.attempt(url).await {
                Attempt::Success(page) => return FetchResult::Success(page),
                Attempt::Fatal(error) => {
                    tracing::error!("Giving up on {}: {}", url, error);
                    return FetchResult::Fatal { error };
                }
                Attempt::Retryable(error) => {
                    tracing::warn!(
                        "Attempt {}/{} for {} failed: {}",
                        attempt,
                        max_attempts,
                        url,
                        error
                    );
                    last_error = error;
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.retry.delay_after(attempt)).await;
            }
        }

        tracing::error!("Failed after {} attempts: {}", max_attempts, url);
        FetchResult::Exhausted {
            attempts: max_attempts,
            last_error,
        }
    }

    /// Issues one request while holding a limiter permit
    async fn attempt(&self, url: &str) -> Attempt {
        let _permit = match self.limiter.acquire().await {
            Ok(permit) => permit,
            Err(_) => return Attempt::Fatal("fetch limiter closed".to_string()),
        };

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => return classify_error(e),
        };

        let status = response.status();
        if status != StatusCode::OK {
            return Attempt::Retryable(format!("HTTP {}", status.as_u16()));
        }

        let final_url = response.url().to_string();
        match response.bytes().await {
            Ok(body) => Attempt::Success(FetchedPage {
                final_url,
                body: body.to_vec(),
            }),
            Err(e) => classify_error(e),
        }
    }
}

/// Splits transport errors into retryable and fatal
fn classify_error(error: reqwest::Error) -> Attempt {
    if error.is_builder() {
        Attempt::Fatal(error.to_string())
    } else if error.is_timeout() {
        Attempt::Retryable("Request timeout".to_string())
    } else if error.is_connect() {
        Attempt::Retryable(format!("Connection error: {}", error))
    } else {
        Attempt::Retryable(error.to_string())
    }
}
