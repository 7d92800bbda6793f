//! Crawler coordinator - main crawl orchestration logic
//!
//! This module contains the crawl loop, which:
//! - Resolves the starting listing page from the checkpoint and start mode
//! - Fetches and parses listing pages strictly one after another
//! - Fans out the book fetches of each page through the shared fetcher
//! - Feeds every parsed book to the upsert engine and collects change events
//! - Saves the checkpoint only after a page's books have all completed
//! - Observes the stop token between listing pages

use crate::catalog::{now_utc, ChangeEvent, UpsertEngine};
use crate::config::Config;
use crate::crawler::checkpoint::{CheckpointManager, CheckpointState, Traversal};
use crate::crawler::fetcher::{FetchResult, Fetcher};
use crate::crawler::parser::{CatalogueParser, PageParser};
use crate::storage::SharedStorage;
use crate::{Result, ShelfError};
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Lifecycle of the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlState {
    /// No run has started yet
    Idle,
    /// A run is traversing listing pages
    Running,
    /// A stop was requested; the current page is being finished
    Stopping,
    /// The last run has ended
    Stopped,
}

impl CrawlState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Stopping)
    }
}

/// Where a run starts relative to the saved checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartMode {
    /// Resume an interrupted pass, otherwise start a new one
    #[default]
    Auto,
    /// Resume an interrupted pass; a finished pass ends the run at once
    Resume,
    /// Ignore the checkpoint
    Fresh,
}

/// Why a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The last listing page had no next page
    Completed,
    /// The stop token was observed at a page boundary
    Stopped,
    /// Resume was requested but the saved traversal had already finished
    AlreadyFinished,
    /// A listing page could not be fetched
    ListingUnavailable { url: String },
    /// A listing page could not be parsed
    ListingParseFailed { url: String, reason: String },
}

/// Result of one crawl run
#[derive(Debug, Clone)]
pub struct CrawlReport {
    /// Change events in the order the upserts completed
    pub events: Vec<ChangeEvent>,
    /// Listing pages whose books were all processed
    pub pages_processed: usize,
    /// Distinct book URLs dispatched during the run
    pub visited: usize,
    pub termination: Termination,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CrawlReport {
    pub fn new_count(&self) -> usize {
        self.events.iter().filter(|e| e.is_new()).count()
    }

    pub fn updated_count(&self) -> usize {
        self.events.len() - self.new_count()
    }
}

/// Snapshot of the coordinator for status queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlStatus {
    pub state: CrawlState,
    pub running: bool,
    pub visited_count: usize,
}

/// Main crawler coordinator structure
pub struct Coordinator {
    fetcher: Fetcher,
    parser: Arc<dyn PageParser>,
    engine: UpsertEngine,
    checkpoints: CheckpointManager,
    visited: Mutex<HashSet<String>>,
    state: Mutex<CrawlState>,
}

impl Coordinator {
    /// Creates a coordinator using the default catalogue parser
    ///
    /// # Arguments
    ///
    /// * `config` - The crawler configuration
    /// * `storage` - The content store shared with the rest of the process
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Successfully created coordinator
    /// * `Err(ShelfError)` - The HTTP client or traversal URLs could not be built
    pub fn new(config: &Config, storage: SharedStorage) -> Result<Self> {
        Self::with_parser(config, storage, Arc::new(CatalogueParser::new()))
    }

    /// Creates a coordinator with a custom page parser
    pub fn with_parser(
        config: &Config,
        storage: SharedStorage,
        parser: Arc<dyn PageParser>,
    ) -> Result<Self> {
        let fetcher = Fetcher::from_config(&config.crawler, &config.user_agent)?;
        let traversal = Traversal::from_config(&config.crawler)?;

        Ok(Self {
            fetcher,
            parser,
            engine: UpsertEngine::new(storage.clone()),
            checkpoints: CheckpointManager::new(storage, traversal),
            visited: Mutex::new(HashSet::new()),
            state: Mutex::new(CrawlState::Idle),
        })
    }

    pub fn traversal(&self) -> &Traversal {
        self.checkpoints.traversal()
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// Current state and the number of book URLs seen by the current or last run
    pub fn status(&self) -> CrawlStatus {
        let state = *self.state();
        CrawlStatus {
            state,
            running: state.is_active(),
            visited_count: self.visited().len(),
        }
    }

    /// Runs one crawl to completion
    ///
    /// Fails with `AlreadyRunning` if another run holds the coordinator.
    /// Every other failure is absorbed into the report's termination.
    pub async fn run(&self, mode: StartMode, cancel: CancellationToken) -> Result<CrawlReport> {
        self.begin()?;
        Ok(self.execute(mode, cancel).await)
    }

    /// Claims the coordinator for a new run
    pub(crate) fn begin(&self) -> Result<()> {
        let mut state = self.state();
        if state.is_active() {
            return Err(ShelfError::AlreadyRunning);
        }
        *state = CrawlState::Running;
        self.visited().clear();
        Ok(())
    }

    /// Records that a stop was requested for the active run
    pub(crate) fn mark_stopping(&self) {
        let mut state = self.state();
        if *state == CrawlState::Running {
            *state = CrawlState::Stopping;
        }
    }

    /// Drives a claimed run and releases the coordinator afterwards
    pub(crate) async fn execute(&self, mode: StartMode, cancel: CancellationToken) -> CrawlReport {
        let report = self.traverse(mode, &cancel).await;
        *self.state() = CrawlState::Stopped;

        tracing::info!(
            "Crawl finished ({:?}): {} pages, {} books visited, {} new, {} updated",
            report.termination,
            report.pages_processed,
            report.visited,
            report.new_count(),
            report.updated_count()
        );
        report
    }

    async fn traverse(&self, mode: StartMode, cancel: &CancellationToken) -> CrawlReport {
        let started_at = now_utc();
        let mut events = Vec::new();
        let mut pages_processed = 0;
        let mut listings_seen = HashSet::new();

        let termination = match self.resume_point(mode) {
            None => {
                tracing::info!("Traversal already finished, nothing to resume");
                Termination::AlreadyFinished
            }
            Some(mut cursor) => loop {
                if self.stop_requested(cancel) {
                    tracing::info!("Stop requested, ending before {}", cursor);
                    break Termination::Stopped;
                }
                listings_seen.insert(cursor.to_string());

                tracing::info!("Crawling page: {}", cursor);
                let page = match self.fetcher.fetch(cursor.as_str()).await {
                    FetchResult::Success(page) => page,
                    FetchResult::Exhausted { last_error, .. } | FetchResult::Fatal { error: last_error } => {
                        tracing::warn!("Listing page {} unavailable: {}", cursor, last_error);
                        break Termination::ListingUnavailable {
                            url: cursor.to_string(),
                        };
                    }
                };

                let listing = match self.parser.parse_listing(&page.text(), &cursor) {
                    Ok(listing) => listing,
                    Err(e) => {
                        tracing::error!("Failed to parse listing page {}: {}", cursor, e);
                        break Termination::ListingParseFailed {
                            url: cursor.to_string(),
                            reason: e.to_string(),
                        };
                    }
                };

                tracing::debug!(
                    "{} book links on {}",
                    listing.book_links.len(),
                    cursor
                );
                self.crawl_books(&listing.book_links, &mut events).await;
                pages_processed += 1;

                let next = listing
                    .next_page
                    .as_deref()
                    .and_then(|link| match self.traversal().resolve(link) {
                        Ok(url) => Some(url),
                        Err(e) => {
                            tracing::warn!("Ignoring unresolvable next page {:?}: {}", link, e);
                            None
                        }
                    })
                    .filter(|url| {
                        let fresh = !listings_seen.contains(url.as_str());
                        if !fresh {
                            tracing::warn!("Next page {} was already crawled this run, ending traversal", url);
                        }
                        fresh
                    });

                if let Err(e) = self.checkpoints.save(next.as_ref().map(Url::as_str)) {
                    tracing::error!("Failed to save checkpoint after {}: {}", cursor, e);
                }

                match next {
                    Some(url) => cursor = url,
                    None => break Termination::Completed,
                }
            },
        };

        CrawlReport {
            events,
            pages_processed,
            visited: self.visited().len(),
            termination,
            started_at,
            finished_at: now_utc(),
        }
    }

    /// Checks the stop token, moving a running coordinator to `Stopping`
    fn stop_requested(&self, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            self.mark_stopping();
            true
        } else {
            false
        }
    }

    /// Picks the first listing page, or `None` when there is nothing to do
    fn resume_point(&self, mode: StartMode) -> Option<Url> {
        let first_page = self.traversal().first_page().clone();
        if mode == StartMode::Fresh {
            tracing::info!("Starting fresh traversal at {}", first_page);
            return Some(first_page);
        }

        match self.checkpoints.load() {
            Ok(CheckpointState::At(url)) => {
                tracing::info!("Resuming from checkpoint {}", url);
                Some(url)
            }
            Ok(CheckpointState::NotStarted) => {
                tracing::info!("No checkpoint found, starting at {}", first_page);
                Some(first_page)
            }
            Ok(CheckpointState::Finished) if mode == StartMode::Resume => None,
            Ok(CheckpointState::Finished) => {
                tracing::info!("Previous traversal finished, starting a new pass");
                Some(first_page)
            }
            Err(e) => {
                tracing::error!("Failed to load checkpoint ({}), starting at {}", e, first_page);
                Some(first_page)
            }
        }
    }

    /// Fetches, parses and upserts every unvisited book of one listing page
    async fn crawl_books(&self, links: &[String], events: &mut Vec<ChangeEvent>) {
        let mut tasks = FuturesUnordered::new();
        for link in links {
            if self.visited().insert(link.clone()) {
                tasks.push(self.crawl_book(link));
            } else {
                tracing::debug!("Already visited: {}", link);
            }
        }

        while let Some(outcome) = tasks.next().await {
            if let Some(event) = outcome {
                events.push(event);
            }
        }
    }

    /// Processes one book; every failure is logged and skipped
    async fn crawl_book(&self, url: &str) -> Option<ChangeEvent> {
        let page = match self.fetcher.fetch(url).await {
            FetchResult::Success(page) => page,
            FetchResult::Exhausted {
                attempts,
                last_error,
            } => {
                tracing::warn!("Skipping {} after {} attempts: {}", url, attempts, last_error);
                return None;
            }
            FetchResult::Fatal { error } => {
                tracing::warn!("Skipping {}: {}", url, error);
                return None;
            }
        };

        if page.final_url != url {
            tracing::debug!("{} redirected to {}", url, page.final_url);
        }

        let parsed = match self.parser.parse_detail(&page.text(), url) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Skipping {}: {}", url, e);
                return None;
            }
        };

        match self.engine.upsert(&parsed, &page.body) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!("Upsert failed for {}: {}", url, e);
                None
            }
        }
    }

    fn state(&self) -> MutexGuard<'_, CrawlState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn visited(&self) -> MutexGuard<'_, HashSet<String>> {
        self.visited.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
