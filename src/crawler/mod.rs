//! Crawler module for catalogue traversal
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching with bounded concurrency and retry
//! - Listing and detail page parsing
//! - Listing checkpoints for resumption
//! - Overall crawl coordination and the start/stop control surface

mod checkpoint;
mod control;
mod coordinator;
mod fetcher;
mod parser;

pub use checkpoint::{CheckpointManager, CheckpointState, Traversal, LISTING_CHECKPOINT_KEY};
pub use control::CrawlController;
pub use coordinator::{
    Coordinator, CrawlReport, CrawlState, CrawlStatus, StartMode, Termination,
};
pub use fetcher::{build_http_client, FetchResult, FetchedPage, Fetcher, RetryPolicy};
pub use parser::{CatalogueParser, PageParser, ParseError, ParsedListing};

use crate::config::Config;
use crate::storage::{open_storage, shared};
use crate::Result;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Runs a complete crawl against the configured database
///
/// This is the one-shot entry point. It will:
/// 1. Open (or create) the content store
/// 2. Resolve the starting listing page from the checkpoint
/// 3. Traverse listing pages until the last page or a stop request
///
/// # Arguments
///
/// * `config` - The crawler configuration
/// * `mode` - How the saved checkpoint is used
/// * `cancel` - Token observed between listing pages
///
/// # Returns
///
/// * `Ok(CrawlReport)` - The run ended; see its termination for why
/// * `Err(ShelfError)` - The store or HTTP client could not be set up
pub async fn crawl(config: &Config, mode: StartMode, cancel: CancellationToken) -> Result<CrawlReport> {
    let storage = shared(open_storage(Path::new(&config.storage.database_path))?);
    let coordinator = Coordinator::new(config, storage)?;
    coordinator.run(mode, cancel).await
}
