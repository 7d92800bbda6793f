//! Statistics generation from the content store
//!
//! This module provides functionality for extracting and displaying
//! store statistics from the storage layer.

use crate::catalog::{BookRecord, HistoryEntry};
use crate::storage::{BookQuery, BookSort, CheckpointRow, Storage};
use crate::crawler::LISTING_CHECKPOINT_KEY;
use crate::Result;

/// How many recent books and changes are shown
const RECENT_LIMIT: u32 = 10;

/// Content store statistics summary
#[derive(Debug, Clone)]
pub struct StoreStatistics {
    /// Number of live book records
    pub total_books: u64,

    /// Number of history entries across all books
    pub total_history: u64,

    /// Number of archived page snapshots
    pub total_snapshots: u64,

    /// The listing cursor, if one was ever saved
    pub checkpoint: Option<CheckpointRow>,

    /// Most recently crawled books
    pub recent_books: Vec<BookRecord>,

    /// Most recent changes, newest first
    pub recent_changes: Vec<HistoryEntry>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(StoreStatistics)` - Successfully loaded statistics
/// * `Err(ShelfError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Storage) -> Result<StoreStatistics> {
    let recent = BookQuery {
        sort: Some(BookSort::Recent),
        limit: RECENT_LIMIT,
        ..BookQuery::default()
    };

    Ok(StoreStatistics {
        total_books: storage.count_books()?,
        total_history: storage.count_history()?,
        total_snapshots: storage.count_snapshots()?,
        checkpoint: storage.load_checkpoint(LISTING_CHECKPOINT_KEY)?,
        recent_books: storage.list_books(&recent)?,
        recent_changes: storage.recent_history(RECENT_LIMIT, 0)?,
    })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &StoreStatistics) {
    println!("=== Catalogue Statistics ===\n");

    println!("Overview:");
    println!("  Books: {}", stats.total_books);
    println!("  History entries: {}", stats.total_history);
    println!("  Page snapshots: {}", stats.total_snapshots);
    println!();

    println!("Checkpoint:");
    match &stats.checkpoint {
        None => println!("  (none, next crawl starts at the first page)"),
        Some(CheckpointRow { value: None, updated_at, .. }) => {
            println!("  Traversal finished (saved {})", updated_at)
        }
        Some(CheckpointRow {
            value: Some(url),
            updated_at,
            ..
        }) => println!("  Next page {} (saved {})", url, updated_at),
    }
    println!();

    if !stats.recent_books.is_empty() {
        println!("Recently Crawled:");
        for book in &stats.recent_books {
            let rating = book
                .book
                .rating
                .map(|r| format!("{}/5", r))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {} | £{:.2} | {} | {}",
                book.crawl_timestamp.format("%Y-%m-%d %H:%M:%S"),
                book.book.price.including_tax,
                rating,
                book.name()
            );
        }
        println!();
    }

    if !stats.recent_changes.is_empty() {
        println!("Recent Changes:");
        for entry in &stats.recent_changes {
            println!(
                "  {} | {} (was £{:.2})",
                entry.ts.format("%Y-%m-%d %H:%M:%S"),
                entry.previous.name(),
                entry.previous.book.price.including_tax
            );
        }
        println!();
    }

    let per_book = if stats.total_books > 0 {
        stats.total_snapshots as f64 / stats.total_books as f64
    } else {
        0.0
    };
    println!("Snapshots per book: {:.1}", per_book);
}
