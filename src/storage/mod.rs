//! Storage module for persisting crawl data
//!
//! This module is the content store for the crawler:
//! - SQLite database initialization and schema management
//! - Book records with a unique `source_url` and sparse-unique `upc`
//! - Append-only book history and raw HTML snapshots
//! - Traversal checkpoints for resumption

mod schema;
mod sqlite;
mod traits;

pub use sqlite::{init_database, SqliteStorage};
pub use traits::{Storage, StorageError, StorageResult};

use crate::ShelfError;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Content store shared between the crawl tasks
pub type SharedStorage = Arc<Mutex<dyn Storage + Send>>;

/// Wraps a storage backend for sharing across tasks
pub fn shared<S: Storage + Send + 'static>(storage: S) -> SharedStorage {
    Arc::new(Mutex::new(storage))
}

/// Locks the shared store
///
/// The guard must be dropped before the caller awaits anything.
pub fn lock(storage: &SharedStorage) -> StorageResult<MutexGuard<'_, dyn Storage + Send + 'static>> {
    storage.lock().map_err(|_| StorageError::Poisoned)
}

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(ShelfError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> Result<SqliteStorage, ShelfError> {
    SqliteStorage::new(path)
}

/// A stored traversal cursor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRow {
    pub key: String,
    /// `None` records that the traversal reached its last page
    pub value: Option<String>,
    pub updated_at: String,
}

/// Sort orders supported by [`BookQuery`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookSort {
    /// Highest rating first
    Rating,
    /// Cheapest (including tax) first
    Price,
    /// Most reviewed first
    Reviews,
    /// Most recently crawled first
    Recent,
}

impl BookSort {
    pub fn order_by(&self) -> &'static str {
        match self {
            Self::Rating => "rating DESC, id ASC",
            Self::Price => "price_including_tax ASC, id ASC",
            Self::Reviews => "num_reviews DESC, id ASC",
            Self::Recent => "crawl_timestamp DESC, id DESC",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "rating" => Some(Self::Rating),
            "price" => Some(Self::Price),
            "reviews" => Some(Self::Reviews),
            "recent" => Some(Self::Recent),
            _ => None,
        }
    }
}

/// Filter and paging options for listing books
#[derive(Debug, Clone, PartialEq)]
pub struct BookQuery {
    pub category: Option<String>,
    /// Inclusive lower bound on the including-tax price
    pub min_price: Option<f64>,
    /// Inclusive upper bound on the including-tax price
    pub max_price: Option<f64>,
    pub rating: Option<u8>,
    pub sort: Option<BookSort>,
    pub limit: u32,
    pub skip: u32,
}

impl Default for BookQuery {
    fn default() -> Self {
        Self {
            category: None,
            min_price: None,
            max_price: None,
            rating: None,
            sort: None,
            limit: 20,
            skip: 0,
        }
    }
}
