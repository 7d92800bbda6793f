//! Storage traits and error types
//!
//! This module defines the trait interface for content store backends and
//! associated error types.

use crate::catalog::{BookRecord, HistoryEntry, RawSnapshot};
use crate::storage::{BookQuery, CheckpointRow};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Book not found: {0}")]
    BookNotFound(i64),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(i64),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage lock poisoned")]
    Poisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for content store implementations
///
/// Every method is a single-document operation; callers that need several
/// writes to appear together serialize them through the shared store lock.
pub trait Storage {
    // ===== Books =====

    /// Looks up the live record for a source URL
    fn find_book_by_url(&self, source_url: &str) -> StorageResult<Option<BookRecord>>;

    /// Gets a book by ID
    fn get_book(&self, book_id: i64) -> StorageResult<BookRecord>;

    /// Inserts a new book, ignoring `record.id`
    ///
    /// # Returns
    ///
    /// The ID assigned to the new book. A second insert for the same
    /// `source_url` or `upc` fails with `ConstraintViolation`.
    fn insert_book(&mut self, record: &BookRecord) -> StorageResult<i64>;

    /// Overwrites every field of the book with ID `record.id`
    fn update_book(&mut self, record: &BookRecord) -> StorageResult<()>;

    /// Lists books matching a query
    fn list_books(&self, query: &BookQuery) -> StorageResult<Vec<BookRecord>>;

    /// Counts live books
    fn count_books(&self) -> StorageResult<u64>;

    /// Deletes every live book, returning how many were removed
    ///
    /// History and snapshots are left untouched.
    fn purge_books(&mut self) -> StorageResult<u64>;

    // ===== History =====

    /// Appends a history entry holding `previous` verbatim
    fn insert_history(
        &mut self,
        book_id: i64,
        previous: &BookRecord,
        ts: DateTime<Utc>,
    ) -> StorageResult<i64>;

    /// Gets the history of one book, newest first
    fn history_for_book(&self, book_id: i64) -> StorageResult<Vec<HistoryEntry>>;

    /// Gets the most recent history entries across all books
    fn recent_history(&self, limit: u32, skip: u32) -> StorageResult<Vec<HistoryEntry>>;

    /// Counts history entries
    fn count_history(&self) -> StorageResult<u64>;

    // ===== Snapshots =====

    /// Archives one fetch
    fn insert_snapshot(
        &mut self,
        url: &str,
        html_gzip: &[u8],
        ts: DateTime<Utc>,
    ) -> StorageResult<i64>;

    /// Gets a snapshot by ID
    fn get_snapshot(&self, snapshot_id: i64) -> StorageResult<RawSnapshot>;

    /// Counts all snapshots
    fn count_snapshots(&self) -> StorageResult<u64>;

    /// Counts snapshots taken of one URL
    fn count_snapshots_for_url(&self, url: &str) -> StorageResult<u64>;

    // ===== Checkpoints =====

    /// Reads the checkpoint row for a key, if one was ever saved
    fn load_checkpoint(&self, key: &str) -> StorageResult<Option<CheckpointRow>>;

    /// Inserts or replaces the checkpoint row for a key
    fn save_checkpoint(&mut self, key: &str, value: Option<&str>) -> StorageResult<()>;
}
