//! Catalogue records and change detection
//!
//! This module defines the records the crawler persists and the engine that
//! decides, for every fetched detail page, whether the book is new, changed,
//! or unchanged:
//! - `ParsedBook`: the fixed output of the detail-page parser
//! - `BookRecord`: the single live record per `source_url`
//! - `HistoryEntry`: an immutable copy of a record taken just before it changed
//! - `RawSnapshot`: the gzip-compressed bytes of one fetch
//! - `ChangeEvent`: the transient result of one upsert

mod change;
mod snapshot;
mod upsert;

pub use change::ChangeEvent;
pub use snapshot::{content_hash, gunzip_bytes, gzip_bytes};
pub use upsert::UpsertEngine;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Book price as shown on the detail page
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Price {
    pub including_tax: f64,
    pub excluding_tax: f64,
}

/// Fields extracted from one detail page
///
/// `name` and `source_url` are mandatory; every other attribute may be
/// absent on a malformed or sparse page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedBook {
    pub source_url: String,
    pub upc: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub price: Price,
    pub availability: Option<String>,
    pub num_reviews: Option<u32>,
    pub image_url: Option<String>,
    /// Star rating in 1..=5
    pub rating: Option<u8>,
}

/// The live record for one book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookRecord {
    pub id: i64,
    #[serde(flatten)]
    pub book: ParsedBook,
    pub crawl_timestamp: DateTime<Utc>,
    pub raw_html_hash: String,
    pub raw_html_snapshot_id: i64,
    /// Set once the record has been overwritten by a changed fetch
    pub has_changed: bool,
}

impl BookRecord {
    pub fn source_url(&self) -> &str {
        &self.book.source_url
    }

    pub fn name(&self) -> &str {
        &self.book.name
    }
}

/// Prior state of a book, captured at the moment it was about to change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub book_id: i64,
    pub previous: BookRecord,
    pub ts: DateTime<Utc>,
}

/// Archived copy of one fetched page
#[derive(Debug, Clone, PartialEq)]
pub struct RawSnapshot {
    pub id: i64,
    pub url: String,
    pub html_gzip: Vec<u8>,
    pub ts: DateTime<Utc>,
}

impl RawSnapshot {
    /// Returns the original page bytes
    pub fn decompress(&self) -> std::io::Result<Vec<u8>> {
        gunzip_bytes(&self.html_gzip)
    }
}

/// Current time at the precision the store keeps (microseconds)
///
/// Timestamps are truncated up front so a record read back from the store
/// compares equal to the one that was written.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
