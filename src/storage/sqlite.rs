//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::catalog::{BookRecord, HistoryEntry, ParsedBook, Price, RawSnapshot};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{BookQuery, CheckpointRow};
use crate::ShelfError;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;

const BOOK_COLUMNS: &str = "id, source_url, upc, name, description, category, \
     price_including_tax, price_excluding_tax, availability, num_reviews, image_url, rating, \
     crawl_timestamp, raw_html_hash, raw_html_snapshot_id, has_changed";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(ShelfError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, ShelfError> {
        let conn = init_database(path).map_err(StorageError::from)?;
        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> Result<Self, ShelfError> {
        let conn = Connection::open_in_memory().map_err(StorageError::from)?;
        initialize_schema(&conn).map_err(StorageError::from)?;
        Ok(Self { conn })
    }
}

fn ts_to_sql(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn ts_from_sql(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn book_from_row(row: &Row<'_>) -> rusqlite::Result<BookRecord> {
    Ok(BookRecord {
        id: row.get(0)?,
        book: ParsedBook {
            source_url: row.get(1)?,
            upc: row.get(2)?,
            name: row.get(3)?,
            description: row.get(4)?,
            category: row.get(5)?,
            price: Price {
                including_tax: row.get(6)?,
                excluding_tax: row.get(7)?,
            },
            availability: row.get(8)?,
            num_reviews: row.get(9)?,
            image_url: row.get(10)?,
            rating: row.get(11)?,
        },
        crawl_timestamp: ts_from_sql(12, &row.get::<_, String>(12)?)?,
        raw_html_hash: row.get(13)?,
        raw_html_snapshot_id: row.get(14)?,
        has_changed: row.get(15)?,
    })
}

fn history_from_row(row: &Row<'_>) -> rusqlite::Result<HistoryEntry> {
    let previous: String = row.get(2)?;
    let previous: BookRecord = serde_json::from_str(&previous)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;

    Ok(HistoryEntry {
        id: row.get(0)?,
        book_id: row.get(1)?,
        previous,
        ts: ts_from_sql(3, &row.get::<_, String>(3)?)?,
    })
}

/// Maps unique-index violations to a dedicated error so callers can tell a
/// racing duplicate apart from a broken database
fn map_constraint(err: rusqlite::Error, source_url: &str) -> StorageError {
    if let rusqlite::Error::SqliteFailure(failure, message) = &err {
        if failure.code == rusqlite::ErrorCode::ConstraintViolation {
            return StorageError::ConstraintViolation(format!(
                "{}: {}",
                source_url,
                message.as_deref().unwrap_or("constraint failed")
            ));
        }
    }
    StorageError::Sqlite(err)
}

impl Storage for SqliteStorage {
    // ===== Books =====

    fn find_book_by_url(&self, source_url: &str) -> StorageResult<Option<BookRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM books WHERE source_url = ?1",
            BOOK_COLUMNS
        ))?;

        let book = stmt
            .query_row(params![source_url], book_from_row)
            .optional()?;

        Ok(book)
    }

    fn get_book(&self, book_id: i64) -> StorageResult<BookRecord> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM books WHERE id = ?1", BOOK_COLUMNS))?;

        stmt.query_row(params![book_id], book_from_row)
            .optional()?
            .ok_or(StorageError::BookNotFound(book_id))
    }

    fn insert_book(&mut self, record: &BookRecord) -> StorageResult<i64> {
        let book = &record.book;
        self.conn
            .execute(
                "INSERT INTO books (source_url, upc, name, description, category,
                 price_including_tax, price_excluding_tax, availability, num_reviews, image_url,
                 rating, crawl_timestamp, raw_html_hash, raw_html_snapshot_id, has_changed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    book.source_url,
                    book.upc,
                    book.name,
                    book.description,
                    book.category,
                    book.price.including_tax,
                    book.price.excluding_tax,
                    book.availability,
                    book.num_reviews,
                    book.image_url,
                    book.rating,
                    ts_to_sql(&record.crawl_timestamp),
                    record.raw_html_hash,
                    record.raw_html_snapshot_id,
                    record.has_changed,
                ],
            )
            .map_err(|e| map_constraint(e, &book.source_url))?;

        Ok(self.conn.last_insert_rowid())
    }

    fn update_book(&mut self, record: &BookRecord) -> StorageResult<()> {
        let book = &record.book;
        let updated = self
            .conn
            .execute(
                "UPDATE books SET source_url = ?1, upc = ?2, name = ?3, description = ?4,
                 category = ?5, price_including_tax = ?6, price_excluding_tax = ?7,
                 availability = ?8, num_reviews = ?9, image_url = ?10, rating = ?11,
                 crawl_timestamp = ?12, raw_html_hash = ?13, raw_html_snapshot_id = ?14,
                 has_changed = ?15
                 WHERE id = ?16",
                params![
                    book.source_url,
                    book.upc,
                    book.name,
                    book.description,
                    book.category,
                    book.price.including_tax,
                    book.price.excluding_tax,
                    book.availability,
                    book.num_reviews,
                    book.image_url,
                    book.rating,
                    ts_to_sql(&record.crawl_timestamp),
                    record.raw_html_hash,
                    record.raw_html_snapshot_id,
                    record.has_changed,
                    record.id,
                ],
            )
            .map_err(|e| map_constraint(e, &book.source_url))?;

        if updated == 0 {
            return Err(StorageError::BookNotFound(record.id));
        }
        Ok(())
    }

    fn list_books(&self, query: &BookQuery) -> StorageResult<Vec<BookRecord>> {
        let mut clauses = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(category) = &query.category {
            values.push(Value::Text(category.clone()));
            clauses.push(format!("category = ?{}", values.len()));
        }
        if let Some(rating) = query.rating {
            values.push(Value::Integer(i64::from(rating)));
            clauses.push(format!("rating = ?{}", values.len()));
        }
        if let Some(min_price) = query.min_price {
            values.push(Value::Real(min_price));
            clauses.push(format!("price_including_tax >= ?{}", values.len()));
        }
        if let Some(max_price) = query.max_price {
            values.push(Value::Real(max_price));
            clauses.push(format!("price_including_tax <= ?{}", values.len()));
        }

        let mut sql = format!("SELECT {} FROM books", BOOK_COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        let order_by = query.sort.map(|s| s.order_by()).unwrap_or("id ASC");
        values.push(Value::Integer(i64::from(query.limit)));
        values.push(Value::Integer(i64::from(query.skip)));
        sql.push_str(&format!(
            " ORDER BY {} LIMIT ?{} OFFSET ?{}",
            order_by,
            values.len() - 1,
            values.len()
        ));

        let mut stmt = self.conn.prepare(&sql)?;
        let books = stmt
            .query_map(params_from_iter(values.iter()), book_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(books)
    }

    fn count_books(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM books", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn purge_books(&mut self) -> StorageResult<u64> {
        let removed = self.conn.execute("DELETE FROM books", [])?;
        Ok(removed as u64)
    }

    // ===== History =====

    fn insert_history(
        &mut self,
        book_id: i64,
        previous: &BookRecord,
        ts: DateTime<Utc>,
    ) -> StorageResult<i64> {
        let payload = serde_json::to_string(previous)?;
        self.conn.execute(
            "INSERT INTO book_history (book_id, previous, ts) VALUES (?1, ?2, ?3)",
            params![book_id, payload, ts_to_sql(&ts)],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn history_for_book(&self, book_id: i64) -> StorageResult<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, book_id, previous, ts FROM book_history
             WHERE book_id = ?1 ORDER BY ts DESC, id DESC",
        )?;

        let entries = stmt
            .query_map(params![book_id], history_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    fn recent_history(&self, limit: u32, skip: u32) -> StorageResult<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, book_id, previous, ts FROM book_history
             ORDER BY ts DESC, id DESC LIMIT ?1 OFFSET ?2",
        )?;

        let entries = stmt
            .query_map(params![limit, skip], history_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    fn count_history(&self) -> StorageResult<u64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM book_history", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ===== Snapshots =====

    fn insert_snapshot(
        &mut self,
        url: &str,
        html_gzip: &[u8],
        ts: DateTime<Utc>,
    ) -> StorageResult<i64> {
        self.conn.execute(
            "INSERT INTO html_snapshots (url, html_gzip, ts) VALUES (?1, ?2, ?3)",
            params![url, html_gzip, ts_to_sql(&ts)],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_snapshot(&self, snapshot_id: i64) -> StorageResult<RawSnapshot> {
        self.conn
            .query_row(
                "SELECT id, url, html_gzip, ts FROM html_snapshots WHERE id = ?1",
                params![snapshot_id],
                |row| {
                    Ok(RawSnapshot {
                        id: row.get(0)?,
                        url: row.get(1)?,
                        html_gzip: row.get(2)?,
                        ts: ts_from_sql(3, &row.get::<_, String>(3)?)?,
                    })
                },
            )
            .optional()?
            .ok_or(StorageError::SnapshotNotFound(snapshot_id))
    }

    fn count_snapshots(&self) -> StorageResult<u64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM html_snapshots", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_snapshots_for_url(&self, url: &str) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM html_snapshots WHERE url = ?1",
            params![url],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ===== Checkpoints =====

    fn load_checkpoint(&self, key: &str) -> StorageResult<Option<CheckpointRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT key, value, updated_at FROM checkpoints WHERE key = ?1",
                params![key],
                |row| {
                    Ok(CheckpointRow {
                        key: row.get(0)?,
                        value: row.get(1)?,
                        updated_at: row.get(2)?,
                    })
                },
            )
            .optional()?;

        Ok(row)
    }

    fn save_checkpoint(&mut self, key: &str, value: Option<&str>) -> StorageResult<()> {
        // Rewriting the same value leaves the row untouched
        self.conn.execute(
            "INSERT INTO checkpoints (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
             WHERE checkpoints.value IS NOT excluded.value",
            params![key, value, ts_to_sql(&Utc::now())],
        )?;
        Ok(())
    }
}

/// Initializes or opens a database at the given path
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(Connection)` - Successfully opened/created database
/// * `Err(rusqlite::Error)` - Failed to open database
pub fn init_database(path: &Path) -> Result<Connection, rusqlite::Error> {
    let conn = Connection::open(path)?;

    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA temp_store = MEMORY;
    ",
    )?;

    initialize_schema(&conn)?;

    Ok(conn)
}
