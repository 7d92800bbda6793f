//! Database schema definitions
//!
//! This module contains the SQL schema for the four collections of the content
//! store: books, book history, raw HTML snapshots and traversal checkpoints.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One live record per book
CREATE TABLE IF NOT EXISTS books (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_url TEXT NOT NULL UNIQUE,
    upc TEXT,
    name TEXT NOT NULL,
    description TEXT,
    category TEXT,
    price_including_tax REAL NOT NULL,
    price_excluding_tax REAL NOT NULL,
    availability TEXT,
    num_reviews INTEGER,
    image_url TEXT,
    rating INTEGER CHECK (rating IS NULL OR rating BETWEEN 1 AND 5),
    crawl_timestamp TEXT NOT NULL,
    raw_html_hash TEXT NOT NULL,
    raw_html_snapshot_id INTEGER NOT NULL,
    has_changed INTEGER NOT NULL DEFAULT 0
);

-- Sparse uniqueness: many books may lack a UPC
CREATE UNIQUE INDEX IF NOT EXISTS idx_books_upc ON books(upc) WHERE upc IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_books_category ON books(category);
CREATE INDEX IF NOT EXISTS idx_books_crawl_timestamp ON books(crawl_timestamp DESC);

-- Append-only prior states; entries outlive a purge of the books they describe
CREATE TABLE IF NOT EXISTS book_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    book_id INTEGER NOT NULL,
    previous TEXT NOT NULL,
    ts TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_book_history_book ON book_history(book_id);

-- Append-only archive of every fetch
CREATE TABLE IF NOT EXISTS html_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    html_gzip BLOB NOT NULL,
    ts TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_html_snapshots_url ON html_snapshots(url);

-- Traversal cursors; a NULL value means the traversal finished
CREATE TABLE IF NOT EXISTS checkpoints (
    key TEXT PRIMARY KEY,
    value TEXT,
    updated_at TEXT NOT NULL
);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
