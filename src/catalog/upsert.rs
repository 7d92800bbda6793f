//! Change detection and upsert
//!
//! For every fetched detail page the engine:
//! 1. Hashes the raw bytes (SHA-256)
//! 2. Looks up the live record by `source_url`
//! 3. Archives the raw bytes as a new snapshot, whatever the outcome
//! 4. Inserts, updates (after writing a history entry), or leaves the record alone
//!
//! The snapshot, history and record writes are separate single-row writes.
//! A crash between them can leave an orphaned snapshot or a history entry
//! without the matching update; the next crawl of the page reconciles it.

use crate::catalog::{content_hash, gzip_bytes, now_utc, BookRecord, ChangeEvent, ParsedBook};
use crate::storage::{lock, SharedStorage, StorageResult};

/// Decides insert vs. update vs. no-op for freshly parsed books
#[derive(Clone)]
pub struct UpsertEngine {
    storage: SharedStorage,
}

impl UpsertEngine {
    pub fn new(storage: SharedStorage) -> Self {
        Self { storage }
    }

    /// Applies one fetched page to the store
    ///
    /// # Arguments
    ///
    /// * `parsed` - Fields extracted from the detail page
    /// * `raw` - The exact bytes that were fetched
    ///
    /// # Returns
    ///
    /// * `Ok(Some(ChangeEvent::New))` - First sighting of this `source_url`
    /// * `Ok(Some(ChangeEvent::Updated))` - Content hash differs from the stored one
    /// * `Ok(None)` - Content unchanged; only the snapshot was written
    /// * `Err(StorageError)` - A write was rejected
    pub fn upsert(&self, parsed: &ParsedBook, raw: &[u8]) -> StorageResult<Option<ChangeEvent>> {
        let hash = content_hash(raw);
        let compressed = gzip_bytes(raw)?;
        let now = now_utc();

        // One lock for the whole decision so two tasks racing on the same
        // URL cannot both take the insert branch
        let mut store = lock(&self.storage)?;

        let existing = store.find_book_by_url(&parsed.source_url)?;
        let snapshot_id = store.insert_snapshot(&parsed.source_url, &compressed, now)?;

        let mut record = BookRecord {
            id: 0,
            book: parsed.clone(),
            crawl_timestamp: now,
            raw_html_hash: hash,
            raw_html_snapshot_id: snapshot_id,
            has_changed: false,
        };

        match existing {
            None => {
                record.id = store.insert_book(&record)?;
                tracing::info!("Inserted new book: {}", record.name());
                Ok(Some(ChangeEvent::New { book: record }))
            }
            Some(previous) if previous.raw_html_hash != record.raw_html_hash => {
                store.insert_history(previous.id, &previous, now)?;

                record.id = previous.id;
                record.has_changed = true;
                store.update_book(&record)?;

                tracing::info!("Updated book: {}", record.name());
                Ok(Some(ChangeEvent::Updated {
                    book: record,
                    previous,
                }))
            }
            Some(_) => {
                tracing::debug!("Unchanged: {}", parsed.source_url);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{fixtures, gunzip_bytes};
    use crate::storage::{shared, SqliteStorage};

    fn engine() -> (UpsertEngine, SharedStorage) {
        let storage = shared(SqliteStorage::new_in_memory().unwrap());
        (UpsertEngine::new(storage.clone()), storage)
    }

    #[test]
    fn test_first_upsert_is_new() {
        let (engine, storage) = engine();
        let parsed = fixtures::parsed_book("https://example.com/a", "A", 10.0);

        let event = engine.upsert(&parsed, b"<html>a</html>").unwrap().unwrap();
        assert!(event.is_new());
        assert_eq!(event.book().book, parsed);
        assert_eq!(event.book().raw_html_hash, content_hash(b"<html>a</html>"));
        assert!(!event.book().has_changed);

        let store = lock(&storage).unwrap();
        let stored = store.find_book_by_url("https://example.com/a").unwrap().unwrap();
        assert_eq!(&stored, event.book());
        assert_eq!(store.count_snapshots().unwrap(), 1);
        assert_eq!(store.count_history().unwrap(), 0);
    }

    #[test]
    fn test_same_bytes_twice_is_new_then_none() {
        let (engine, storage) = engine();
        let parsed = fixtures::parsed_book("https://example.com/a", "A", 10.0);

        let first = engine.upsert(&parsed, b"<html>a</html>").unwrap();
        let second = engine.upsert(&parsed, b"<html>a</html>").unwrap();

        assert!(first.unwrap().is_new());
        assert!(second.is_none());

        let store = lock(&storage).unwrap();
        assert_eq!(store.count_books().unwrap(), 1);
        assert_eq!(store.count_history().unwrap(), 0);
        // Unchanged fetches are still archived
        assert_eq!(store.count_snapshots().unwrap(), 2);
    }

    #[test]
    fn test_unchanged_record_is_not_rewritten() {
        let (engine, storage) = engine();
        let parsed = fixtures::parsed_book("https://example.com/a", "A", 10.0);

        let first = engine.upsert(&parsed, b"<html>a</html>").unwrap().unwrap();
        engine.upsert(&parsed, b"<html>a</html>").unwrap();

        let store = lock(&storage).unwrap();
        let stored = store.find_book_by_url("https://example.com/a").unwrap().unwrap();
        assert_eq!(&stored, first.book());
    }

    #[test]
    fn test_changed_bytes_write_one_history_entry() {
        let (engine, storage) = engine();
        let before = fixtures::parsed_book("https://example.com/a", "A", 10.0);
        let after = fixtures::parsed_book("https://example.com/a", "A", 12.0);

        let first = engine.upsert(&before, b"<p>10.00</p>").unwrap().unwrap();
        let second = engine.upsert(&after, b"<p>12.00</p>").unwrap().unwrap();

        match &second {
            ChangeEvent::Updated { book, previous } => {
                assert_eq!(previous, first.book());
                assert_eq!(book.id, previous.id);
                assert_eq!(book.book.price.including_tax, 12.0);
                assert!(book.has_changed);
                assert_ne!(book.raw_html_snapshot_id, previous.raw_html_snapshot_id);
            }
            other => panic!("expected update, got {other:?}"),
        }

        let store = lock(&storage).unwrap();
        let history = store.history_for_book(first.book().id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(&history[0].previous, first.book());

        let live = store.get_book(first.book().id).unwrap();
        assert_eq!(&live, second.book());
    }

    #[test]
    fn test_snapshot_reference_points_at_latest_fetch() {
        let (engine, storage) = engine();
        let parsed = fixtures::parsed_book("https://example.com/a", "A", 10.0);

        let event = engine.upsert(&parsed, b"<html>raw</html>").unwrap().unwrap();

        let store = lock(&storage).unwrap();
        let snapshot = store
            .get_snapshot(event.book().raw_html_snapshot_id)
            .unwrap();
        assert_eq!(snapshot.url, "https://example.com/a");
        assert_eq!(gunzip_bytes(&snapshot.html_gzip).unwrap(), b"<html>raw</html>");
    }
}
