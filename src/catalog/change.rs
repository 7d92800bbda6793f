use crate::catalog::BookRecord;
use serde::Serialize;

/// Outcome of an upsert that changed the store
///
/// Unchanged fetches produce no event at all.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChangeEvent {
    /// First time this `source_url` was seen
    New { book: BookRecord },

    /// The page content changed; `previous` is the record that was replaced
    Updated {
        book: BookRecord,
        previous: BookRecord,
    },
}

impl ChangeEvent {
    /// Short tag used in logs and reports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::New { .. } => "new",
            Self::Updated { .. } => "updated",
        }
    }

    /// The record as it stands after the upsert
    pub fn book(&self) -> &BookRecord {
        match self {
            Self::New { book } | Self::Updated { book, .. } => book,
        }
    }

    pub fn previous(&self) -> Option<&BookRecord> {
        match self {
            Self::New { .. } => None,
            Self::Updated { previous, .. } => Some(previous),
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::New { .. })
    }

    pub fn source_url(&self) -> &str {
        self.book().source_url()
    }
}
