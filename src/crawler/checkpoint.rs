//! Listing traversal checkpoints
//!
//! The traversal cursor is a single row keyed `listing_last` holding the next
//! listing page to fetch. A saved `None` marks the traversal as finished so a
//! later resume terminates instead of starting over.

use crate::config::CrawlerConfig;
use crate::storage::{lock, SharedStorage, StorageResult};
use url::Url;

/// Store key for the listing cursor
pub const LISTING_CHECKPOINT_KEY: &str = "listing_last";

/// Where the listing pages live on the catalogue site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Traversal {
    start: Url,
    base: Url,
    first_page: Url,
}

impl Traversal {
    /// Builds the traversal from the crawler configuration
    ///
    /// The start URL and catalogue path are treated as directories, so
    /// `https://host/shop` with `catalogue` yields `https://host/shop/catalogue/`.
    pub fn from_config(config: &CrawlerConfig) -> Result<Self, url::ParseError> {
        let start = Url::parse(&as_directory(&config.start_url))?;
        let base = start.join(&as_directory(&config.catalogue_path))?;
        let first_page = base.join(&config.first_page)?;
        Ok(Self {
            start,
            base,
            first_page,
        })
    }

    /// The configured start URL
    pub fn start(&self) -> &Url {
        &self.start
    }

    /// The directory holding the listing pages
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Where a new pass begins
    pub fn first_page(&self) -> &Url {
        &self.first_page
    }

    /// Whether a URL lies under the listing path
    pub fn contains(&self, url: &Url) -> bool {
        url.path().contains(self.base.path())
    }

    /// Resolves a possibly relative listing link
    ///
    /// Links that already name the catalogue path are resolved against the
    /// start URL, anything else against the listing directory.
    pub fn resolve(&self, link: &str) -> Result<Url, url::ParseError> {
        if let Ok(absolute) = Url::parse(link) {
            return Ok(absolute);
        }

        let segment = self.base.path().trim_start_matches(self.start.path());
        let anchor = if !segment.is_empty() && link.trim_start_matches('/').starts_with(segment) {
            &self.start
        } else {
            &self.base
        };
        anchor.join(link)
    }
}

fn as_directory(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

/// What the store says about the traversal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointState {
    /// No cursor was ever saved
    NotStarted,
    /// Resume from this listing page
    At(Url),
    /// The last saved cursor was "no next page"
    Finished,
}

/// Loads and saves the listing cursor
#[derive(Clone)]
pub struct CheckpointManager {
    storage: SharedStorage,
    traversal: Traversal,
}

impl CheckpointManager {
    pub fn new(storage: SharedStorage, traversal: Traversal) -> Self {
        Self { storage, traversal }
    }

    pub fn traversal(&self) -> &Traversal {
        &self.traversal
    }

    /// Reads the cursor
    ///
    /// A stored value that is unreadable or outside the listing path is
    /// replaced by the first listing page.
    pub fn load(&self) -> StorageResult<CheckpointState> {
        let row = lock(&self.storage)?.load_checkpoint(LISTING_CHECKPOINT_KEY)?;

        let Some(row) = row else {
            return Ok(CheckpointState::NotStarted);
        };
        let Some(value) = row.value else {
            return Ok(CheckpointState::Finished);
        };

        match Url::parse(&value) {
            Ok(url) if self.traversal.contains(&url) => Ok(CheckpointState::At(url)),
            _ => {
                tracing::warn!(
                    "Checkpoint {:?} is outside {}, restarting from {}",
                    value,
                    self.traversal.base(),
                    self.traversal.first_page()
                );
                Ok(CheckpointState::At(self.traversal.first_page().clone()))
            }
        }
    }

    /// Persists the cursor, `None` meaning the traversal reached its last page
    ///
    /// Relative links are resolved before storage. Returns the stored URL.
    pub fn save(&self, next: Option<&str>) -> StorageResult<Option<Url>> {
        let resolved = next.map(|link| match self.traversal.resolve(link) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("Unresolvable next page {:?} ({}), saving first page", link, e);
                self.traversal.first_page().clone()
            }
        });

        lock(&self.storage)?
            .save_checkpoint(LISTING_CHECKPOINT_KEY, resolved.as_ref().map(Url::as_str))?;

        match &resolved {
            Some(url) => tracing::debug!("Checkpoint saved: {}", url),
            None => tracing::debug!("Checkpoint saved: traversal finished"),
        }
        Ok(resolved)
    }
}
