//! Per-run change reports
//!
//! A run that changed at least one book writes two files side by side:
//! `changes_<timestamp>.json` with the full events and
//! `changes_<timestamp>.csv` with one summary row per event.

use crate::catalog::ChangeEvent;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Files written for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    pub json: PathBuf,
    pub csv: PathBuf,
}

/// One CSV line
#[derive(Debug, Serialize)]
struct ChangeRow<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    source_url: &'a str,
    name: &'a str,
    previous_hash: Option<&'a str>,
    new_hash: &'a str,
}

impl<'a> From<&'a ChangeEvent> for ChangeRow<'a> {
    fn from(event: &'a ChangeEvent) -> Self {
        Self {
            kind: event.kind(),
            source_url: event.source_url(),
            name: event.book().name(),
            previous_hash: event.previous().map(|p| p.raw_html_hash.as_str()),
            new_hash: &event.book().raw_html_hash,
        }
    }
}

/// Writes the JSON and CSV reports for a run
///
/// # Arguments
///
/// * `dir` - Report directory, created if missing
/// * `events` - The run's change events
/// * `at` - Timestamp used in the file names
///
/// # Returns
///
/// * `Ok(Some(ReportPaths))` - Both files were written
/// * `Ok(None)` - There were no changes, nothing was written
/// * `Err(ShelfError)` - A file could not be written
pub fn write_change_report(
    dir: &Path,
    events: &[ChangeEvent],
    at: DateTime<Utc>,
) -> Result<Option<ReportPaths>> {
    if events.is_empty() {
        tracing::info!("No changes detected, skipping report");
        return Ok(None);
    }

    fs::create_dir_all(dir)?;
    let stamp = at.format("%Y%m%d_%H%M%S");
    let paths = ReportPaths {
        json: dir.join(format!("changes_{}.json", stamp)),
        csv: dir.join(format!("changes_{}.csv", stamp)),
    };

    let json = BufWriter::new(File::create(&paths.json)?);
    serde_json::to_writer_pretty(json, events)?;

    let mut csv = csv::Writer::from_path(&paths.csv)?;
    for event in events {
        csv.serialize(ChangeRow::from(event))?;
    }
    csv.flush()?;

    tracing::info!(
        "Change report written: {} and {}",
        paths.json.display(),
        paths.csv.display()
    );
    Ok(Some(paths))
}
