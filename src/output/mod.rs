//! Output module for store statistics and crawl reports
//!
//! This module handles:
//! - Summarizing the content store for the `--stats` view
//! - Writing per-run change reports as JSON and CSV
//! - Printing the end-of-run summary

mod report;
pub mod stats;

pub use report::{write_change_report, ReportPaths};
pub use stats::{load_statistics, print_statistics, StoreStatistics};

use crate::crawler::{CrawlReport, Termination};

/// Prints the end-of-run summary to stdout
pub fn print_run_summary(report: &CrawlReport) {
    let elapsed = report.finished_at - report.started_at;

    println!("=== Crawl Summary ===\n");
    println!("  Outcome: {}", describe_termination(&report.termination));
    println!("  Listing pages processed: {}", report.pages_processed);
    println!("  Book pages visited: {}", report.visited);
    println!("  New books: {}", report.new_count());
    println!("  Updated books: {}", report.updated_count());
    println!("  Duration: {:.1}s", elapsed.num_milliseconds() as f64 / 1000.0);

    if !report.events.is_empty() {
        println!();
        println!("Changes:");
        for event in &report.events {
            println!("  [{}] {}", event.kind(), event.book().name());
        }
    }
}

fn describe_termination(termination: &Termination) -> String {
    match termination {
        Termination::Completed => "completed, no further listing pages".to_string(),
        Termination::Stopped => "stopped on request".to_string(),
        Termination::AlreadyFinished => "nothing to resume, traversal already finished".to_string(),
        Termination::ListingUnavailable { url } => format!("listing page unavailable: {}", url),
        Termination::ListingParseFailed { url, reason } => {
            format!("listing page {} could not be parsed: {}", url, reason)
        }
    }
}
