//! Shelfscan main entry point
//!
//! This is the command-line interface for the Shelfscan catalogue crawler.

use clap::Parser;
use shelfscan::catalog::now_utc;
use shelfscan::config::{load_config_with_hash, Config};
use shelfscan::crawler::{Coordinator, CrawlController, StartMode, Traversal};
use shelfscan::output::{load_statistics, print_run_summary, print_statistics, write_change_report};
use shelfscan::storage::{lock, open_storage, shared, Storage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Shelfscan: an incremental book-catalogue crawler
///
/// Shelfscan walks a paginated book catalogue, records every book with
/// hash-based change detection, archives each fetched page, and checkpoints
/// the traversal so an interrupted crawl resumes where it stopped.
#[derive(Parser, Debug)]
#[command(name = "shelfscan")]
#[command(version = "1.0.0")]
#[command(about = "An incremental book-catalogue crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Only resume an interrupted traversal; do nothing if the last one finished
    #[arg(long, conflicts_with = "fresh")]
    resume: bool,

    /// Start from the first listing page, ignoring the checkpoint
    #[arg(long, conflicts_with = "resume")]
    fresh: bool,

    /// Validate config and show the traversal without crawling
    #[arg(long, conflicts_with_all = ["stats", "purge"])]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "purge"])]
    stats: bool,

    /// Delete every book record (history and snapshots are kept)
    #[arg(long, requires = "confirm", conflicts_with_all = ["dry_run", "stats"])]
    purge: bool,

    /// Confirm a destructive operation
    #[arg(long)]
    confirm: bool,
}

impl Cli {
    fn start_mode(&self) -> StartMode {
        if self.fresh {
            StartMode::Fresh
        } else if self.resume {
            StartMode::Resume
        } else {
            StartMode::Auto
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let config = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            cfg
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Handle different modes
    if cli.dry_run {
        handle_dry_run(&config)?;
    } else if cli.stats {
        handle_stats(&config)?;
    } else if cli.purge && cli.confirm {
        handle_purge(&config)?;
    } else {
        handle_crawl(config, cli.start_mode()).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("shelfscan=info,warn"),
            1 => EnvFilter::new("shelfscan=debug,info"),
            2 => EnvFilter::new("shelfscan=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows the traversal
fn handle_dry_run(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let traversal = Traversal::from_config(&config.crawler)?;

    println!("=== Shelfscan Dry Run ===\n");

    println!("Traversal:");
    println!("  Start URL: {}", traversal.start());
    println!("  Listing base: {}", traversal.base());
    println!("  First page: {}", traversal.first_page());

    println!("\nFetching:");
    println!("  Concurrency: {}", config.crawler.concurrency);
    println!("  Retry attempts: {}", config.crawler.retry_attempts);
    println!("  Retry backoff: {}ms (doubling)", config.crawler.retry_backoff_ms);
    println!("  Request timeout: {}s", config.crawler.request_timeout_secs);
    println!("  User agent: {}", config.user_agent.value);

    println!("\nOutput:");
    println!("  Database: {}", config.storage.database_path);
    match &config.output.report_dir {
        Some(dir) => println!("  Change reports: {}", dir),
        None => println!("  Change reports: disabled"),
    }

    println!("\n✓ Configuration is valid");
    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("Database: {}\n", config.storage.database_path);

    let storage = open_storage(Path::new(&config.storage.database_path))?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --purge mode: removes every live book record
fn handle_purge(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut storage = open_storage(Path::new(&config.storage.database_path))?;
    let removed = storage.purge_books()?;
    tracing::warn!("Purged {} book records", removed);
    println!("✓ Removed {} books from {}", removed, config.storage.database_path);

    Ok(())
}

/// Handles the main crawl operation
///
/// Ctrl-C requests a cooperative stop; the listing page in progress is
/// finished and checkpointed before the process exits.
async fn handle_crawl(config: Config, mode: StartMode) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Starting crawl ({:?}) from {}", mode, config.crawler.start_url);

    let storage = shared(open_storage(Path::new(&config.storage.database_path))?);
    let coordinator = Arc::new(Coordinator::new(&config, storage.clone())?);
    let controller = Arc::new(CrawlController::new(coordinator));

    controller.start(mode)?;

    let signals = Arc::clone(&controller);
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing the current page");
            signals.stop();
        }
    });

    let report = controller.wait().await;
    interrupt.abort();

    let report = match report? {
        Some(report) => report,
        None => return Ok(()),
    };

    print_run_summary(&report);

    if let Some(dir) = &config.output.report_dir {
        if let Some(paths) = write_change_report(Path::new(dir), &report.events, now_utc())? {
            println!("\n✓ Report written to {}", paths.json.display());
        }
    }

    let total = lock(&storage)?.count_books()?;
    tracing::info!("Catalogue now holds {} books", total);

    Ok(())
}
