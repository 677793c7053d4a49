//! Ripple-Frontier main entry point
//!
//! This is the command-line interface for running an embedded crawl on top of
//! the frontier, or inspecting a frontier database.

use anyhow::Context;
use clap::Parser;
use ripple_frontier::config::{load_config_with_hash, Config};
use ripple_frontier::crawler::run_crawl;
use ripple_frontier::storage::{open_backend, OrderingPolicy};
use ripple_frontier::UrlState;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Ripple-Frontier: a crawl frontier with an embedded downloader
///
/// Seeds the configured URLs and crawls until the frontier is exhausted,
/// the request limit is reached, or Ctrl-C is pressed.
#[derive(Parser, Debug)]
#[command(name = "ripple-frontier")]
#[command(version)]
#[command(about = "A crawl frontier with an embedded downloader", long_about = None)]
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

    /// Wipe stored records before crawling
    #[arg(long)]
    fresh: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long, conflicts_with_all = ["stats", "fresh"])]
    dry_run: bool,

    /// Show record counts from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "fresh"])]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("invalid configuration {}", cli.config.display()))?;
    tracing::info!("Configuration loaded (hash: {})", hash);

    if cli.dry_run {
        print_dry_run(&config);
    } else if cli.stats {
        print_stats(&config)?;
    } else {
        if cli.fresh {
            config.storage.clear_content = true;
        }
        crawl(config).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("ripple_frontier=info,warn"),
            1 => EnvFilter::new("ripple_frontier=debug,info"),
            2 => EnvFilter::new("ripple_frontier=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn print_dry_run(config: &Config) {
    println!("=== Ripple-Frontier Dry Run ===\n");

    println!("Frontier:");
    println!("  Policy: {}", config.frontier.policy);
    println!("  Batch size: {}", config.frontier.max_next_requests);
    match config.frontier.max_requests {
        0 => println!("  Request limit: none"),
        n => println!("  Request limit: {}", n),
    }
    println!("  Slot key: {}", config.frontier.key_type);
    println!("  Overused buffer: {}", config.frontier.use_overused_buffer);

    println!("\nStorage:");
    println!("  Database: {}", config.storage.database_path.display());
    println!("  Clear on start: {}", config.storage.clear_content);

    println!("\nDownloader:");
    println!("  User agent: {}", config.crawler.user_agent);
    println!("  Concurrent requests: {}", config.crawler.concurrent_requests);
    println!("  Per-slot concurrency: {}", config.crawler.per_slot_concurrency);

    println!("\nSeeds ({}):", config.crawler.seeds.len());
    for seed in &config.crawler.seeds {
        println!("  - {}", seed);
    }

    if config.frontier.policy == OrderingPolicy::Score {
        println!("\nNote: the score policy only orders records a strategy has scored");
    }
    println!("\nConfiguration is valid");
}

fn print_stats(config: &Config) -> anyhow::Result<()> {
    let backend = open_backend(config)
        .with_context(|| format!("cannot open {}", config.storage.database_path.display()))?;
    let counts = backend.count_by_state()?;

    println!("Database: {}\n", config.storage.database_path.display());
    for state in UrlState::all_states() {
        println!("  {:<12} {}", state.to_db_string(), counts.get(&state).copied().unwrap_or(0));
    }
    println!("  {:<12} {}", "TOTAL", backend.count_records()?);
    Ok(())
}

async fn crawl(config: Config) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, finishing in-flight requests");
            on_signal.cancel();
        }
    });

    tracing::info!(seeds = config.crawler.seeds.len(), "Starting crawl");
    let stats = run_crawl(&config, cancel).await.context("crawl failed")?;
    tracing::info!(
        fetched = stats.fetched,
        failed = stats.failed,
        links = stats.links,
        "Crawl complete"
    );
    Ok(())
}
