//! invitro-harvest - Invitro analysis catalogue scraper
//!
//! Reads a list of regions and writes one table of analyses per region.

use anyhow::Result;
use clap::{Parser, Subcommand};
use invitro_harvest::commands::{HarvestCommand, SlugsCommand};
use invitro_harvest::config::{Config, OutputFormat};
use invitro_harvest::error::is_cancelled;
use invitro_harvest::format::WorkbookSink;
use invitro_harvest::input::read_region_list;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Exit status after an interrupt.
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(
    name = "invitro-harvest",
    version,
    about = "Scrape Invitro analyses per region into tables",
    long_about = "Collects analysis names, codes, turnaround times and prices from invitro.ru \
                  for every region in a list, writing one table per region."
)]
struct Cli {
    /// Maximum concurrent requests
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    /// Attempts per URL on transient errors
    #[arg(long, global = true)]
    retries: Option<u32>,

    /// Timeout of a single request in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Base backoff seconds between retries
    #[arg(long, global = true)]
    backoff: Option<f64>,

    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format (xlsx, csv, json, markdown, table)
    #[arg(short, long, global = true)]
    format: Option<OutputFormat>,

    /// Region slug cache file
    #[arg(long, global = true)]
    cache: Option<PathBuf>,

    /// Proxy URL (e.g., socks5://host:port)
    #[arg(long, global = true, env = "INVITRO_PROXY")]
    proxy: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape every region listed in a file
    #[command(alias = "h")]
    Harvest {
        /// File with one region name per line
        #[arg(long, default_value = "cities.txt")]
        cities: PathBuf,

        /// Output path (a directory for csv, a file otherwise; stdout if omitted, results.xlsx for xlsx)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Max analyses per region (0 = all)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show known region slugs and refresh the cache
    Slugs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new(Level::DEBUG.to_string())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,invitro_harvest=info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load config with layered overrides
    let mut config = Config::load(cli.config.as_deref())?.with_env();

    // Apply CLI overrides
    if let Some(workers) = cli.workers {
        config.max_concurrent_fetches = workers;
    }
    if let Some(retries) = cli.retries {
        config.retries = retries;
    }
    if let Some(timeout) = cli.timeout {
        config.timeout_secs = timeout;
    }
    if let Some(backoff) = cli.backoff {
        config.backoff_secs = backoff;
    }
    if let Some(format) = cli.format {
        config.format = format;
    }
    if let Some(cache) = cli.cache {
        config.cache_path = cache;
    }
    if let Some(proxy) = cli.proxy {
        config.proxy = Some(proxy);
    }

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping");
            trigger.cancel();
        }
    });

    let result = match cli.command {
        Commands::Harvest { cities, output, limit } => {
            if let Some(limit) = limit {
                config.per_region_link_limit = limit;
            }
            config.validate()?;

            let regions = read_region_list(&cities)?;
            if regions.is_empty() {
                warn!("No regions listed in {}", cities.display());
            }
            info!("Loaded {} regions from {}", regions.len(), cities.display());

            let mut sink = WorkbookSink::new(config.format, output)?;
            let cmd = HarvestCommand::new(config);

            cmd.execute(&regions, &mut sink, cancel)
                .await
                .map(|summary| summary.log(&sink.destination()))
        }

        Commands::Slugs => {
            config.validate()?;

            let cmd = SlugsCommand::new(config);
            cmd.execute(cancel).await.map(|output| println!("{}", output))
        }
    };

    match result {
        Err(e) if is_cancelled(&e) => {
            warn!("Interrupted; finished regions and the slug cache were saved");
            std::process::exit(EXIT_INTERRUPTED);
        }
        other => other,
    }
}
