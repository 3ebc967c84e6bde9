//! # farmhand CLI
//!
//! The `farmhand` binary crawls the Stardew Valley wiki, builds the
//! retrieval index, answers planning questions from the terminal, and
//! serves the chat API.
//!
//! ## Usage
//!
//! ```bash
//! farmhand --config ./config/farmhand.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `farmhand init` | Create the SQLite database and schema |
//! | `farmhand crawl` | BFS-crawl the wiki into the pages file |
//! | `farmhand index` | Chunk, embed and store the crawled pages |
//! | `farmhand search "<query>"` | Print the nearest chunks |
//! | `farmhand plan <crop> <target> <season>` | Compute a crop plan |
//! | `farmhand status` | Show index statistics |
//! | `farmhand serve` | Start the HTTP chat API |
//!
//! ## Examples
//!
//! ```bash
//! farmhand crawl --max-pages 50
//! farmhand index --rebuild
//! farmhand search "when do parsnips grow" --limit 3
//! farmhand plan Wheat 1000 summer
//! farmhand serve
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use farmhand::config;
use farmhand::crawl;
use farmhand::ingest;
use farmhand::migrate;
use farmhand::progress::ProgressMode;
use farmhand::search;
use farmhand::server;
use farmhand::stats;
use farmhand_core::models::SourceType;

/// farmhand: a Stardew Valley game-help assistant.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/farmhand.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "farmhand",
    about = "farmhand: Stardew Valley wiki crawler, retrieval index, crop planner and chat API",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/farmhand.toml")]
    config: PathBuf,

    /// Progress output on stderr: `off`, `human` or `json`.
    /// Defaults to `human` on a terminal and `off` otherwise.
    #[arg(long, global = true, value_parser = parse_progress)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Crawl the wiki breadth-first and write the pages file.
    ///
    /// Skips the crawl when the pages file already exists unless
    /// `--force` is given.
    Crawl {
        /// Stop after this many pages (overrides `crawl.max_pages`).
        #[arg(long)]
        max_pages: Option<usize>,

        /// Re-crawl even if the pages file exists.
        #[arg(long)]
        force: bool,

        /// Write pages here instead of `crawl.output`.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Chunk, embed and store crawled pages.
    Index {
        /// Replace the whole index instead of upserting.
        #[arg(long)]
        rebuild: bool,

        /// Read pages from this file instead of `crawl.output`.
        #[arg(long)]
        pages: Option<PathBuf>,
    },

    /// Search the index.
    Search {
        query: String,

        /// Maximum number of results (defaults to `retrieval.top_k`).
        #[arg(long)]
        limit: Option<usize>,

        /// Only `text` or only `table` chunks.
        #[arg(long)]
        source_type: Option<SourceType>,
    },

    /// Plan how many plants are needed for a target harvest.
    Plan {
        /// Crop name, e.g. `Wheat`.
        crop: String,
        /// Number of crops to harvest over the season.
        target: u32,
        /// `spring`, `summer`, `fall` or `winter`.
        season: String,
    },

    /// Show index statistics.
    Status,

    /// Start the HTTP chat API on `[server].bind`.
    Serve,
}

fn parse_progress(s: &str) -> Result<ProgressMode, String> {
    match s {
        "off" => Ok(ProgressMode::Off),
        "human" => Ok(ProgressMode::Human),
        "json" => Ok(ProgressMode::Json),
        other => Err(format!(
            "invalid progress mode '{}': use off, human or json",
            other
        )),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,farmhand=info,sqlx=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;
    let progress = cli
        .progress
        .unwrap_or_else(ProgressMode::default_for_tty)
        .reporter();

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Crawl {
            max_pages,
            force,
            output,
        } => {
            crawl::run_crawl(&cfg, max_pages, output.as_deref(), force, progress.as_ref())
                .await?;
        }
        Commands::Index { rebuild, pages } => {
            ingest::run_index(&cfg, rebuild, pages.as_deref(), progress.as_ref()).await?;
        }
        Commands::Search {
            query,
            limit,
            source_type,
        } => {
            search::run_search(&cfg, &query, limit, source_type).await?;
        }
        Commands::Plan {
            crop,
            target,
            season,
        } => {
            search::run_plan(&cfg, &crop, target, &season).await?;
        }
        Commands::Status => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
