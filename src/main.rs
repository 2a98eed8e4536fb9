//! # dayscope CLI
//!
//! ## Usage
//!
//! ```bash
//! dayscope --config ./config/dayscope.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dayscope init` | Create the SQLite database and run schema migrations |
//! | `dayscope ingest <FILES…>` | Upload, chunk and index report files |
//! | `dayscope retry <ID>` | Re-process a record that ended in `error` |
//! | `dayscope records` | List ingestion records |
//! | `dayscope resolve "<query>"` | Show the dates a query resolves to |
//! | `dayscope retrieve "<query>"` | Date-scoped hybrid retrieval |
//! | `dayscope dates` | List report dates present in the corpus |
//! | `dayscope stats` | Record and corpus overview |
//!
//! ## Examples
//!
//! ```bash
//! dayscope init
//! dayscope ingest reports/*.pdf
//! dayscope resolve "status unit 7 tanggal 1 dan 5 Agustus 2025"
//! dayscope retrieve "NPHR unit 3" --date 2025-03-01 --date 2025-03-02
//! dayscope retrieve "bandingkan efisiensi unit" --json
//! ```
//!
//! Logs go to stderr; set `RUST_LOG` (default `dayscope=info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use dayscope::{config, ingest, migrate, records, search, stats};

/// dayscope: date-scoped hybrid retrieval over chunked operational reports.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/dayscope.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "dayscope",
    about = "Date-scoped hybrid retrieval over chunked operational reports",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/dayscope.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the `ingestion_records`,
    /// `record_chunks` and `dense_vectors` tables. Safe to run repeatedly.
    Init,

    /// Ingest report files.
    ///
    /// Each file is copied into the upload directory, gets an ingestion
    /// record, and is chunked and indexed. Files are processed
    /// concurrently; one failing file does not stop the others.
    Ingest {
        /// Files to ingest (pdf, docx, xlsx, csv, json, txt).
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Re-process a record whose status is `error`.
    Retry {
        record_id: String,
    },

    /// List ingestion records, newest first.
    Records {
        /// Only show records with this status (uploaded, processing, ready, error).
        #[arg(long)]
        status: Option<String>,
    },

    /// Resolve the date references of a query without searching.
    Resolve {
        query: String,
    },

    /// Retrieve chunks for a query.
    ///
    /// Without `--date`, dates are resolved from the query text; "latest"
    /// and comparative questions are filled from the dates in the corpus.
    Retrieve {
        query: String,

        /// Restrict to this date (YYYY-MM-DD). Repeatable; order is kept.
        #[arg(long = "date")]
        dates: Vec<String>,

        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List report dates present in the corpus.
    Dates,

    /// Show record and corpus statistics.
    Stats,
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dayscope=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { files } => {
            ingest::run_ingest(&cfg, &files).await?;
        }
        Commands::Retry { record_id } => {
            ingest::run_retry(&cfg, &record_id).await?;
        }
        Commands::Records { status } => {
            records::run_records(&cfg, status.as_deref()).await?;
        }
        Commands::Resolve { query } => {
            search::run_resolve(&cfg, &query)?;
        }
        Commands::Retrieve { query, dates, json } => {
            search::run_retrieve(&cfg, &query, &dates, json).await?;
        }
        Commands::Dates => {
            search::run_dates(&cfg).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
