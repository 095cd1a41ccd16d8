//! CNPJ Ingest - bulk loader for the CNPJ registry export

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use cnpj_common::logging::{init_logging, LogConfig, LogLevel};
use cnpj_ingest::config::IngestConfig;
use cnpj_ingest::discovery::discover;
use cnpj_ingest::housekeeping::{Housekeeping, NoHousekeeping, PgAnalyze};
use cnpj_ingest::models::{RunSummary, TableStats};
use cnpj_ingest::pipeline::{prepare_tables, Pipeline, RunError};
use cnpj_ingest::stats::collect_stats;
use cnpj_ingest::{LoadStore, MemoryStore, PgStore, SchemaRegistry};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "cnpj-ingest")]
#[command(author, version, about = "CNPJ registry bulk loader")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load all source files, reconcile and report
    Run(RunArgs),

    /// Classify source records by field count without loading anything
    Count {
        /// Directory with the extracted source files
        #[arg(short, long, env = "CNPJ_SOURCE_DIR")]
        source_dir: PathBuf,

        /// Files scanned concurrently
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Create missing target tables
    Prepare {
        /// PostgreSQL connection URL
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Directory with the extracted source files
    #[arg(short, long, env = "CNPJ_SOURCE_DIR")]
    source_dir: Option<PathBuf>,

    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Files loaded concurrently
    #[arg(short, long)]
    workers: Option<usize>,

    /// Rows per fallback batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Reconciliation retry ceiling
    #[arg(long)]
    max_retries: Option<u32>,

    /// Create missing tables before loading
    #[arg(long)]
    create_tables: bool,

    /// Load into memory instead of PostgreSQL
    #[arg(long)]
    dry_run: bool,

    /// Write the run summary as JSON to this file
    #[arg(long)]
    summary: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Before parsing, so clap's env fallbacks see .env values
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("cnpj-ingest")
        .build();

    // Environment variables take precedence over flags
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    let _guard = init_logging(&log_config)?;

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Count {
            source_dir,
            workers,
        } => count(&source_dir, workers).await,
        Command::Prepare { database_url } => prepare(database_url).await,
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let mut config = IngestConfig::from_env();
    if let Some(dir) = args.source_dir {
        config = config.with_source_dir(dir);
    }
    if let Some(url) = args.database_url {
        config = config.with_database_url(url);
    }
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }
    if let Some(size) = args.batch_size {
        config = config.with_fallback_batch_size(size);
    }
    if let Some(rounds) = args.max_retries {
        config = config.with_max_retry_rounds(rounds);
    }
    if args.create_tables {
        config = config.with_create_tables(true);
    }

    let registry = SchemaRegistry::cnpj();
    config.validate(registry.max_width())?;

    let (store, housekeeping): (Arc<dyn LoadStore>, Arc<dyn Housekeeping>) = if args.dry_run {
        info!("Dry run: loading into memory, no database is touched");
        (Arc::new(MemoryStore::new()), Arc::new(NoHousekeeping))
    } else {
        let store = PgStore::connect(&config.database)
            .await
            .context("Failed to connect to database")?
            .with_copy_chunk_bytes(config.copy_chunk_bytes);
        let analyze = PgAnalyze::new(store.pool().clone());
        (Arc::new(store), Arc::new(analyze))
    };

    let pipeline = Pipeline::new(config, store)
        .with_registry(registry)
        .with_housekeeping(housekeeping);

    match pipeline.run().await {
        Ok(summary) => report(&summary, args.summary.as_deref()),
        Err(RunError::UnresolvedDivergence { tables, summary }) => {
            report(&summary, args.summary.as_deref())?;
            let names: Vec<&str> = tables.iter().map(|t| t.as_str()).collect();
            anyhow::bail!(
                "Reconciliation gave up after {} retry rounds; divergent tables: {}",
                summary.retry_rounds,
                names.join(", ")
            )
        },
        Err(e) => Err(e.into()),
    }
}

fn report(summary: &RunSummary, json_path: Option<&Path>) -> Result<()> {
    println!("{}", summary.render_outcomes());
    println!("{}", summary.report.render());

    if !summary.skipped_files.is_empty() {
        println!("Skipped {} unmatched files", summary.skipped_files.len());
    }

    if let Some(path) = json_path {
        let json = serde_json::to_string_pretty(summary)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write summary to {}", path.display()))?;
        info!(path = %path.display(), "Run summary written");
    }

    Ok(())
}

async fn count(source_dir: &Path, workers: Option<usize>) -> Result<()> {
    let registry = SchemaRegistry::cnpj();
    let workers = workers.unwrap_or(IngestConfig::default().workers);

    let discovery = discover(source_dir, &registry)?;
    let stats = collect_stats(&discovery, workers).await?;

    println!("{}", TableStats::render(&stats));
    Ok(())
}

async fn prepare(database_url: Option<String>) -> Result<()> {
    let mut config = IngestConfig::from_env();
    if let Some(url) = database_url {
        config = config.with_database_url(url);
    }

    let store = PgStore::connect(&config.database)
        .await
        .context("Failed to connect to database")?;
    prepare_tables(&store, &SchemaRegistry::cnpj()).await?;

    info!("Tables ready");
    Ok(())
}
