//! Evidence Indexer - evidence contract event ingestion
//!
//! This binary provides:
//! - Historical catch-up and live listening for evidence events
//! - One-off maintenance commands (range replay, checkpoint reset, pruning)
//! - A status report over the local database

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use evidence_indexer::config::Config;
use evidence_indexer::ledger::RpcLedgerClient;
use evidence_indexer::shutdown::Shutdown;
use evidence_indexer::storage::Storage;
use evidence_indexer::IndexerService;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "evidence-indexer")]
#[command(version, about = "Indexer for evidence contract events", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "indexer.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start listening (historical catch-up + live streams)
    Run,

    /// Show indexer status and sync progress
    Status,

    /// Replay a closed block range
    SyncRange {
        /// First block
        #[arg(long)]
        from: u64,

        /// Last block (inclusive)
        #[arg(long)]
        to: u64,
    },

    /// Move the checkpoint, backwards included
    ResetCheckpoint {
        /// Block to rewind to
        #[arg(long)]
        block: u64,
    },

    /// Initialize the database
    InitDb {
        /// Database URL
        #[arg(long, default_value = "sqlite://evidence.db")]
        database_url: String,
    },

    /// Dispatch one page of stored unprocessed events
    ProcessUnprocessed,

    /// Delete raw events below a block
    Prune {
        /// Events in blocks strictly below this one are deleted
        #[arg(long)]
        before_block: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Run);

    if let Commands::InitDb { database_url } = &command {
        init_logging(cli.debug, "info", "pretty")?;
        return init_database(database_url).await;
    }

    let config = Config::from_file(&cli.config).context("Failed to load configuration")?;
    init_logging(cli.debug, &config.logging.level, &config.logging.format)?;

    info!("Evidence Indexer starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    match command {
        Commands::Run => run_indexer(config).await?,
        Commands::Status => show_status(config).await?,
        Commands::SyncRange { from, to } => sync_range(config, from, to).await?,
        Commands::ResetCheckpoint { block } => reset_checkpoint(config, block).await?,
        Commands::ProcessUnprocessed => process_unprocessed(config).await?,
        Commands::Prune { before_block } => prune(config, before_block).await?,
        Commands::InitDb { .. } => {}
    }

    Ok(())
}

/// Filter used when `RUST_LOG` is unset.
fn default_filter(level: &str) -> String {
    format!("evidence_indexer={level}")
}

/// Initialize tracing subscriber for logging
fn init_logging(debug: bool, level: &str, format: &str) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = if debug {
        EnvFilter::new("evidence_indexer=debug,sqlx=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(level)))
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "json" {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }

    Ok(())
}

async fn open_storage(config: &Config) -> Result<Storage> {
    let storage = Storage::new(
        &config.database.url,
        Some(config.database.max_connections),
        Some(config.database.min_connections),
    )
    .await
    .context("Failed to connect to database")?;

    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    Ok(storage)
}

/// Build the service with a shutdown signal wired to Ctrl+C.
async fn build_service(config: Config) -> Result<Arc<IndexerService>> {
    info!("Configuration loaded successfully");
    info!("  Network: {} (chain {})", config.network.name, config.network.chain_id);
    info!("  RPC URL: {}", config.network.rpc_url);
    info!("  Database: {}", config.database.url);

    let storage = open_storage(&config).await?;
    info!("Database initialized");

    let ledger = RpcLedgerClient::new(&config.network.rpc_url).context("Failed to create RPC client")?;
    info!("RPC client initialized");

    let shutdown = Shutdown::new();
    let service = Arc::new(IndexerService::new(
        config,
        storage,
        Arc::new(ledger),
        shutdown.signal(),
    ));

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down..."),
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
        shutdown.trigger();
    });

    Ok(service)
}

/// Main indexer service - listens until Ctrl+C
async fn run_indexer(config: Config) -> Result<()> {
    let service = build_service(config).await?;

    info!("Indexer is running. Press Ctrl+C to stop.");
    let result = service.run().await;

    service.storage().close().await;
    info!("Indexer stopped");
    result
}

async fn sync_range(config: Config, from: u64, to: u64) -> Result<()> {
    let service = build_service(config).await?;

    let report = service.sync_range(from, to).await?;
    println!("\n=== Sync Range {from}..={to} ===\n");
    println!("  Batches: {} ({} failed)", report.batches, report.failed_batches);
    println!("  Events: {}", report.events.events);
    println!("  Processed: {}", report.events.processed);
    println!("  Failed: {}", report.events.failed);
    println!("  Duplicates: {}", report.events.duplicates);
    match report.last_block {
        Some(block) => println!("  Checkpoint: {block}"),
        None => println!("  Checkpoint: unchanged"),
    }
    if report.cancelled {
        println!("  Interrupted before completion");
    }
    println!();

    service.storage().close().await;
    Ok(())
}

async fn reset_checkpoint(config: Config, block: u64) -> Result<()> {
    let service = build_service(config).await?;

    let record = service.reset_checkpoint(block).await?;
    info!(
        "Checkpoint for {} reset to block {}",
        record.contract_address, record.last_block_number
    );

    service.storage().close().await;
    Ok(())
}

async fn process_unprocessed(config: Config) -> Result<()> {
    let service = build_service(config).await?;

    let report = service.process_unprocessed().await?;
    info!(
        "Dispatched {} events: {} processed, {} failed, {} unhandled",
        report.events, report.processed, report.failed, report.unhandled
    );

    service.storage().close().await;
    Ok(())
}

async fn prune(config: Config, before_block: u64) -> Result<()> {
    let storage = open_storage(&config).await?;

    let deleted = storage.delete_raw_events_before_block(before_block).await?;
    info!("Deleted {} raw events below block {}", deleted, before_block);

    storage.close().await;
    Ok(())
}

/// Show indexer status
async fn show_status(config: Config) -> Result<()> {
    info!("Checking indexer status");

    let service = build_service(config).await?;
    let status = service.status().await?;
    let stats = service.storage().stats().await?;

    println!("\n=== Evidence Indexer Status ===\n");
    println!("Sync Progress:");
    println!("  Contract: {}", status.contract);
    println!("  Listener: {}", status.state);
    println!("  Checkpoint: {} ({})", status.checkpoint.last_block_number, status.checkpoint.status);
    println!(
        "  Last Updated: {}",
        chrono::DateTime::from_timestamp(status.checkpoint.last_sync_at, 0)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| "unknown".to_string())
    );
    if let Some(message) = &status.checkpoint.error_message {
        println!("  Last Error: {} (retries: {})", message, status.checkpoint.retry_count);
    }
    match (status.current_block, status.blocks_behind, status.progress_percentage) {
        (Some(head), Some(behind), Some(progress)) => {
            println!("  Ledger Head: {head}");
            println!("  Blocks Behind: {behind}");
            println!("  Progress: {progress:.2}%");
        }
        _ => println!("  Ledger Head: unavailable"),
    }

    println!("\nDatabase Statistics:");
    println!("  Raw Events: {}", stats.raw_event_count);
    println!("  Unprocessed: {}", stats.unprocessed_count);
    println!("  Failing: {}", stats.failing_count);
    println!("  Evidence: {}", stats.evidence_count);
    println!();

    service.storage().close().await;
    Ok(())
}

/// Initialize the database
async fn init_database(database_url: &str) -> Result<()> {
    info!("Initializing database: {}", database_url);

    // Connect to database with default pool settings
    let storage = Storage::new(database_url, None, None)
        .await
        .context("Failed to connect to database")?;

    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    storage
        .health_check()
        .await
        .context("Database health check failed")?;

    let stats = storage.stats().await?;
    info!("Database initialized successfully!");
    info!("  Raw events: {}", stats.raw_event_count);
    info!("  Evidence: {}", stats.evidence_count);

    storage.close().await;
    Ok(())
}
