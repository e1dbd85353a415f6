//! `defi-event-indexer` command-line entry point.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use defi_event_indexer::cli::{self, CheckpointCommand};
use defi_event_indexer::config::LoggingConfig;
use defi_event_indexer::{
    CheckpointStore, DecoderRegistry, Error, FileCheckpointBackend, IndexerConfig, Ingestor,
    InstructionIndexer, JsonLedger, JsonlEventStore, LedgerClient, MarketEventExtractor,
    Protocol, heartbeat, protocols,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "defi-event-indexer")]
#[command(about = "Checkpointed make/take indexer for Solana limit-order programs")]
struct Cli {
    /// Configuration file path; `indexer.toml` is read when present and this is unset
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Inspect or repair a market checkpoint
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointCommand,
    },
    /// Ingest every configured market until interrupted
    Run,
}

fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    if logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

fn load_config(cli: &Cli) -> Result<IndexerConfig, Error> {
    let mut config = cli::load_config(cli.config.as_deref())?;
    if let Some(level) = &cli.log_level {
        config.logging.level.clone_from(level);
    }
    Ok(config)
}

async fn checkpoint_store(config: &IndexerConfig) -> Result<CheckpointStore, Error> {
    let backend = FileCheckpointBackend::open(&config.storage.checkpoint_dir).await?;
    Ok(CheckpointStore::new(Arc::new(backend), &config.markets))
}

async fn run_checkpoint(config: &IndexerConfig, action: CheckpointCommand) -> anyhow::Result<()> {
    let store = checkpoint_store(config).await?;
    let checkpoint = cli::run_checkpoint_command(config, &store, action).await?;

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &checkpoint)?;
    writeln!(stdout)?;
    Ok(())
}

async fn run_ingestion(config: IndexerConfig) -> anyhow::Result<()> {
    if config.markets.is_empty() {
        anyhow::bail!(Error::Config {
            reason: "no [[markets]] configured".to_string(),
        });
    }

    let registry = Arc::new(DecoderRegistry::builtin());
    for protocol in Protocol::ALL {
        let indexer: &dyn InstructionIndexer = protocols::indexer_for(protocol);
        info!(program = %protocol, status = %indexer.status(), "registered program");
    }

    let ledger: Arc<dyn LedgerClient> =
        Arc::new(JsonLedger::open(&config.ledger.snapshot_path).await?);
    let store = Arc::new(JsonlEventStore::open(&config.storage.events_path).await?);
    let checkpoints = Arc::new(checkpoint_store(&config).await?);
    let extractor = Arc::new(MarketEventExtractor::new(registry, ledger));
    let ingestor = Ingestor::new(
        config.markets.clone(),
        extractor,
        store,
        checkpoints,
        config.ingest.settings(),
    );

    let cancel = CancellationToken::new();
    let heartbeat = heartbeat::spawn(
        ingestor.stats(),
        config.heartbeat.interval(),
        cancel.clone(),
    );

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested"),
            Err(err) => warn!(error = %err, "failed to listen for ctrl-c; shutting down"),
        }
        signal_cancel.cancel();
    });

    ingestor.run(cancel.clone()).await;
    cancel.cancel();
    heartbeat.await.context("heartbeat task failed")?;
    Ok(())
}

async fn run(cli: Cli, config: IndexerConfig) -> anyhow::Result<()> {
    match cli.command {
        Command::Checkpoint { action } => run_checkpoint(&config, action).await,
        Command::Run => run_ingestion(config).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            init_logging(&LoggingConfig::default());
            error!(kind = %err.kind(), error = %err, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config.logging);
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(cli::DEFAULT_CONFIG_PATH));
    info!(
        config = %config_path.display(),
        markets = config.markets.len(),
        "defi-event-indexer starting"
    );

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let kind = cli::failure_kind(&err);
            error!(kind = %kind, error = %format!("{err:#}"), "command failed");
            ExitCode::FAILURE
        }
    }
}
