//! Operator commands behind the `defi-event-indexer` binary.

use std::path::{Path, PathBuf};

use clap::Subcommand;

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::IndexerConfig;
use crate::error::{CheckpointError, Error};
use crate::ledger::{JsonLedger, LedgerClient};

/// Used when `--config` is not given; a missing file then means defaults.
pub const DEFAULT_CONFIG_PATH: &str = "indexer.toml";

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum CheckpointCommand {
    Create { market: String },
    Reset { market: String },
    Validate {
        market: String,
        /// Ledger head to validate against; defaults to the ledger's latest block
        #[arg(long)]
        latest_block: Option<u64>,
    },
    Show { market: String },
}

impl CheckpointCommand {
    pub fn market(&self) -> &str {
        match self {
            Self::Create { market }
            | Self::Reset { market }
            | Self::Validate { market, .. }
            | Self::Show { market } => market,
        }
    }
}

/// Reads `path`, or the default location when no path was given.
///
/// An explicit path must exist. Without one, a missing default file yields
/// the built-in defaults.
pub fn load_config(path: Option<&Path>) -> Result<IndexerConfig, Error> {
    match path {
        Some(path) => IndexerConfig::from_file(path),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default.exists() {
                IndexerConfig::from_file(&default)
            } else {
                Ok(IndexerConfig::default())
            }
        }
    }
}

/// Runs one checkpoint command against `store` and returns the record it
/// produced or read.
pub async fn run_checkpoint_command(
    config: &IndexerConfig,
    store: &CheckpointStore,
    command: CheckpointCommand,
) -> Result<Checkpoint, Error> {
    let market = config.market(command.market())?.name.as_str();
    let checkpoint = match command {
        CheckpointCommand::Create { .. } => store.create(market).await?,
        CheckpointCommand::Reset { .. } => store.reset(market).await?,
        CheckpointCommand::Validate { latest_block, .. } => {
            let latest_block = match latest_block {
                Some(block) => block,
                None => {
                    JsonLedger::open(&config.ledger.snapshot_path)
                        .await?
                        .get_latest_block()
                        .await?
                }
            };
            store.validate(market, latest_block).await?
        }
        CheckpointCommand::Show { .. } => store
            .get(market)
            .await?
            .ok_or_else(|| CheckpointError::NotFound {
                market: market.to_string(),
            })?,
    };
    tracing::debug!(market, status = %checkpoint.status, "checkpoint command finished");
    Ok(checkpoint)
}

/// Snake-case error kind for a failed command, or `internal` when the error
/// did not come from this crate.
pub fn failure_kind(err: &anyhow::Error) -> String {
    err.downcast_ref::<Error>()
        .map(|err| err.kind().to_string())
        .or_else(|| {
            err.downcast_ref::<CheckpointError>()
                .map(|err| err.kind().to_string())
        })
        .unwrap_or_else(|| "internal".to_string())
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "test assertions")]
mod tests {
    use super::*;

    #[test]
    fn explicit_missing_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        let err = load_config(Some(&missing)).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("absent.toml"));
    }

    #[test]
    fn explicit_config_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("indexer.toml");
        std::fs::write(&path, "[logging]\nlevel = \"debug\"\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn failure_kind_unwraps_crate_errors() {
        let err = anyhow::Error::new(Error::from(CheckpointError::UnknownMarket {
            market: "x".to_string(),
        }));
        assert_eq!(failure_kind(&err), "unknown_market");

        let err = anyhow::Error::new(CheckpointError::AlreadyExists {
            market: "x".to_string(),
        });
        assert_eq!(failure_kind(&err), "checkpoint_exists");

        assert_eq!(failure_kind(&anyhow::anyhow!("boom")), "internal");
    }
}
