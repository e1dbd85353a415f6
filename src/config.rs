//! TOML configuration for the indexer binary.
//!
//! Every section has defaults, so a file only needs its `[[markets]]`
//! entries:
//!
//! ```toml
//! [[markets]]
//! name = "sol-usdc"
//! program = "limit_v2"
//! accounts = ["j1o2qRpjcyUwEvwtcfhEQefh773ZgjxcVRry7LDqg5X"]
//! floor_block = 250000000
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CheckpointError, Error};
use crate::ingest::IngestSettings;
use crate::types::Market;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub logging: LoggingConfig,
    pub ledger: LedgerConfig,
    pub storage: StorageConfig,
    pub ingest: IngestConfig,
    pub heartbeat: HeartbeatConfig,
    pub markets: Vec<Market>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub level: String,
    pub json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// JSON snapshot of raw transactions.
    pub snapshot_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub events_path: PathBuf,
    pub checkpoint_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub poll_interval_ms: u64,
    pub max_blocks_per_cycle: u64,
    pub request_timeout_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub shutdown_grace_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_secs: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from("data/ledger.json"),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            events_path: PathBuf::from("data/events.jsonl"),
            checkpoint_dir: PathBuf::from("data/checkpoints"),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        let settings = IngestSettings::default();
        Self {
            poll_interval_ms: millis(settings.poll_interval),
            max_blocks_per_cycle: settings.max_blocks_per_cycle,
            request_timeout_ms: millis(settings.request_timeout),
            backoff_base_ms: millis(settings.backoff_base),
            backoff_max_ms: millis(settings.backoff_max),
            shutdown_grace_ms: millis(settings.shutdown_grace),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

impl IngestConfig {
    pub fn settings(&self) -> IngestSettings {
        IngestSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_blocks_per_cycle: self.max_blocks_per_cycle,
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
            shutdown_grace: Duration::from_millis(self.shutdown_grace_ms),
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn config_error(reason: impl Into<String>) -> Error {
    Error::Config {
        reason: reason.into(),
    }
}

impl IndexerConfig {
    /// Load and validate a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|err| Error::Config {
            reason: format!("failed to read {}: {err}", path.display()),
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, Error> {
        let config: Self = toml::from_str(content).map_err(|err| config_error(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        let mut names = HashSet::new();
        for market in &self.markets {
            let valid_name = !market.name.is_empty()
                && market
                    .name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if !valid_name {
                return Err(config_error(format!(
                    "market name {:?} must be non-empty ASCII letters, digits, '-' or '_'",
                    market.name
                )));
            }
            if !names.insert(market.name.as_str()) {
                return Err(config_error(format!("duplicate market {}", market.name)));
            }
            if market.accounts.is_empty() {
                return Err(config_error(format!(
                    "market {} has no accounts",
                    market.name
                )));
            }
        }

        let ingest = &self.ingest;
        for (field, value) in [
            ("ingest.poll_interval_ms", ingest.poll_interval_ms),
            ("ingest.max_blocks_per_cycle", ingest.max_blocks_per_cycle),
            ("ingest.request_timeout_ms", ingest.request_timeout_ms),
            ("ingest.backoff_base_ms", ingest.backoff_base_ms),
            ("heartbeat.interval_secs", self.heartbeat.interval_secs),
        ] {
            if value == 0 {
                return Err(config_error(format!("{field} must be greater than zero")));
            }
        }
        if ingest.backoff_base_ms > ingest.backoff_max_ms {
            return Err(config_error(format!(
                "ingest.backoff_base_ms ({}) exceeds ingest.backoff_max_ms ({})",
                ingest.backoff_base_ms, ingest.backoff_max_ms
            )));
        }
        Ok(())
    }

    pub fn market(&self, name: &str) -> Result<&Market, Error> {
        self.markets
            .iter()
            .find(|market| market.name == name)
            .ok_or_else(|| {
                CheckpointError::UnknownMarket {
                    market: name.to_string(),
                }
                .into()
            })
    }
}
