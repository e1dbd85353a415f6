//! Per-market progress tracking.
//!
//! A checkpoint records the last block whose events are fully persisted. The
//! [`CheckpointStore`] is the only writer; it serializes writes per market so
//! concurrent `advance`/`reset`/`validate` calls on one market never interleave,
//! while different markets proceed independently.

mod backend;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

pub use backend::{CheckpointBackend, FileCheckpointBackend, MemoryCheckpointBackend};

use crate::error::CheckpointError;
use crate::types::Market;

/// Advances retained per checkpoint; older entries are dropped first.
pub const HISTORY_LIMIT: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CheckpointStatus {
    Active,
    /// A reset was started and has not completed its second write.
    Reset,
    /// Validation found the record inconsistent; only a reset clears this.
    Corrupt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub from_block: u64,
    pub to_block: u64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub market: String,
    pub floor_block: u64,
    pub last_processed_block: u64,
    pub status: CheckpointStatus,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl Checkpoint {
    /// Fresh active checkpoint sitting at its floor.
    pub fn new(market: impl Into<String>, floor_block: u64) -> Self {
        Self {
            market: market.into(),
            floor_block,
            last_processed_block: floor_block,
            status: CheckpointStatus::Active,
            updated_at: Utc::now(),
            history: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == CheckpointStatus::Active
    }

    /// Consistency violations against `latest_block`; empty when sound.
    pub fn diagnostics(&self, latest_block: u64) -> Vec<String> {
        let mut out = Vec::new();
        let last = self.last_processed_block;

        match self.status {
            CheckpointStatus::Active => {}
            CheckpointStatus::Reset => out.push("reset did not complete".to_string()),
            CheckpointStatus::Corrupt => out.push("checkpoint is marked corrupt".to_string()),
        }
        if last < self.floor_block {
            out.push(format!(
                "last processed block {last} is below floor {}",
                self.floor_block
            ));
        }
        if last > latest_block {
            out.push(format!(
                "last processed block {last} is ahead of ledger block {latest_block}"
            ));
        }

        let (Some(oldest), Some(newest)) = (self.history.first(), self.history.last()) else {
            if last != self.floor_block {
                out.push(format!(
                    "no history but last processed block {last} differs from floor {}",
                    self.floor_block
                ));
            }
            return out;
        };

        if oldest.from_block <= self.floor_block {
            out.push(format!(
                "history starts at {} which is not above floor {}",
                oldest.from_block, self.floor_block
            ));
        }
        if newest.to_block != last {
            out.push(format!(
                "history ends at {} but last processed block is {last}",
                newest.to_block
            ));
        }
        for entry in &self.history {
            if entry.from_block > entry.to_block {
                out.push(format!(
                    "history entry {}..={} is inverted",
                    entry.from_block, entry.to_block
                ));
            }
        }
        for pair in self.history.windows(2) {
            let [prev, next] = pair else { continue };
            if next.from_block != prev.to_block.saturating_add(1) {
                out.push(format!(
                    "gap in history between {} and {}",
                    prev.to_block, next.from_block
                ));
            }
        }
        out
    }
}

struct MarketSlot {
    floor_block: u64,
    lock: Mutex<()>,
}

pub struct CheckpointStore {
    backend: Arc<dyn CheckpointBackend>,
    markets: HashMap<String, MarketSlot>,
}

impl CheckpointStore {
    pub fn new<'a>(
        backend: Arc<dyn CheckpointBackend>,
        markets: impl IntoIterator<Item = &'a Market>,
    ) -> Self {
        let markets = markets
            .into_iter()
            .map(|market| {
                (
                    market.name.clone(),
                    MarketSlot {
                        floor_block: market.floor_block,
                        lock: Mutex::new(()),
                    },
                )
            })
            .collect();
        Self { backend, markets }
    }

    fn slot(&self, market: &str) -> Result<&MarketSlot, CheckpointError> {
        self.markets
            .get(market)
            .ok_or_else(|| CheckpointError::UnknownMarket {
                market: market.to_string(),
            })
    }

    /// Snapshot without taking the market's write lock.
    pub async fn get(&self, market: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        self.slot(market)?;
        self.backend.read(market).await
    }

    pub async fn create(&self, market: &str) -> Result<Checkpoint, CheckpointError> {
        let slot = self.slot(market)?;
        let _guard = slot.lock.lock().await;

        if self.backend.read(market).await?.is_some() {
            return Err(CheckpointError::AlreadyExists {
                market: market.to_string(),
            });
        }
        let checkpoint = Checkpoint::new(market, slot.floor_block);
        self.backend.write(&checkpoint).await?;
        tracing::info!(market, floor_block = slot.floor_block, "checkpoint created");
        Ok(checkpoint)
    }

    /// Records that every block up to `new_block` is persisted.
    pub async fn advance(
        &self,
        market: &str,
        new_block: u64,
    ) -> Result<Checkpoint, CheckpointError> {
        self.advance_checked(market, None, new_block).await
    }

    /// Like [`advance`](Self::advance), but only if the checkpoint still sits
    /// at `expected`.
    ///
    /// A cycle reads its start position, persists, then calls this; a reset
    /// or another writer moving the record in between surfaces as
    /// [`CheckpointError::Stale`] instead of being overwritten.
    pub async fn advance_from(
        &self,
        market: &str,
        expected: u64,
        new_block: u64,
    ) -> Result<Checkpoint, CheckpointError> {
        self.advance_checked(market, Some(expected), new_block)
            .await
    }

    async fn advance_checked(
        &self,
        market: &str,
        expected: Option<u64>,
        new_block: u64,
    ) -> Result<Checkpoint, CheckpointError> {
        let slot = self.slot(market)?;
        let _guard = slot.lock.lock().await;

        let mut checkpoint = self
            .backend
            .read(market)
            .await?
            .ok_or_else(|| CheckpointError::NotFound {
                market: market.to_string(),
            })?;
        if !checkpoint.is_active() {
            return Err(CheckpointError::NotActive {
                market: market.to_string(),
                status: checkpoint.status,
            });
        }

        let current = checkpoint.last_processed_block;
        if let Some(expected) = expected
            && expected != current
        {
            return Err(CheckpointError::Stale {
                market: market.to_string(),
                expected,
                current,
            });
        }
        if new_block < current {
            return Err(CheckpointError::Conflict {
                market: market.to_string(),
                current,
                requested: new_block,
            });
        }

        let now = Utc::now();
        if new_block > current {
            checkpoint.history.push(HistoryEntry {
                from_block: current + 1,
                to_block: new_block,
                at: now,
            });
            let excess = checkpoint.history.len().saturating_sub(HISTORY_LIMIT);
            checkpoint.history.drain(..excess);
            checkpoint.last_processed_block = new_block;
        }
        checkpoint.updated_at = now;
        self.backend.write(&checkpoint).await?;

        tracing::debug!(market, from = current, to = new_block, "checkpoint advanced");
        Ok(checkpoint)
    }

    /// Rewinds to the floor. Works from any status, including a missing record.
    ///
    /// The first write marks the record Reset so a crash between writes is
    /// visible; the second returns it to Active with an empty history.
    pub async fn reset(&self, market: &str) -> Result<Checkpoint, CheckpointError> {
        let slot = self.slot(market)?;
        let _guard = slot.lock.lock().await;

        let previous = self.backend.read(market).await?;
        let mut checkpoint = previous
            .clone()
            .unwrap_or_else(|| Checkpoint::new(market, slot.floor_block));
        checkpoint.floor_block = slot.floor_block;
        checkpoint.last_processed_block = slot.floor_block;
        checkpoint.status = CheckpointStatus::Reset;
        checkpoint.updated_at = Utc::now();
        self.backend.write(&checkpoint).await?;

        checkpoint.status = CheckpointStatus::Active;
        checkpoint.history.clear();
        checkpoint.updated_at = Utc::now();
        self.backend.write(&checkpoint).await?;

        tracing::info!(
            market,
            floor_block = slot.floor_block,
            from_block = previous.map(|cp| cp.last_processed_block),
            "checkpoint reset"
        );
        Ok(checkpoint)
    }

    /// Checks the record against `latest_block`; on any violation the record
    /// is marked Corrupt and the diagnostics are returned as an error.
    pub async fn validate(
        &self,
        market: &str,
        latest_block: u64,
    ) -> Result<Checkpoint, CheckpointError> {
        let slot = self.slot(market)?;
        let _guard = slot.lock.lock().await;

        let mut checkpoint = self
            .backend
            .read(market)
            .await?
            .ok_or_else(|| CheckpointError::NotFound {
                market: market.to_string(),
            })?;
        if checkpoint.floor_block != slot.floor_block {
            tracing::warn!(
                market,
                stored = checkpoint.floor_block,
                configured = slot.floor_block,
                "stored floor differs from configuration"
            );
        }

        let diagnostics = checkpoint.diagnostics(latest_block);
        if diagnostics.is_empty() {
            return Ok(checkpoint);
        }

        if checkpoint.status != CheckpointStatus::Corrupt {
            checkpoint.status = CheckpointStatus::Corrupt;
            checkpoint.updated_at = Utc::now();
            self.backend.write(&checkpoint).await?;
        }
        tracing::warn!(market, ?diagnostics, "checkpoint marked corrupt");
        Err(CheckpointError::Corrupt {
            market: market.to_string(),
            diagnostics,
        })
    }
}
