use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use solana_pubkey::Pubkey;
use tokio::sync::RwLock;

use crate::error::Error;
use crate::types::RawTransaction;

/// Read access to confirmed ledger history.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Transactions in `[start, end]` touching any of `accounts`, in no particular order.
    async fn get_transactions(
        &self,
        accounts: &[Pubkey],
        start: u64,
        end: u64,
    ) -> Result<Vec<RawTransaction>, Error>;

    async fn get_latest_block(&self) -> Result<u64, Error>;
}

fn touches(tx: &RawTransaction, accounts: &[Pubkey]) -> bool {
    accounts.is_empty()
        || tx.instructions.iter().any(|ix| {
            accounts.contains(&ix.program_id) || ix.accounts.iter().any(|a| accounts.contains(a))
        })
}

/// In-memory ledger. Transactions are returned in insertion order, so tests
/// can deliver them shuffled or duplicated.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    transactions: RwLock<Vec<RawTransaction>>,
    latest_block: AtomicU64,
    failures_remaining: AtomicU32,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transactions(transactions: Vec<RawTransaction>) -> Self {
        let latest = transactions.iter().map(|tx| tx.block).max().unwrap_or(0);
        Self {
            transactions: RwLock::new(transactions),
            latest_block: AtomicU64::new(latest),
            failures_remaining: AtomicU32::new(0),
        }
    }

    /// Appends a delivery and raises the latest block if needed.
    pub async fn push(&self, tx: RawTransaction) {
        self.latest_block.fetch_max(tx.block, Ordering::SeqCst);
        self.transactions.write().await.push(tx);
    }

    pub fn set_latest_block(&self, block: u64) {
        self.latest_block.store(block, Ordering::SeqCst);
    }

    /// Makes the next `count` `get_transactions` calls fail with a fetch error.
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    fn take_failure(&self) -> bool {
        self.failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn get_transactions(
        &self,
        accounts: &[Pubkey],
        start: u64,
        end: u64,
    ) -> Result<Vec<RawTransaction>, Error> {
        if self.take_failure() {
            return Err(Error::Fetch {
                reason: format!("injected ledger failure for blocks {start}..={end}"),
            });
        }
        let range = start..=end;
        Ok(self
            .transactions
            .read()
            .await
            .iter()
            .filter(|tx| range.contains(&tx.block) && touches(tx, accounts))
            .cloned()
            .collect())
    }

    async fn get_latest_block(&self) -> Result<u64, Error> {
        Ok(self.latest_block.load(Ordering::SeqCst))
    }
}

#[derive(Deserialize)]
struct LedgerSnapshot {
    #[serde(default)]
    latest_block: Option<u64>,
    transactions: Vec<RawTransaction>,
}

/// Ledger backed by a JSON snapshot file of raw transactions.
///
/// The file is either `{"latest_block": n, "transactions": [..]}` or a bare
/// array of transactions; without `latest_block` the highest block present is
/// used.
#[derive(Debug)]
pub struct JsonLedger {
    inner: MemoryLedger,
}

impl JsonLedger {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| Error::Fetch {
                reason: format!("failed to read ledger snapshot {}: {err}", path.display()),
            })?;
        let value: serde_json::Value = serde_json::from_str(&content)?;
        let snapshot = if value.is_array() {
            LedgerSnapshot {
                latest_block: None,
                transactions: serde_json::from_value(value)?,
            }
        } else {
            serde_json::from_value::<LedgerSnapshot>(value)?
        };

        let inner = MemoryLedger::with_transactions(snapshot.transactions);
        if let Some(latest) = snapshot.latest_block {
            inner.latest_block.fetch_max(latest, Ordering::SeqCst);
        }
        tracing::info!(
            path = %path.display(),
            latest_block = inner.latest_block.load(Ordering::SeqCst),
            "loaded ledger snapshot"
        );
        Ok(Self { inner })
    }
}

#[async_trait]
impl LedgerClient for JsonLedger {
    async fn get_transactions(
        &self,
        accounts: &[Pubkey],
        start: u64,
        end: u64,
    ) -> Result<Vec<RawTransaction>, Error> {
        self.inner.get_transactions(accounts, start, end).await
    }

    async fn get_latest_block(&self) -> Result<u64, Error> {
        self.inner.get_latest_block().await
    }
}
