//! The per-market ingestion loop.
//!
//! Each cycle reads the market's checkpoint, extracts events for the next
//! block window, persists the whole batch, and only then advances the
//! checkpoint. Any failure leaves the checkpoint untouched, so a retry
//! re-extracts the same window and the event store absorbs the duplicates.

mod backoff;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub use backoff::Backoff;

use crate::checkpoint::{Checkpoint, CheckpointStatus, CheckpointStore};
use crate::error::{CheckpointError, Error};
use crate::extractor::MarketEventExtractor;
use crate::store::EventStore;
use crate::types::Market;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSettings {
    /// Wait between cycles when no new blocks are available.
    pub poll_interval: Duration,
    pub max_blocks_per_cycle: u64,
    /// Bound on each ledger and event-store call.
    pub request_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Time an in-flight cycle gets to finish after cancellation.
    pub shutdown_grace: Duration,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_blocks_per_cycle: 500,
            request_timeout: Duration::from_secs(10),
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
    Idle,
    Fetching,
    Persisting,
    Advancing,
    Backoff,
}

/// Counters shared by every worker and read by the heartbeat.
#[derive(Debug, Default)]
pub struct IngestStats {
    cycles: AtomicU64,
    idle_cycles: AtomicU64,
    failed_cycles: AtomicU64,
    events_persisted: AtomicU64,
    duplicate_events: AtomicU64,
    blocks_advanced: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub cycles: u64,
    pub idle_cycles: u64,
    pub failed_cycles: u64,
    pub events_persisted: u64,
    pub duplicate_events: u64,
    pub blocks_advanced: u64,
}

impl IngestStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            idle_cycles: self.idle_cycles.load(Ordering::Relaxed),
            failed_cycles: self.failed_cycles.load(Ordering::Relaxed),
            events_persisted: self.events_persisted.load(Ordering::Relaxed),
            duplicate_events: self.duplicate_events.load(Ordering::Relaxed),
            blocks_advanced: self.blocks_advanced.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Checkpoint already at the ledger head.
    Idle,
    Advanced { from: u64, to: u64, events: usize },
}

struct Shared {
    extractor: Arc<MarketEventExtractor>,
    store: Arc<dyn EventStore>,
    checkpoints: Arc<CheckpointStore>,
    settings: IngestSettings,
    stats: Arc<IngestStats>,
}

async fn with_timeout<T>(
    operation: &'static str,
    after: Duration,
    fut: impl Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    tokio::time::timeout(after, fut)
        .await
        .map_err(|_| Error::Timeout { operation, after })?
}

/// Returns `false` if cancelled before `delay` elapsed.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = tokio::time::sleep(delay) => true,
        () = cancel.cancelled() => false,
    }
}

pub struct IngestWorker {
    market: Market,
    shared: Arc<Shared>,
    phase: Phase,
}

impl IngestWorker {
    pub fn market(&self) -> &Market {
        &self.market
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    async fn prepare_checkpoint(&self) -> Result<Checkpoint, Error> {
        let name = self.market.name.as_str();
        let checkpoints = &self.shared.checkpoints;

        let checkpoint = match checkpoints.get(name).await? {
            Some(checkpoint) => checkpoint,
            None => {
                tracing::info!(market = name, "no checkpoint found, creating at floor");
                match checkpoints.create(name).await {
                    Ok(checkpoint) => checkpoint,
                    Err(CheckpointError::AlreadyExists { .. }) => checkpoints
                        .get(name)
                        .await?
                        .ok_or_else(|| CheckpointError::NotFound {
                            market: name.to_string(),
                        })?,
                    Err(err) => return Err(err.into()),
                }
            }
        };

        match checkpoint.status {
            CheckpointStatus::Active => Ok(checkpoint),
            CheckpointStatus::Reset => {
                tracing::warn!(market = name, "completing interrupted checkpoint reset");
                Ok(checkpoints.reset(name).await?)
            }
            CheckpointStatus::Corrupt => Err(CheckpointError::NotActive {
                market: name.to_string(),
                status: CheckpointStatus::Corrupt,
            }
            .into()),
        }
    }

    /// One fetch → persist → advance pass.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, Error> {
        let shared = Arc::clone(&self.shared);
        let settings = &shared.settings;
        let timeout = settings.request_timeout;

        self.phase = Phase::Fetching;
        let checkpoint = self.prepare_checkpoint().await?;
        let latest = with_timeout(
            "get_latest_block",
            timeout,
            shared.extractor.ledger().get_latest_block(),
        )
        .await?;

        let last = checkpoint.last_processed_block;
        let start = last.saturating_add(1);
        if start > latest {
            bump(&shared.stats.idle_cycles, 1);
            self.phase = Phase::Idle;
            return Ok(CycleOutcome::Idle);
        }
        let end = latest.min(last.saturating_add(settings.max_blocks_per_cycle));

        let extraction = with_timeout(
            "get_transactions",
            timeout,
            shared.extractor.extract(&self.market, start, end),
        )
        .await?;
        let events = extraction.events;

        self.phase = Phase::Persisting;
        if !events.is_empty() {
            let upsert = shared.store.upsert_events(&events);
            let summary = with_timeout("upsert_events", timeout, upsert).await?;
            bump(&shared.stats.events_persisted, summary.inserted as u64);
            bump(&shared.stats.duplicate_events, summary.duplicate as u64);
            if summary.failed > 0 {
                return Err(Error::Persistence {
                    reason: format!(
                        "{} of {} events failed to persist for {} blocks {start}..={end}",
                        summary.failed,
                        events.len(),
                        self.market.name
                    ),
                });
            }
        }

        self.phase = Phase::Advancing;
        shared
            .checkpoints
            .advance_from(&self.market.name, last, end)
            .await?;
        bump(&shared.stats.cycles, 1);
        bump(&shared.stats.blocks_advanced, end - last);

        tracing::info!(
            market = %self.market.name,
            from = start,
            to = end,
            events = events.len(),
            decode_failures = extraction.report.decode_failures,
            index_failures = extraction.report.index_failures,
            "checkpoint advanced"
        );
        self.phase = Phase::Idle;
        Ok(CycleOutcome::Advanced {
            from: start,
            to: end,
            events: events.len(),
        })
    }

    /// Runs cycles until `cancel` fires. A cycle in flight at cancellation
    /// gets `shutdown_grace` to finish before it is dropped.
    pub async fn run(mut self, cancel: CancellationToken) {
        let settings = self.shared.settings.clone();
        let mut backoff = Backoff::new(settings.backoff_base, settings.backoff_max);
        tracing::info!(
            market = %self.market.name,
            program = %self.market.program,
            "ingestion worker started"
        );

        while !cancel.is_cancelled() {
            let (result, stopping) = {
                let cycle = self.run_cycle();
                tokio::pin!(cycle);
                tokio::select! {
                    result = &mut cycle => (Some(result), false),
                    () = cancel.cancelled() => {
                        match tokio::time::timeout(settings.shutdown_grace, &mut cycle).await {
                            Ok(result) => (Some(result), true),
                            Err(_) => (None, true),
                        }
                    }
                }
            };

            let delay = match result {
                None => {
                    tracing::warn!(
                        market = %self.market.name,
                        phase = %self.phase,
                        grace = ?settings.shutdown_grace,
                        "in-flight cycle dropped at shutdown"
                    );
                    break;
                }
                Some(Ok(CycleOutcome::Idle)) => {
                    backoff.reset();
                    Some(settings.poll_interval)
                }
                Some(Ok(CycleOutcome::Advanced { .. })) => {
                    backoff.reset();
                    None
                }
                Some(Err(err)) => {
                    bump(&self.shared.stats.failed_cycles, 1);
                    let failed_in = self.phase;
                    self.phase = Phase::Backoff;
                    let delay = backoff.next_delay();
                    if err.is_transient() {
                        tracing::warn!(
                            market = %self.market.name,
                            phase = %failed_in,
                            kind = %err.kind(),
                            error = %err,
                            failures = backoff.failures(),
                            retry_in = ?delay,
                            "ingestion cycle failed"
                        );
                    } else {
                        tracing::error!(
                            market = %self.market.name,
                            phase = %failed_in,
                            kind = %err.kind(),
                            error = %err,
                            failures = backoff.failures(),
                            retry_in = ?delay,
                            "ingestion cycle failed"
                        );
                    }
                    Some(delay)
                }
            };

            if stopping {
                break;
            }
            if let Some(delay) = delay
                && !sleep_or_cancel(delay, &cancel).await
            {
                break;
            }
        }

        self.phase = Phase::Idle;
        tracing::info!(market = %self.market.name, "ingestion worker stopped");
    }
}

/// Runs one [`IngestWorker`] per market.
pub struct Ingestor {
    markets: Vec<Market>,
    shared: Arc<Shared>,
}

impl Ingestor {
    pub fn new(
        markets: Vec<Market>,
        extractor: Arc<MarketEventExtractor>,
        store: Arc<dyn EventStore>,
        checkpoints: Arc<CheckpointStore>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            markets,
            shared: Arc::new(Shared {
                extractor,
                store,
                checkpoints,
                settings,
                stats: Arc::new(IngestStats::default()),
            }),
        }
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        Arc::clone(&self.shared.stats)
    }

    pub fn worker(&self, market: &str) -> Option<IngestWorker> {
        self.markets
            .iter()
            .find(|m| m.name == market)
            .map(|market| IngestWorker {
                market: market.clone(),
                shared: Arc::clone(&self.shared),
                phase: Phase::Idle,
            })
    }

    /// Spawns every worker and waits for all of them to stop.
    pub async fn run(self, cancel: CancellationToken) {
        let mut workers = JoinSet::new();
        for market in &self.markets {
            if let Some(worker) = self.worker(&market.name) {
                workers.spawn(worker.run(cancel.clone()));
            }
        }
        tracing::info!(markets = workers.len(), "ingestion started");

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "ingestion worker task failed");
            }
        }
        tracing::info!("ingestion stopped");
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "test assertions")]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointBackend;
    use crate::decoder::DecoderRegistry;
    use crate::ledger::MemoryLedger;
    use crate::protocols::Protocol;
    use crate::protocols::fixtures::{accounts, instruction, le, transaction};
    use crate::store::MemoryEventStore;

    struct Harness {
        ledger: Arc<MemoryLedger>,
        store: Arc<MemoryEventStore>,
        checkpoints: Arc<CheckpointStore>,
        ingestor: Ingestor,
    }

    fn harness(settings: IngestSettings) -> Harness {
        let market = Market {
            name: "kmno-usdc".to_string(),
            program: Protocol::Kamino,
            accounts: vec![],
            floor_block: 10,
        };
        let ledger = Arc::new(MemoryLedger::new());
        let store = Arc::new(MemoryEventStore::new());
        let checkpoints = Arc::new(CheckpointStore::new(
            Arc::new(MemoryCheckpointBackend::new()),
            [&market],
        ));
        let extractor = Arc::new(MarketEventExtractor::new(
            Arc::new(DecoderRegistry::builtin()),
            ledger.clone(),
        ));
        let ingestor = Ingestor::new(
            vec![market],
            extractor,
            store.clone(),
            checkpoints.clone(),
            settings,
        );
        Harness {
            ledger,
            store,
            checkpoints,
            ingestor,
        }
    }

    async fn seed(ledger: &MemoryLedger, blocks: std::ops::RangeInclusive<u64>) {
        for block in blocks {
            let body = le(&[block, 1, 0]);
            let take = instruction(Protocol::Kamino, "TakeOrder", &body, accounts(5));
            ledger.push(transaction(block, 0, vec![take])).await;
        }
    }

    #[tokio::test]
    async fn cycle_creates_checkpoint_and_windows_blocks() {
        let h = harness(IngestSettings {
            max_blocks_per_cycle: 5,
            ..IngestSettings::default()
        });
        seed(&h.ledger, 11..=20).await;
        let mut worker = h.ingestor.worker("kmno-usdc").unwrap();

        assert_eq!(
            worker.run_cycle().await.unwrap(),
            CycleOutcome::Advanced {
                from: 11,
                to: 15,
                events: 5
            }
        );
        assert_eq!(
            worker.run_cycle().await.unwrap(),
            CycleOutcome::Advanced {
                from: 16,
                to: 20,
                events: 5
            }
        );
        assert_eq!(worker.run_cycle().await.unwrap(), CycleOutcome::Idle);
        assert_eq!(worker.phase(), Phase::Idle);

        let stats = h.ingestor.stats().snapshot();
        assert_eq!(stats.cycles, 2);
        assert_eq!(stats.idle_cycles, 1);
        assert_eq!(stats.events_persisted, 10);
        assert_eq!(stats.blocks_advanced, 10);
        assert_eq!(h.store.len().await, 10);
    }

    #[tokio::test]
    async fn fetch_failure_leaves_checkpoint_alone() {
        let h = harness(IngestSettings::default());
        seed(&h.ledger, 11..=12).await;
        h.ledger.fail_next(1);
        let mut worker = h.ingestor.worker("kmno-usdc").unwrap();

        let err = worker.run_cycle().await.unwrap_err();
        assert!(matches!(err, Error::Fetch { .. }));
        assert_eq!(worker.phase(), Phase::Fetching);
        let checkpoint = h.checkpoints.get("kmno-usdc").await.unwrap().unwrap();
        assert_eq!(checkpoint.last_processed_block, 10);
    }

    #[tokio::test]
    async fn corrupt_checkpoint_blocks_the_cycle() {
        let h = harness(IngestSettings::default());
        h.checkpoints.create("kmno-usdc").await.unwrap();
        h.ledger.set_latest_block(5);
        // Checkpoint at 10 is ahead of ledger block 5.
        assert!(h.checkpoints.validate("kmno-usdc", 5).await.is_err());

        let mut worker = h.ingestor.worker("kmno-usdc").unwrap();
        let err = worker.run_cycle().await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(err.kind().to_string(), "checkpoint_not_active");
    }

    #[tokio::test(start_paused = true)]
    async fn worker_stops_on_cancel() {
        let h = harness(IngestSettings::default());
        seed(&h.ledger, 11..=11).await;
        let cancel = CancellationToken::new();
        let worker = h.ingestor.worker("kmno-usdc").unwrap();
        let handle = tokio::spawn(worker.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(h.store.len().await, 1);
    }
}
