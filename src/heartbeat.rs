use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::ingest::IngestStats;

/// Logs an "alive" line with the ingestion counters every `interval` until
/// `cancel` fires. Only reads atomics, so it never waits on a worker.
pub fn spawn(
    stats: Arc<IngestStats>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let started = Instant::now();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = cancel.cancelled() => break,
            }
            let snapshot = stats.snapshot();
            tracing::info!(
                uptime_secs = started.elapsed().as_secs(),
                cycles = snapshot.cycles,
                idle_cycles = snapshot.idle_cycles,
                failed_cycles = snapshot.failed_cycles,
                events_persisted = snapshot.events_persisted,
                duplicate_events = snapshot.duplicate_events,
                blocks_advanced = snapshot.blocks_advanced,
                "alive"
            );
        }
        tracing::debug!("heartbeat stopped");
    })
}
