use std::collections::{BTreeMap, HashSet};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::Error;
use crate::types::{DomainEvent, OriginKey};

/// Outcome of one batch write. Duplicates are already-stored events and count
/// as success.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub duplicate: usize,
    pub failed: usize,
}

impl UpsertSummary {
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Persistent sink for domain events, keyed by market and origin key.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn upsert_events(&self, events: &[DomainEvent]) -> Result<UpsertSummary, Error>;
}

type EventKey = (String, OriginKey);

fn event_key(event: &DomainEvent) -> EventKey {
    (event.market().to_string(), event.origin())
}

#[derive(Debug, Default)]
struct MemoryState {
    events: BTreeMap<EventKey, DomainEvent>,
    inserts_before_failure: Option<usize>,
}

#[derive(Debug, Default)]
pub struct MemoryEventStore {
    state: Mutex<MemoryState>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next batch stores at most `inserts` new events; the rest are reported failed.
    pub async fn fail_after(&self, inserts: usize) {
        self.state.lock().await.inserts_before_failure = Some(inserts);
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.events.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn upsert_events(&self, events: &[DomainEvent]) -> Result<UpsertSummary, Error> {
        let mut state = self.state.lock().await;
        let mut budget = state.inserts_before_failure.take();
        let mut summary = UpsertSummary::default();

        for event in events {
            let key = event_key(event);
            if state.events.contains_key(&key) {
                summary.duplicate += 1;
                continue;
            }
            if let Some(remaining) = budget.as_mut() {
                if *remaining == 0 {
                    summary.failed += 1;
                    continue;
                }
                *remaining -= 1;
            }
            state.events.insert(key, event.clone());
            summary.inserted += 1;
        }
        Ok(summary)
    }
}

/// Append-only JSON-lines event log.
///
/// The dedup index is rebuilt from the file on open; a torn line from an
/// interrupted append is skipped with a warning. A failed append is truncated
/// away, and the next append starts on a fresh line.
#[derive(Debug)]
pub struct JsonlEventStore {
    path: PathBuf,
    index: Mutex<HashSet<EventKey>>,
}

impl JsonlEventStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut index = HashSet::new();
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                for (line_no, line) in content.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<DomainEvent>(line) {
                        Ok(event) => {
                            index.insert(event_key(&event));
                        }
                        Err(err) => tracing::warn!(
                            path = %path.display(),
                            line = line_no + 1,
                            error = %err,
                            "skipping unreadable event line"
                        ),
                    }
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        tracing::debug!(path = %path.display(), events = index.len(), "opened event log");
        Ok(Self {
            path,
            index: Mutex::new(index),
        })
    }

    pub async fn len(&self) -> usize {
        self.index.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn persistence_error(&self, action: &str, err: std::io::Error) -> Error {
        Error::Persistence {
            reason: format!("failed to {action} {}: {err}", self.path.display()),
        }
    }

    /// Appends `lines` and syncs. On failure the file is cut back to its
    /// previous length so no partial line is left behind.
    async fn append(&self, lines: &str) -> Result<(), Error> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|err| self.persistence_error("open", err))?;
        let len = file
            .metadata()
            .await
            .map_err(|err| self.persistence_error("stat", err))?
            .len();

        let mut data = Vec::with_capacity(lines.len() + 1);
        if len > 0 {
            file.seek(SeekFrom::End(-1))
                .await
                .map_err(|err| self.persistence_error("seek in", err))?;
            let last = file
                .read_u8()
                .await
                .map_err(|err| self.persistence_error("read", err))?;
            if last != b'\n' {
                data.push(b'\n');
            }
        }
        data.extend_from_slice(lines.as_bytes());

        let written = async {
            file.write_all(&data).await?;
            file.sync_data().await
        }
        .await;
        if let Err(err) = written {
            if let Err(rollback) = file.set_len(len).await {
                tracing::error!(
                    path = %self.path.display(),
                    len,
                    error = %rollback,
                    "failed to truncate partial append"
                );
            }
            return Err(self.persistence_error("append to", err));
        }
        Ok(())
    }
}

#[async_trait]
impl EventStore for JsonlEventStore {
    async fn upsert_events(&self, events: &[DomainEvent]) -> Result<UpsertSummary, Error> {
        let mut index = self.index.lock().await;
        let mut summary = UpsertSummary::default();
        let mut buffer = String::new();
        let mut pending = HashSet::new();

        for event in events {
            let key = event_key(event);
            if index.contains(&key) || pending.contains(&key) {
                summary.duplicate += 1;
                continue;
            }
            match serde_json::to_string(event) {
                Ok(line) => {
                    buffer.push_str(&line);
                    buffer.push('\n');
                    pending.insert(key);
                }
                Err(err) => {
                    tracing::warn!(
                        origin = %event.origin(),
                        error = %err,
                        "failed to serialize event"
                    );
                    summary.failed += 1;
                }
            }
        }

        if pending.is_empty() {
            return Ok(summary);
        }

        self.append(&buffer).await?;
        summary.inserted += pending.len();
        index.extend(pending);
        Ok(summary)
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "test assertions")]
mod tests {
    use super::*;
    use crate::protocols::Protocol;
    use crate::types::TakeEvent;

    fn take(market: &str, block: u64, ix_index: u32) -> DomainEvent {
        DomainEvent::Take(TakeEvent {
            origin: OriginKey {
                block,
                tx_index: 0,
                ix_index,
            },
            market: market.to_string(),
            protocol: Protocol::Kamino,
            signature: format!("sig-{block}"),
            taker: "taker".to_string(),
            order: "order".to_string(),
            making_amount: 10,
            taking_amount: 9,
        })
    }

    fn summary(inserted: usize, duplicate: usize, failed: usize) -> UpsertSummary {
        UpsertSummary {
            inserted,
            duplicate,
            failed,
        }
    }

    #[tokio::test]
    async fn memory_store_deduplicates_by_origin() {
        let store = MemoryEventStore::new();
        let events = vec![take("m", 1, 0), take("m", 1, 1)];
        let first = store.upsert_events(&events).await.unwrap();
        assert_eq!(first, summary(2, 0, 0));

        let second = store.upsert_events(&events).await.unwrap();
        assert_eq!(second, summary(0, 2, 0));
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn same_origin_in_another_market_is_distinct() {
        let store = MemoryEventStore::new();
        let written = store
            .upsert_events(&[take("a", 1, 0), take("b", 1, 0)])
            .await
            .unwrap();
        assert_eq!(written.inserted, 2);
    }

    #[tokio::test]
    async fn injected_failure_stores_a_prefix() {
        let store = MemoryEventStore::new();
        store.fail_after(3).await;
        let events: Vec<_> = (0..5).map(|i| take("m", 7, i)).collect();
        let partial = store.upsert_events(&events).await.unwrap();
        assert_eq!(partial, summary(3, 0, 2));
        assert!(!partial.is_complete());

        let retry = store.upsert_events(&events).await.unwrap();
        assert_eq!(retry, summary(2, 3, 0));
    }

    #[tokio::test]
    async fn jsonl_store_rebuilds_index_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("events.jsonl");

        let store = JsonlEventStore::open(&path).await.unwrap();
        assert!(store.is_empty().await);
        let events = vec![take("m", 2, 0), take("m", 2, 0), take("m", 3, 1)];
        let written = store.upsert_events(&events).await.unwrap();
        assert_eq!(written, summary(2, 1, 0));
        drop(store);

        let reopened = JsonlEventStore::open(&path).await.unwrap();
        assert_eq!(reopened.len().await, 2);
        let again = reopened.upsert_events(&events[..1]).await.unwrap();
        assert_eq!(again.duplicate, 1);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[tokio::test]
    async fn torn_line_is_skipped_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let line = serde_json::to_string(&take("m", 1, 0)).unwrap();
        std::fs::write(&path, format!("{line}\n{{\"kind\":\"ta")).unwrap();

        let store = JsonlEventStore::open(&path).await.unwrap();
        assert_eq!(store.len().await, 1);

        store.upsert_events(&[take("m", 2, 0)]).await.unwrap();
        let reopened = JsonlEventStore::open(&path).await.unwrap();
        assert_eq!(reopened.len().await, 2);
    }

    #[tokio::test]
    async fn append_after_torn_line_starts_on_a_fresh_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let store = JsonlEventStore::open(&path).await.unwrap();
        store.upsert_events(&[take("m", 1, 0)]).await.unwrap();

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        std::io::Write::write_all(&mut file, br#"{"kind":"take","ori"#).unwrap();
        drop(file);

        store.upsert_events(&[take("m", 2, 0)]).await.unwrap();
        let reopened = JsonlEventStore::open(&path).await.unwrap();
        assert_eq!(reopened.len().await, 2);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 3);
        assert!(content.ends_with('\n'));
    }
}
