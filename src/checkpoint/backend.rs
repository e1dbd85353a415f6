use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::checkpoint::Checkpoint;
use crate::error::CheckpointError;

/// Durable storage for checkpoints. Each `write` replaces the market's record
/// atomically.
#[async_trait]
pub trait CheckpointBackend: Send + Sync {
    async fn read(&self, market: &str) -> Result<Option<Checkpoint>, CheckpointError>;

    async fn write(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    records: HashMap<String, Checkpoint>,
    writes_before_failure: Option<usize>,
}

#[derive(Debug, Default)]
pub struct MemoryCheckpointBackend {
    state: Mutex<MemoryState>,
}

impl MemoryCheckpointBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets `writes` more writes through, then fails every write until
    /// [`clear_failures`](Self::clear_failures).
    pub async fn fail_after(&self, writes: usize) {
        self.state.lock().await.writes_before_failure = Some(writes);
    }

    pub async fn clear_failures(&self) {
        self.state.lock().await.writes_before_failure = None;
    }

    /// Overwrites a record directly, bypassing the store's transition rules.
    pub async fn put(&self, checkpoint: Checkpoint) {
        self.state
            .lock()
            .await
            .records
            .insert(checkpoint.market.clone(), checkpoint);
    }
}

#[async_trait]
impl CheckpointBackend for MemoryCheckpointBackend {
    async fn read(&self, market: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.state.lock().await.records.get(market).cloned())
    }

    async fn write(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let mut state = self.state.lock().await;
        if let Some(remaining) = state.writes_before_failure.as_mut() {
            if *remaining == 0 {
                return Err(CheckpointError::Backend {
                    reason: format!("injected write failure for {}", checkpoint.market),
                });
            }
            *remaining -= 1;
        }
        state
            .records
            .insert(checkpoint.market.clone(), checkpoint.clone());
        Ok(())
    }
}

/// One JSON file per market under `dir`, replaced via write-to-temp and rename.
#[derive(Debug, Clone)]
pub struct FileCheckpointBackend {
    dir: PathBuf,
}

impl FileCheckpointBackend {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|err| backend_error(&dir, &err))?;
        Ok(Self { dir })
    }

    fn path_for(&self, market: &str) -> Result<PathBuf, CheckpointError> {
        if market.is_empty()
            || market.starts_with('.')
            || market.contains(['/', '\\'])
        {
            return Err(CheckpointError::Backend {
                reason: format!("market name {market:?} cannot be used as a file name"),
            });
        }
        Ok(self.dir.join(format!("{market}.json")))
    }
}

fn backend_error(path: &Path, err: &dyn std::fmt::Display) -> CheckpointError {
    CheckpointError::Backend {
        reason: format!("{}: {err}", path.display()),
    }
}

#[async_trait]
impl CheckpointBackend for FileCheckpointBackend {
    async fn read(&self, market: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let path = self.path_for(market)?;
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(backend_error(&path, &err)),
        };
        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|err| backend_error(&path, &err))
    }

    async fn write(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let path = self.path_for(&checkpoint.market)?;
        let tmp = path.with_extension("json.tmp");
        let body =
            serde_json::to_vec_pretty(checkpoint).map_err(|err| backend_error(&path, &err))?;
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|err| backend_error(&tmp, &err))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|err| backend_error(&path, &err))
    }
}
