use std::time::Duration;

use crate::checkpoint::CheckpointStatus;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("index error: {reason}")]
    Index { reason: String },

    #[error("fetch error: {reason}")]
    Fetch { reason: String },

    #[error("persistence error: {reason}")]
    Persistence { reason: String },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("config error: {reason}")]
    Config { reason: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckpointError {
    #[error("checkpoint for market {market} not found")]
    NotFound { market: String },

    #[error("checkpoint for market {market} already exists")]
    AlreadyExists { market: String },

    #[error(
        "checkpoint conflict for market {market}: requested block {requested} is below {current}"
    )]
    Conflict {
        market: String,
        current: u64,
        requested: u64,
    },

    #[error("checkpoint for market {market} moved from {expected} to {current} mid-cycle")]
    Stale {
        market: String,
        expected: u64,
        current: u64,
    },

    #[error("checkpoint for market {market} is {status}, expected active")]
    NotActive {
        market: String,
        status: CheckpointStatus,
    },

    #[error("checkpoint for market {market} is corrupt: {}", diagnostics.join("; "))]
    Corrupt {
        market: String,
        diagnostics: Vec<String>,
    },

    #[error("market {market} is not configured")]
    UnknownMarket { market: String },

    #[error("checkpoint backend error: {reason}")]
    Backend { reason: String },
}

/// Failure kinds as reported to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    IndexError,
    FetchError,
    PersistenceError,
    Timeout,
    CheckpointConflict,
    CheckpointNotActive,
    CheckpointNotFound,
    CheckpointExists,
    Corrupt,
    UnknownMarket,
    BackendError,
    ConfigError,
    SerializationError,
    IoError,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Index { .. } => ErrorKind::IndexError,
            Self::Fetch { .. } => ErrorKind::FetchError,
            Self::Persistence { .. } => ErrorKind::PersistenceError,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Checkpoint(err) => err.kind(),
            Self::Config { .. } => ErrorKind::ConfigError,
            Self::Json(_) => ErrorKind::SerializationError,
            Self::Io(_) => ErrorKind::IoError,
        }
    }

    /// Whether the ingestion loop should retry after backing off.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Fetch { .. } | Self::Persistence { .. } | Self::Timeout { .. } | Self::Io(_) => {
                true
            }
            Self::Checkpoint(err) => err.is_retryable(),
            Self::Index { .. } | Self::Config { .. } | Self::Json(_) => false,
        }
    }
}

impl CheckpointError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::CheckpointNotFound,
            Self::AlreadyExists { .. } => ErrorKind::CheckpointExists,
            Self::Conflict { .. } | Self::Stale { .. } => ErrorKind::CheckpointConflict,
            Self::NotActive { .. } => ErrorKind::CheckpointNotActive,
            Self::Corrupt { .. } => ErrorKind::Corrupt,
            Self::UnknownMarket { .. } => ErrorKind::UnknownMarket,
            Self::Backend { .. } => ErrorKind::BackendError,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::Stale { .. } | Self::Backend { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_render_snake_case() {
        let err = Error::from(CheckpointError::Conflict {
            market: "sol-usdc".to_string(),
            current: 10,
            requested: 5,
        });
        assert_eq!(err.kind(), ErrorKind::CheckpointConflict);
        assert_eq!(err.kind().to_string(), "checkpoint_conflict");
        assert!(err.is_transient());
    }

    #[test]
    fn corrupt_checkpoint_is_not_retryable() {
        let err = Error::from(CheckpointError::Corrupt {
            market: "m".to_string(),
            diagnostics: vec!["a".to_string(), "b".to_string()],
        });
        assert!(!err.is_transient());
        assert_eq!(err.to_string(), "checkpoint for market m is corrupt: a; b");
    }

    #[test]
    fn io_and_timeouts_are_transient() {
        let timeout = Error::Timeout {
            operation: "ledger fetch",
            after: Duration::from_secs(3),
        };
        assert!(timeout.is_transient());
        assert_eq!(timeout.kind().as_ref(), "timeout");
        let index = Error::Index {
            reason: "bad account index".into(),
        };
        assert!(!index.is_transient());
    }
}
