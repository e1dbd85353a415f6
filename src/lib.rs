#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::dbg_macro,
        clippy::print_stdout,
        clippy::print_stderr,
        clippy::panic,
    )
)]

pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod decoder;
pub mod error;
pub mod extractor;
pub mod heartbeat;
pub mod indexer;
pub mod ingest;
pub mod ledger;
pub mod protocols;
pub mod store;
pub mod types;

pub use checkpoint::{
    Checkpoint, CheckpointBackend, CheckpointStatus, CheckpointStore, FileCheckpointBackend,
    MemoryCheckpointBackend,
};
pub use config::IndexerConfig;
pub use decoder::{DecodeError, DecodedInstruction, DecoderRegistry, DecodingSchema};
pub use error::{CheckpointError, Error, ErrorKind};
pub use extractor::{Extraction, ExtractionReport, MarketEventExtractor};
pub use indexer::{IndexerStatus, InstructionIndexer};
pub use ingest::{CycleOutcome, IngestSettings, IngestStats, IngestWorker, Ingestor};
pub use ledger::{JsonLedger, LedgerClient, MemoryLedger};
pub use protocols::Protocol;
pub use store::{EventStore, JsonlEventStore, MemoryEventStore, UpsertSummary};
pub use types::{
    DomainEvent, MakeEvent, Market, OriginKey, RawInstruction, RawTransaction, TakeEvent,
};
