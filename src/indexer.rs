use crate::decoder::DecodedInstruction;
use crate::error::Error;
use crate::protocols::Protocol;
use crate::types::{DomainEvent, TransactionContext};

/// Whether an indexer turns instructions into events yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum IndexerStatus {
    Implemented,
    /// Schema is registered but no events are produced; instructions are counted and skipped.
    Pending,
}

/// Turns one decoded instruction into domain events.
///
/// Implementations must be pure: the same context, index and decoded
/// instruction always yield the same events. Unknown variants and
/// [`DecodedInstruction::Unrecognized`] yield an empty list.
pub trait InstructionIndexer: Send + Sync {
    fn protocol(&self) -> Option<Protocol>;

    fn status(&self) -> IndexerStatus {
        IndexerStatus::Implemented
    }

    fn index_instruction(
        &self,
        ctx: &TransactionContext<'_>,
        ix_index: u32,
        decoded: &DecodedInstruction,
    ) -> Result<Vec<DomainEvent>, Error>;
}

/// Default for programs without a registered schema.
#[derive(Debug)]
pub struct NoopIndexer;

pub static NOOP_INDEXER: NoopIndexer = NoopIndexer;

impl InstructionIndexer for NoopIndexer {
    fn protocol(&self) -> Option<Protocol> {
        None
    }

    fn index_instruction(
        &self,
        _ctx: &TransactionContext<'_>,
        _ix_index: u32,
        _decoded: &DecodedInstruction,
    ) -> Result<Vec<DomainEvent>, Error> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "test assertions")]
mod tests {
    use super::*;
    use crate::types::RawTransaction;

    #[test]
    fn noop_indexer_yields_nothing() {
        let tx = RawTransaction {
            block: 1,
            tx_index: 0,
            signature: "s".to_string(),
            success: true,
            instructions: vec![],
        };
        let ctx = TransactionContext {
            market: "m",
            transaction: &tx,
        };
        let decoded = DecodedInstruction::Known {
            name: "Anything",
            args: serde_json::json!({}),
        };
        let events = NOOP_INDEXER.index_instruction(&ctx, 0, &decoded).unwrap();
        assert!(events.is_empty());
        assert_eq!(NOOP_INDEXER.status(), IndexerStatus::Implemented);
        assert_eq!(IndexerStatus::Pending.to_string(), "pending");
    }
}
