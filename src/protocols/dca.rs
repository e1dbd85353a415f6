//! Jupiter DCA is decoded but not yet indexed.
//!
//! DCA fills are scheduled swaps routed through other venues rather than
//! takes against a resting order, so they do not map onto make/take events.
//! The schema is registered so DCA instructions are recognized and counted;
//! the indexer reports itself as [`IndexerStatus::Pending`].

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::decoder::{DecodedInstruction, DecodingSchema, InstructionLayout, NoArgs};
use crate::error::Error;
use crate::indexer::{IndexerStatus, InstructionIndexer};
use crate::protocols::Protocol;
use crate::types::{DomainEvent, TransactionContext};

pub fn schema() -> DecodingSchema {
    DecodingSchema::new(
        Protocol::Dca,
        Protocol::Dca.program_id(),
        vec![
            InstructionLayout::anchor::<OpenDcaV2Args>("OpenDcaV2"),
            InstructionLayout::anchor::<NoArgs>("CloseDca"),
            InstructionLayout::anchor::<NoArgs>("EndAndClose"),
        ],
    )
}

#[derive(Debug, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct OpenDcaV2Args {
    pub application_idx: u64,
    pub in_amount: u64,
    pub in_amount_per_cycle: u64,
    pub cycle_frequency: i64,
    pub min_out_amount: Option<u64>,
    pub max_out_amount: Option<u64>,
    pub start_at: Option<i64>,
}

#[derive(Debug)]
pub struct DcaIndexer;

impl InstructionIndexer for DcaIndexer {
    fn protocol(&self) -> Option<Protocol> {
        Some(Protocol::Dca)
    }

    fn status(&self) -> IndexerStatus {
        IndexerStatus::Pending
    }

    fn index_instruction(
        &self,
        ctx: &TransactionContext<'_>,
        ix_index: u32,
        decoded: &DecodedInstruction,
    ) -> Result<Vec<DomainEvent>, Error> {
        if let Some(name) = decoded.name() {
            tracing::debug!(
                origin = %ctx.origin(ix_index),
                instruction = name,
                "DCA indexing pending, instruction skipped"
            );
        }
        Ok(Vec::new())
    }
}
