use std::sync::Arc;

use serde::Serialize;

use crate::decoder::{DecodeError, DecodedInstruction, DecoderRegistry};
use crate::error::Error;
use crate::indexer::IndexerStatus;
use crate::ledger::LedgerClient;
use crate::types::{DomainEvent, Market, RawTransaction, TransactionContext};

/// Counters describing what one extraction saw and skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionReport {
    pub transactions_seen: usize,
    pub duplicate_deliveries: usize,
    pub failed_transactions: usize,
    pub instructions: usize,
    pub unknown_program_instructions: usize,
    pub decode_failures: usize,
    pub index_failures: usize,
    pub pending_instructions: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    /// Events in origin-key order.
    pub events: Vec<DomainEvent>,
    pub report: ExtractionReport,
}

/// Turns ledger history for a market into ordered domain events.
pub struct MarketEventExtractor {
    registry: Arc<DecoderRegistry>,
    ledger: Arc<dyn LedgerClient>,
}

impl MarketEventExtractor {
    pub fn new(registry: Arc<DecoderRegistry>, ledger: Arc<dyn LedgerClient>) -> Self {
        Self { registry, ledger }
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerClient> {
        &self.ledger
    }

    pub async fn fetch_events(
        &self,
        market: &Market,
        start: u64,
        end: u64,
    ) -> Result<Vec<DomainEvent>, Error> {
        Ok(self.extract(market, start, end).await?.events)
    }

    /// Orders created in a single block.
    pub async fn fetch_makes(
        &self,
        market: &Market,
        block: u64,
    ) -> Result<Vec<DomainEvent>, Error> {
        let mut events = self.fetch_events(market, block, block).await?;
        events.retain(DomainEvent::is_make);
        Ok(events)
    }

    pub async fn fetch_takes(
        &self,
        market: &Market,
        start: u64,
        end: u64,
    ) -> Result<Vec<DomainEvent>, Error> {
        let mut events = self.fetch_events(market, start, end).await?;
        events.retain(DomainEvent::is_take);
        Ok(events)
    }

    /// Events for `[start, end]` plus counters. Only ledger failures and
    /// out-of-range deliveries fail the call; bad instructions are skipped.
    pub async fn extract(
        &self,
        market: &Market,
        start: u64,
        end: u64,
    ) -> Result<Extraction, Error> {
        if start > end {
            return Ok(Extraction::default());
        }

        let mut transactions = self
            .ledger
            .get_transactions(&market.accounts, start, end)
            .await?;
        if let Some(stray) = transactions
            .iter()
            .find(|tx| tx.block < start || tx.block > end)
        {
            return Err(Error::Fetch {
                reason: format!(
                    "{}: ledger returned block {} (tx {}) outside requested range {start}..={end}",
                    market.name, stray.block, stray.tx_index
                ),
            });
        }

        transactions.sort_by_key(|tx| (tx.block, tx.tx_index));
        let delivered = transactions.len();
        transactions.dedup_by_key(|tx| (tx.block, tx.tx_index));

        let mut extraction = Extraction::default();
        extraction.report.duplicate_deliveries = delivered - transactions.len();

        for tx in &transactions {
            self.extract_transaction(market, tx, &mut extraction);
        }

        tracing::debug!(
            market = %market.name,
            start,
            end,
            events = extraction.events.len(),
            report = ?extraction.report,
            "extracted block range"
        );
        Ok(extraction)
    }

    fn extract_transaction(&self, market: &Market, tx: &RawTransaction, out: &mut Extraction) {
        let report = &mut out.report;
        report.transactions_seen += 1;
        if !tx.success {
            report.failed_transactions += 1;
            return;
        }

        let ctx = TransactionContext {
            market: &market.name,
            transaction: tx,
        };
        for (ix_index, ix) in (0u32..).zip(&tx.instructions) {
            report.instructions += 1;

            let decoded = self
                .registry
                .decode_or_unrecognized(&ix.program_id, &ix.data);
            if let DecodedInstruction::Unrecognized { error } = &decoded {
                if matches!(error, DecodeError::UnknownProgram(_)) {
                    report.unknown_program_instructions += 1;
                } else {
                    tracing::warn!(
                        market = %market.name,
                        origin = %ctx.origin(ix_index),
                        program = %ix.program_id,
                        error = %error,
                        "skipping undecodable instruction"
                    );
                    report.decode_failures += 1;
                }
                continue;
            }

            let indexer = self.registry.indexer(&ix.program_id);
            if indexer.status() == IndexerStatus::Pending {
                report.pending_instructions += 1;
            }
            match indexer.index_instruction(&ctx, ix_index, &decoded) {
                Ok(events) => out.events.extend(events),
                Err(err) => {
                    tracing::warn!(
                        market = %market.name,
                        origin = %ctx.origin(ix_index),
                        program = %ix.program_id,
                        error = %err,
                        "skipping instruction that failed to index"
                    );
                    report.index_failures += 1;
                }
            }
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "test assertions")]
mod tests {
    use solana_pubkey::Pubkey;

    use super::*;
    use crate::ledger::MemoryLedger;
    use crate::protocols::Protocol;
    use crate::protocols::fixtures::{accounts, instruction, le, transaction};
    use crate::types::RawInstruction;

    fn market() -> Market {
        Market {
            name: "sol-usdc".to_string(),
            program: Protocol::LimitV1,
            accounts: vec![],
            floor_block: 0,
        }
    }

    fn fill(amount: u64) -> RawInstruction {
        let body = le(&[amount, 1]);
        instruction(Protocol::LimitV1, "FillOrder", &body, accounts(4))
    }

    fn extractor(txs: Vec<RawTransaction>) -> MarketEventExtractor {
        MarketEventExtractor::new(
            Arc::new(DecoderRegistry::builtin()),
            Arc::new(MemoryLedger::with_transactions(txs)),
        )
    }

    #[tokio::test]
    async fn reversed_range_skips_the_ledger() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.fail_next(1);
        let extractor = MarketEventExtractor::new(Arc::new(DecoderRegistry::builtin()), ledger);
        let extraction = extractor.extract(&market(), 10, 9).await.unwrap();
        assert_eq!(extraction, Extraction::default());
    }

    #[tokio::test]
    async fn failed_and_duplicate_transactions_are_skipped() {
        let mut failed = transaction(5, 1, vec![fill(2)]);
        failed.success = false;
        let ok = transaction(5, 0, vec![fill(1)]);
        let extraction = extractor(vec![ok.clone(), failed, ok])
            .extract(&market(), 5, 5)
            .await
            .unwrap();

        assert_eq!(extraction.events.len(), 1);
        assert_eq!(extraction.report.transactions_seen, 2);
        assert_eq!(extraction.report.duplicate_deliveries, 1);
        assert_eq!(extraction.report.failed_transactions, 1);
    }

    #[tokio::test]
    async fn bad_instructions_are_counted_not_fatal() {
        let mut truncated = fill(3);
        truncated.data.truncate(10);
        let unknown = RawInstruction {
            program_id: Pubkey::new_from_array([42; 32]),
            accounts: vec![],
            data: vec![1, 2, 3],
        };
        let short_accounts = instruction(Protocol::LimitV1, "FillOrder", &le(&[1, 1]), accounts(1));
        let tx = transaction(8, 0, vec![truncated, unknown, short_accounts, fill(4)]);

        let extraction = extractor(vec![tx]).extract(&market(), 0, 10).await.unwrap();
        let report = extraction.report;
        assert_eq!(report.instructions, 4);
        assert_eq!(report.decode_failures, 1);
        assert_eq!(report.unknown_program_instructions, 1);
        assert_eq!(report.index_failures, 1);
        assert_eq!(extraction.events.len(), 1);
        assert_eq!(extraction.events[0].origin().ix_index, 3);
    }

    #[tokio::test]
    async fn makes_and_takes_split() {
        let mut init = le(&[1_000, 250]);
        init.push(0);
        let make = instruction(Protocol::LimitV1, "InitializeOrder", &init, accounts(9));
        let extractor = extractor(vec![transaction(3, 0, vec![make, fill(9)])]);

        let makes = extractor.fetch_makes(&market(), 3).await.unwrap();
        let takes = extractor.fetch_takes(&market(), 0, 3).await.unwrap();
        assert_eq!(makes.len(), 1);
        assert!(makes[0].is_make());
        assert_eq!(takes.len(), 1);
        assert!(takes[0].is_take());
        let empty = extractor.fetch_makes(&market(), 4).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn pending_program_is_counted() {
        let open = instruction(Protocol::Dca, "CloseDca", &[], accounts(2));
        let extraction = extractor(vec![transaction(1, 0, vec![open])])
            .extract(&market(), 1, 1)
            .await
            .unwrap();
        assert!(extraction.events.is_empty());
        assert_eq!(extraction.report.pending_instructions, 1);
    }
}
