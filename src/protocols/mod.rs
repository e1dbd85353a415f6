pub mod dca;
pub mod kamino;
pub mod limit_v1;
pub mod limit_v2;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use solana_pubkey::{Pubkey, pubkey};

use crate::decoder::{DecodedInstruction, DecodingSchema};
use crate::error::Error;
use crate::indexer::InstructionIndexer;
use crate::types::{DomainEvent, MakeEvent, TakeEvent, TransactionContext};

pub const JUPITER_DCA_PROGRAM_ID: Pubkey = pubkey!("DCA265Vj8a9CEuX1eb1LWRnDT7uK6q1xMipnNyatn23M");
pub const JUPITER_LIMIT_ORDER_PROGRAM_ID: Pubkey =
    pubkey!("jupoNjAxXgZ4rjzxzPMP4oxduvQsQtZzyknqvzYNrNu");
pub const JUPITER_LIMIT_ORDER_2_PROGRAM_ID: Pubkey =
    pubkey!("j1o2qRpjcyUwEvwtcfhEQefh773ZgjxcVRry7LDqg5X");
pub const KAMINO_LIMIT_ORDER_PROGRAM_ID: Pubkey =
    pubkey!("LiMoM9rMhrdYrfzUCxQppvxCSG1FcrUK9G8uLq4A1GF");

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Protocol {
    Dca,
    LimitV1,
    LimitV2,
    Kamino,
}

impl Protocol {
    pub const ALL: [Self; 4] = [Self::Dca, Self::LimitV1, Self::LimitV2, Self::Kamino];

    pub fn from_program_id(program_id: &Pubkey) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.program_id() == *program_id)
    }

    pub fn program_id(self) -> Pubkey {
        match self {
            Self::Dca => JUPITER_DCA_PROGRAM_ID,
            Self::LimitV1 => JUPITER_LIMIT_ORDER_PROGRAM_ID,
            Self::LimitV2 => JUPITER_LIMIT_ORDER_2_PROGRAM_ID,
            Self::Kamino => KAMINO_LIMIT_ORDER_PROGRAM_ID,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dca => "dca",
            Self::LimitV1 => "limit_v1",
            Self::LimitV2 => "limit_v2",
            Self::Kamino => "kamino",
        }
    }

    /// Human-readable name used in diagnostics.
    pub fn label(self) -> &'static str {
        match self {
            Self::Dca => "DCA",
            Self::LimitV1 => "Limit v1",
            Self::LimitV2 => "Limit v2",
            Self::Kamino => "Kamino",
        }
    }
}

pub fn schema_for(protocol: Protocol) -> DecodingSchema {
    match protocol {
        Protocol::Dca => dca::schema(),
        Protocol::LimitV1 => limit_v1::schema(),
        Protocol::LimitV2 => limit_v2::schema(),
        Protocol::Kamino => kamino::schema(),
    }
}

pub fn indexer_for(protocol: Protocol) -> &'static dyn InstructionIndexer {
    match protocol {
        Protocol::Dca => &dca::DcaIndexer,
        Protocol::LimitV1 => &limit_v1::LimitV1Indexer,
        Protocol::LimitV2 => &limit_v2::LimitV2Indexer,
        Protocol::Kamino => &kamino::KaminoIndexer,
    }
}

/// Deserialize a decoded instruction into a program's instruction enum.
///
/// Returns `Ok(None)` for unrecognized data and for variants `variants` does
/// not list; a listed variant whose fields do not fit is an index error.
pub(crate) fn parse_instruction<T: DeserializeOwned>(
    protocol: Protocol,
    decoded: &DecodedInstruction,
    variants: &[&str],
) -> Result<Option<T>, Error> {
    let (Some(name), Some(envelope)) = (decoded.name(), decoded.envelope()) else {
        return Ok(None);
    };
    if !variants.contains(&name) {
        return Ok(None);
    }
    serde_json::from_value(envelope)
        .map(Some)
        .map_err(|err| Error::Index {
            reason: format!("failed to parse {} {name} args: {err}", protocol.label()),
        })
}

/// Account at `idx` of the instruction, base58-encoded.
pub(crate) fn account_at(
    ctx: &TransactionContext<'_>,
    ix_index: u32,
    idx: usize,
    protocol: Protocol,
    instruction_name: &str,
) -> Result<String, Error> {
    ctx.accounts(ix_index)
        .get(idx)
        .map(ToString::to_string)
        .ok_or_else(|| Error::Index {
            reason: format!(
                "{} account index {idx} out of bounds for {instruction_name}",
                protocol.label()
            ),
        })
}

pub(crate) struct MakeParts {
    pub maker: String,
    pub order: String,
    pub input_mint: String,
    pub output_mint: String,
    pub making_amount: u64,
    pub taking_amount: u64,
    pub expired_at: Option<i64>,
}

pub(crate) struct TakeParts {
    pub taker: String,
    pub order: String,
    pub making_amount: u64,
    pub taking_amount: u64,
}

pub(crate) fn make_event(
    ctx: &TransactionContext<'_>,
    ix_index: u32,
    protocol: Protocol,
    parts: MakeParts,
) -> DomainEvent {
    let MakeParts {
        maker,
        order,
        input_mint,
        output_mint,
        making_amount,
        taking_amount,
        expired_at,
    } = parts;
    DomainEvent::Make(MakeEvent {
        origin: ctx.origin(ix_index),
        market: ctx.market.to_string(),
        protocol,
        signature: ctx.transaction.signature.clone(),
        maker,
        order,
        input_mint,
        output_mint,
        making_amount,
        taking_amount,
        expired_at,
    })
}

pub(crate) fn take_event(
    ctx: &TransactionContext<'_>,
    ix_index: u32,
    protocol: Protocol,
    parts: TakeParts,
) -> DomainEvent {
    let TakeParts {
        taker,
        order,
        making_amount,
        taking_amount,
    } = parts;
    DomainEvent::Take(TakeEvent {
        origin: ctx.origin(ix_index),
        market: ctx.market.to_string(),
        protocol,
        signature: ctx.transaction.signature.clone(),
        taker,
        order,
        making_amount,
        taking_amount,
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    use solana_pubkey::Pubkey;

    use crate::decoder::{DecodedInstruction, anchor_discriminator, decode};
    use crate::protocols::{Protocol, schema_for};
    use crate::types::{RawInstruction, RawTransaction};

    pub fn key(seed: u8) -> Pubkey {
        Pubkey::new_from_array([seed; 32])
    }

    pub fn accounts(count: u8) -> Vec<Pubkey> {
        (1..=count).map(key).collect()
    }

    pub fn instruction(
        protocol: Protocol,
        name: &str,
        body: &[u8],
        accounts: Vec<Pubkey>,
    ) -> RawInstruction {
        RawInstruction {
            program_id: protocol.program_id(),
            accounts,
            data: [anchor_discriminator(name).as_slice(), body].concat(),
        }
    }

    pub fn transaction(
        block: u64,
        tx_index: u32,
        instructions: Vec<RawInstruction>,
    ) -> RawTransaction {
        RawTransaction {
            block,
            tx_index,
            signature: format!("sig-{block}-{tx_index}"),
            success: true,
            instructions,
        }
    }

    pub fn decoded(protocol: Protocol, ix: &RawInstruction) -> DecodedInstruction {
        decode(&schema_for(protocol), &ix.data)
            .unwrap_or_else(|error| DecodedInstruction::Unrecognized { error })
    }

    pub fn le(values: &[u64]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }
}
