use borsh::{BorshDeserialize, BorshSerialize};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use strum::VariantNames;

use crate::decoder::{DecodedInstruction, DecodingSchema, InstructionLayout, NoArgs};
use crate::error::Error;
use crate::indexer::InstructionIndexer;
use crate::protocols::{
    MakeParts, Protocol, TakeParts, account_at, make_event, parse_instruction, take_event,
};
use crate::types::{DomainEvent, TransactionContext};

pub const MAX_FEE_BPS: u16 = 10_000;

pub fn schema() -> DecodingSchema {
    DecodingSchema::new(
        Protocol::LimitV2,
        Protocol::LimitV2.program_id(),
        vec![
            InstructionLayout::anchor::<ParamsWrapper<InitializeOrderParams>>("InitializeOrder"),
            InstructionLayout::anchor::<ParamsWrapper<PreFlashFillOrderParams>>(
                "PreFlashFillOrder",
            ),
            InstructionLayout::anchor::<ParamsWrapper<FlashFillOrderParams>>("FlashFillOrder"),
            InstructionLayout::anchor::<NoArgs>("CancelOrder"),
            InstructionLayout::anchor::<UpdateFeeArgs>("UpdateFee"),
            InstructionLayout::anchor::<NoArgs>("WithdrawFee"),
        ],
    )
}

#[derive(Deserialize, strum_macros::VariantNames)]
pub enum LimitV2Instruction {
    InitializeOrder(ParamsWrapper<InitializeOrderParams>),
    PreFlashFillOrder(IgnoredAny),
    FlashFillOrder(ParamsWrapper<FlashFillOrderParams>),
    CancelOrder(IgnoredAny),
    UpdateFee(IgnoredAny),
    WithdrawFee(IgnoredAny),
}

/// Limit v2 instructions take a single `params` struct argument.
#[derive(Debug, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct ParamsWrapper<T> {
    pub params: T,
}

#[derive(Debug, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct InitializeOrderParams {
    pub unique_id: u64,
    pub making_amount: u64,
    pub taking_amount: u64,
    pub expired_at: Option<i64>,
    #[serde(default)]
    pub fee_bps: Option<u16>,
}

#[derive(Debug, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct PreFlashFillOrderParams {
    pub making_amount: u64,
}

#[derive(Debug, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct FlashFillOrderParams {
    pub input_amount: u64,
    pub output_amount: u64,
}

#[derive(Debug, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct UpdateFeeArgs {
    pub maker_fee_bps: u16,
    pub taker_fee_bps: u16,
}

mod account_index {
    pub const INIT_MAKER: usize = 1;
    pub const INIT_ORDER: usize = 2;
    pub const INIT_INPUT_MINT: usize = 7;
    pub const INIT_OUTPUT_MINT: usize = 8;
    pub const FILL_TAKER: usize = 0;
    pub const FILL_ORDER: usize = 2;
}

#[derive(Debug)]
pub struct LimitV2Indexer;

impl InstructionIndexer for LimitV2Indexer {
    fn protocol(&self) -> Option<Protocol> {
        Some(Protocol::LimitV2)
    }

    fn index_instruction(
        &self,
        ctx: &TransactionContext<'_>,
        ix_index: u32,
        decoded: &DecodedInstruction,
    ) -> Result<Vec<DomainEvent>, Error> {
        let Some(ix) = parse_instruction::<LimitV2Instruction>(
            Protocol::LimitV2,
            decoded,
            LimitV2Instruction::VARIANTS,
        )?
        else {
            return Ok(Vec::new());
        };

        let account =
            |idx: usize, name: &str| account_at(ctx, ix_index, idx, Protocol::LimitV2, name);

        let event = match ix {
            LimitV2Instruction::InitializeOrder(ParamsWrapper { params }) => {
                let name = "InitializeOrder";
                if let Some(fee_bps) = params.fee_bps
                    && fee_bps > MAX_FEE_BPS
                {
                    return Err(Error::Index {
                        reason: format!(
                            "Limit v2 fee_bps {fee_bps} exceeds {MAX_FEE_BPS} (order {})",
                            params.unique_id
                        ),
                    });
                }
                make_event(
                    ctx,
                    ix_index,
                    Protocol::LimitV2,
                    MakeParts {
                        maker: account(account_index::INIT_MAKER, name)?,
                        order: account(account_index::INIT_ORDER, name)?,
                        input_mint: account(account_index::INIT_INPUT_MINT, name)?,
                        output_mint: account(account_index::INIT_OUTPUT_MINT, name)?,
                        making_amount: params.making_amount,
                        taking_amount: params.taking_amount,
                        expired_at: params.expired_at,
                    },
                )
            }
            LimitV2Instruction::FlashFillOrder(ParamsWrapper { params }) => {
                let name = "FlashFillOrder";
                take_event(
                    ctx,
                    ix_index,
                    Protocol::LimitV2,
                    TakeParts {
                        taker: account(account_index::FILL_TAKER, name)?,
                        order: account(account_index::FILL_ORDER, name)?,
                        making_amount: params.input_amount,
                        taking_amount: params.output_amount,
                    },
                )
            }
            LimitV2Instruction::PreFlashFillOrder(_)
            | LimitV2Instruction::CancelOrder(_)
            | LimitV2Instruction::UpdateFee(_)
            | LimitV2Instruction::WithdrawFee(_) => return Ok(Vec::new()),
        };

        Ok(vec![event])
    }
}
