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

pub fn schema() -> DecodingSchema {
    DecodingSchema::new(
        Protocol::LimitV1,
        Protocol::LimitV1.program_id(),
        vec![
            InstructionLayout::anchor::<InitializeOrderArgs>("InitializeOrder"),
            InstructionLayout::anchor::<FillOrderArgs>("FillOrder"),
            InstructionLayout::anchor::<PreFlashFillOrderArgs>("PreFlashFillOrder"),
            InstructionLayout::anchor::<FillOrderArgs>("FlashFillOrder"),
            InstructionLayout::anchor::<NoArgs>("CancelOrder"),
            InstructionLayout::anchor::<NoArgs>("CancelExpiredOrder"),
        ],
    )
}

#[derive(Deserialize, strum_macros::VariantNames)]
pub enum LimitV1Instruction {
    InitializeOrder(InitializeOrderArgs),
    FillOrder(FillOrderArgs),
    PreFlashFillOrder(IgnoredAny),
    FlashFillOrder(FillOrderArgs),
    CancelOrder(IgnoredAny),
    CancelExpiredOrder(IgnoredAny),
}

#[derive(Debug, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct InitializeOrderArgs {
    pub making_amount: u64,
    pub taking_amount: u64,
    pub expired_at: Option<i64>,
}

#[derive(Debug, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct FillOrderArgs {
    pub making_amount: u64,
    pub max_taking_amount: u64,
}

#[derive(Debug, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct PreFlashFillOrderArgs {
    pub making_amount: u64,
}

mod account_index {
    pub const INIT_MAKER: usize = 1;
    pub const INIT_ORDER: usize = 2;
    pub const INIT_INPUT_MINT: usize = 5;
    pub const INIT_OUTPUT_MINT: usize = 8;
    pub const FILL_ORDER: usize = 0;
    pub const FILL_TAKER: usize = 3;
}

#[derive(Debug)]
pub struct LimitV1Indexer;

impl InstructionIndexer for LimitV1Indexer {
    fn protocol(&self) -> Option<Protocol> {
        Some(Protocol::LimitV1)
    }

    fn index_instruction(
        &self,
        ctx: &TransactionContext<'_>,
        ix_index: u32,
        decoded: &DecodedInstruction,
    ) -> Result<Vec<DomainEvent>, Error> {
        let Some(ix) = parse_instruction::<LimitV1Instruction>(
            Protocol::LimitV1,
            decoded,
            LimitV1Instruction::VARIANTS,
        )?
        else {
            return Ok(Vec::new());
        };

        let account =
            |idx: usize, name: &str| account_at(ctx, ix_index, idx, Protocol::LimitV1, name);

        let event = match ix {
            LimitV1Instruction::InitializeOrder(args) => {
                let name = "InitializeOrder";
                make_event(
                    ctx,
                    ix_index,
                    Protocol::LimitV1,
                    MakeParts {
                        maker: account(account_index::INIT_MAKER, name)?,
                        order: account(account_index::INIT_ORDER, name)?,
                        input_mint: account(account_index::INIT_INPUT_MINT, name)?,
                        output_mint: account(account_index::INIT_OUTPUT_MINT, name)?,
                        making_amount: args.making_amount,
                        taking_amount: args.taking_amount,
                        expired_at: args.expired_at,
                    },
                )
            }
            LimitV1Instruction::FillOrder(args) => {
                fill_event(ctx, ix_index, "FillOrder", &args, &account)?
            }
            LimitV1Instruction::FlashFillOrder(args) => {
                fill_event(ctx, ix_index, "FlashFillOrder", &args, &account)?
            }
            LimitV1Instruction::PreFlashFillOrder(_)
            | LimitV1Instruction::CancelOrder(_)
            | LimitV1Instruction::CancelExpiredOrder(_) => return Ok(Vec::new()),
        };

        Ok(vec![event])
    }
}

fn fill_event(
    ctx: &TransactionContext<'_>,
    ix_index: u32,
    name: &str,
    args: &FillOrderArgs,
    account: &impl Fn(usize, &str) -> Result<String, Error>,
) -> Result<DomainEvent, Error> {
    Ok(take_event(
        ctx,
        ix_index,
        Protocol::LimitV1,
        TakeParts {
            taker: account(account_index::FILL_TAKER, name)?,
            order: account(account_index::FILL_ORDER, name)?,
            making_amount: args.making_amount,
            taking_amount: args.max_taking_amount,
        },
    ))
}
