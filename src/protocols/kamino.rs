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
        Protocol::Kamino,
        Protocol::Kamino.program_id(),
        vec![
            InstructionLayout::anchor::<CreateOrderArgs>("CreateOrder"),
            InstructionLayout::anchor::<TakeOrderArgs>("TakeOrder"),
            InstructionLayout::anchor::<TakeOrderArgs>("FlashTakeOrderStart"),
            InstructionLayout::anchor::<TakeOrderArgs>("FlashTakeOrderEnd"),
            InstructionLayout::anchor::<NoArgs>("CloseOrderAndClaimTip"),
        ],
    )
}

#[derive(Deserialize, strum_macros::VariantNames)]
pub enum KaminoInstruction {
    CreateOrder(CreateOrderArgs),
    TakeOrder(TakeOrderArgs),
    FlashTakeOrderStart(IgnoredAny),
    FlashTakeOrderEnd(TakeOrderArgs),
    CloseOrderAndClaimTip(IgnoredAny),
}

#[derive(Debug, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct CreateOrderArgs {
    pub input_amount: u64,
    pub output_amount: u64,
    pub order_type: u8,
}

#[derive(Debug, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct TakeOrderArgs {
    pub input_amount: u64,
    pub min_output_amount: u64,
    #[serde(default)]
    pub tip_amount_permissionless_taking: u64,
}

mod account_index {
    pub const CREATE_MAKER: usize = 0;
    pub const CREATE_ORDER: usize = 3;
    pub const CREATE_INPUT_MINT: usize = 4;
    pub const CREATE_OUTPUT_MINT: usize = 5;
    pub const TAKE_TAKER: usize = 0;
    pub const TAKE_ORDER: usize = 4;
}

#[derive(Debug)]
pub struct KaminoIndexer;

impl InstructionIndexer for KaminoIndexer {
    fn protocol(&self) -> Option<Protocol> {
        Some(Protocol::Kamino)
    }

    fn index_instruction(
        &self,
        ctx: &TransactionContext<'_>,
        ix_index: u32,
        decoded: &DecodedInstruction,
    ) -> Result<Vec<DomainEvent>, Error> {
        let Some(ix) = parse_instruction::<KaminoInstruction>(
            Protocol::Kamino,
            decoded,
            KaminoInstruction::VARIANTS,
        )?
        else {
            return Ok(Vec::new());
        };

        let account =
            |idx: usize, name: &str| account_at(ctx, ix_index, idx, Protocol::Kamino, name);

        let (name, args) = match ix {
            KaminoInstruction::CreateOrder(args) => {
                let name = "CreateOrder";
                tracing::trace!(order_type = args.order_type, "kamino create order");
                return Ok(vec![make_event(
                    ctx,
                    ix_index,
                    Protocol::Kamino,
                    MakeParts {
                        maker: account(account_index::CREATE_MAKER, name)?,
                        order: account(account_index::CREATE_ORDER, name)?,
                        input_mint: account(account_index::CREATE_INPUT_MINT, name)?,
                        output_mint: account(account_index::CREATE_OUTPUT_MINT, name)?,
                        making_amount: args.input_amount,
                        taking_amount: args.output_amount,
                        expired_at: None,
                    },
                )]);
            }
            KaminoInstruction::TakeOrder(args) => ("TakeOrder", args),
            KaminoInstruction::FlashTakeOrderEnd(args) => ("FlashTakeOrderEnd", args),
            KaminoInstruction::FlashTakeOrderStart(_)
            | KaminoInstruction::CloseOrderAndClaimTip(_) => return Ok(Vec::new()),
        };

        Ok(vec![take_event(
            ctx,
            ix_index,
            Protocol::Kamino,
            TakeParts {
                taker: account(account_index::TAKE_TAKER, name)?,
                order: account(account_index::TAKE_ORDER, name)?,
                making_amount: args.input_amount,
                taking_amount: args.min_output_amount,
            },
        )])
    }
}
