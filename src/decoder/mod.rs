//! Program schemas and the registry that routes instructions to them.
//!
//! A [`DecodingSchema`] lists every instruction a program accepts: an 8-byte
//! Anchor discriminator followed by borsh-encoded arguments. Each
//! [`InstructionLayout`] carries the borsh type its arguments decode into.
//! The [`DecoderRegistry`] is built once at startup and only read afterwards,
//! so it can be shared across ingestion tasks behind an `Arc` without locking.

use std::collections::HashMap;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use solana_pubkey::Pubkey;

use crate::indexer::{InstructionIndexer, NOOP_INDEXER};
use crate::protocols::{self, Protocol};

pub type Discriminator = [u8; 8];

type ArgsDecoder = fn(&mut &[u8]) -> borsh::io::Result<serde_json::Value>;

/// Arguments of an instruction that takes none.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct NoArgs {}

#[derive(Debug, Clone)]
pub struct InstructionLayout {
    pub name: &'static str,
    pub discriminator: Discriminator,
    decode_args: ArgsDecoder,
}

impl InstructionLayout {
    /// Anchor instruction whose arguments borsh-decode as `T`. The
    /// discriminator is derived from `name`.
    pub fn anchor<T>(name: &'static str) -> Self
    where
        T: BorshDeserialize + Serialize,
    {
        Self {
            name,
            discriminator: anchor_discriminator(name),
            decode_args: args_to_json::<T>,
        }
    }
}

fn args_to_json<T>(data: &mut &[u8]) -> borsh::io::Result<serde_json::Value>
where
    T: BorshDeserialize + Serialize,
{
    let args = T::deserialize(data)?;
    serde_json::to_value(args).map_err(borsh::io::Error::other)
}

/// First 8 bytes of `sha256("global:<snake_case_name>")`.
pub fn anchor_discriminator(name: &str) -> Discriminator {
    let preimage = format!("global:{}", to_snake_case(name));
    let hash = Sha256::digest(preimage.as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&hash[..8]);
    out
}

fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct DecodingSchema {
    pub protocol: Protocol,
    pub program_id: Pubkey,
    instructions: Vec<InstructionLayout>,
    by_discriminator: HashMap<Discriminator, usize>,
}

impl DecodingSchema {
    pub fn new(
        protocol: Protocol,
        program_id: Pubkey,
        instructions: Vec<InstructionLayout>,
    ) -> Self {
        let by_discriminator = instructions
            .iter()
            .enumerate()
            .map(|(i, layout)| (layout.discriminator, i))
            .collect();
        Self {
            protocol,
            program_id,
            instructions,
            by_discriminator,
        }
    }

    pub fn instructions(&self) -> &[InstructionLayout] {
        &self.instructions
    }

    pub fn layout(&self, discriminator: &Discriminator) -> Option<&InstructionLayout> {
        self.by_discriminator
            .get(discriminator)
            .and_then(|&i| self.instructions.get(i))
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("no schema registered for program {0}")]
    UnknownProgram(Pubkey),

    #[error("instruction data is shorter than a discriminator")]
    Empty,

    #[error("unknown discriminator {0:02x?}")]
    UnknownDiscriminator(Discriminator),

    #[error("malformed {instruction} args: {reason}")]
    Malformed {
        instruction: &'static str,
        reason: String,
    },

    #[error("{count} trailing bytes after {instruction} args")]
    TrailingBytes {
        instruction: &'static str,
        count: usize,
    },
}

/// Result of running instruction bytes through a schema.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedInstruction {
    Known {
        name: &'static str,
        /// Typed fields as a JSON object keyed by field name.
        args: serde_json::Value,
    },
    Unrecognized {
        error: DecodeError,
    },
}

impl DecodedInstruction {
    pub fn name(&self) -> Option<&'static str> {
        match self {
            Self::Known { name, .. } => Some(name),
            Self::Unrecognized { .. } => None,
        }
    }

    /// Externally tagged `{"InstructionName": {..args}}` envelope, ready for serde.
    pub fn envelope(&self) -> Option<serde_json::Value> {
        match self {
            Self::Known { name, args } => {
                let mut map = serde_json::Map::with_capacity(1);
                map.insert((*name).to_string(), args.clone());
                Some(serde_json::Value::Object(map))
            }
            Self::Unrecognized { .. } => None,
        }
    }
}

pub fn decode(schema: &DecodingSchema, data: &[u8]) -> Result<DecodedInstruction, DecodeError> {
    let Some((head, body)) = data.split_first_chunk::<8>() else {
        return Err(DecodeError::Empty);
    };
    let layout = schema
        .layout(head)
        .ok_or(DecodeError::UnknownDiscriminator(*head))?;

    let mut rest = body;
    let args = (layout.decode_args)(&mut rest).map_err(|err| DecodeError::Malformed {
        instruction: layout.name,
        reason: err.to_string(),
    })?;
    if !rest.is_empty() {
        return Err(DecodeError::TrailingBytes {
            instruction: layout.name,
            count: rest.len(),
        });
    }

    Ok(DecodedInstruction::Known {
        name: layout.name,
        args,
    })
}

struct ProgramEntry {
    schema: DecodingSchema,
    indexer: &'static dyn InstructionIndexer,
}

/// Program id → (schema, indexer). Read-only once built.
#[derive(Default)]
pub struct DecoderRegistry {
    programs: HashMap<Pubkey, ProgramEntry>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in program.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for protocol in Protocol::ALL {
            registry.register(
                protocols::schema_for(protocol),
                protocols::indexer_for(protocol),
            );
        }
        registry
    }

    pub fn register(&mut self, schema: DecodingSchema, indexer: &'static dyn InstructionIndexer) {
        self.programs
            .insert(schema.program_id, ProgramEntry { schema, indexer });
    }

    pub fn resolve(&self, program_id: &Pubkey) -> Option<&DecodingSchema> {
        self.programs.get(program_id).map(|entry| &entry.schema)
    }

    /// Indexer for `program_id`; unknown programs get the no-op indexer.
    pub fn indexer(&self, program_id: &Pubkey) -> &'static dyn InstructionIndexer {
        match self.programs.get(program_id) {
            Some(entry) => entry.indexer,
            None => &NOOP_INDEXER,
        }
    }

    /// Never fails: a missing schema or bad bytes become
    /// [`DecodedInstruction::Unrecognized`].
    pub fn decode_or_unrecognized(&self, program_id: &Pubkey, data: &[u8]) -> DecodedInstruction {
        let decoded = match self.resolve(program_id) {
            Some(schema) => decode(schema, data),
            None => Err(DecodeError::UnknownProgram(*program_id)),
        };
        decoded.unwrap_or_else(|error| DecodedInstruction::Unrecognized { error })
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, clippy::panic, reason = "test assertions")]
mod tests {
    use super::*;
    use crate::protocols::JUPITER_LIMIT_ORDER_PROGRAM_ID;

    #[derive(BorshSerialize, BorshDeserialize, Serialize)]
    struct PlaceThing {
        amount: u64,
        expiry: Option<i64>,
    }

    fn schema() -> DecodingSchema {
        DecodingSchema::new(
            Protocol::LimitV1,
            Pubkey::new_from_array([9; 32]),
            vec![
                InstructionLayout::anchor::<PlaceThing>("PlaceThing"),
                InstructionLayout::anchor::<NoArgs>("DropThing"),
            ],
        )
    }

    fn data(name: &str, body: &[u8]) -> Vec<u8> {
        [anchor_discriminator(name).as_slice(), body].concat()
    }

    #[test]
    fn snake_case_conversion() {
        assert_eq!(to_snake_case("InitializeOrder"), "initialize_order");
        assert_eq!(
            to_snake_case("CloseOrderAndClaimTip"),
            "close_order_and_claim_tip"
        );
        assert_eq!(to_snake_case("already_snake"), "already_snake");
    }

    #[test]
    fn anchor_discriminator_matches_known_value() {
        // sha256("global:initialize")[..8], the discriminator of every Anchor `initialize`.
        assert_eq!(
            anchor_discriminator("Initialize"),
            [175, 175, 109, 31, 13, 152, 155, 237]
        );
    }

    #[test]
    fn decodes_known_instruction() {
        let body = borsh::to_vec(&PlaceThing {
            amount: 500,
            expiry: None,
        })
        .unwrap();
        let decoded = decode(&schema(), &data("PlaceThing", &body)).unwrap();
        assert_eq!(
            decoded,
            DecodedInstruction::Known {
                name: "PlaceThing",
                args: serde_json::json!({"amount": 500, "expiry": null})
            }
        );
        assert_eq!(
            decoded.envelope().unwrap(),
            serde_json::json!({"PlaceThing": {"amount": 500, "expiry": null}})
        );
    }

    #[test]
    fn decodes_argless_instruction() {
        let decoded = decode(&schema(), &data("DropThing", &[])).unwrap();
        assert_eq!(decoded.name(), Some("DropThing"));
        assert_eq!(
            decoded.envelope().unwrap(),
            serde_json::json!({"DropThing": {}})
        );
    }

    #[test]
    fn rejects_short_unknown_and_trailing_data() {
        let schema = schema();
        let short = decode(&schema, &[1, 2, 3]).unwrap_err();
        assert_eq!(short, DecodeError::Empty);
        assert_eq!(
            decode(&schema, &[0; 8]).unwrap_err(),
            DecodeError::UnknownDiscriminator([0; 8])
        );
        assert_eq!(
            decode(&schema, &data("DropThing", &[1, 2])).unwrap_err(),
            DecodeError::TrailingBytes {
                instruction: "DropThing",
                count: 2
            }
        );
        assert!(matches!(
            decode(&schema, &data("PlaceThing", &[1, 2])).unwrap_err(),
            DecodeError::Malformed {
                instruction: "PlaceThing",
                ..
            }
        ));
    }

    #[test]
    fn bad_option_tag_is_malformed() {
        let mut body = 7u64.to_le_bytes().to_vec();
        body.push(2);
        let err = decode(&schema(), &data("PlaceThing", &body)).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { .. }), "{err}");
    }

    #[test]
    fn registry_folds_failures_into_unrecognized() {
        let mut registry = DecoderRegistry::new();
        let schema = schema();
        let program = schema.program_id;
        registry.register(schema, &NOOP_INDEXER);

        assert_eq!(
            registry.decode_or_unrecognized(&program, &[0; 4]),
            DecodedInstruction::Unrecognized {
                error: DecodeError::Empty
            }
        );
        let unknown = Pubkey::new_from_array([1; 32]);
        let DecodedInstruction::Unrecognized { error } =
            registry.decode_or_unrecognized(&unknown, &[0; 16])
        else {
            panic!("expected unrecognized");
        };
        assert_eq!(error, DecodeError::UnknownProgram(unknown));
    }

    #[test]
    fn unknown_program_gets_noop_indexer() {
        let registry = DecoderRegistry::builtin();
        let unknown = Pubkey::new_from_array([1; 32]);
        assert!(registry.resolve(&unknown).is_none());
        assert_eq!(registry.indexer(&unknown).protocol(), None);
    }

    #[test]
    fn builtin_registry_covers_every_protocol() {
        let registry = DecoderRegistry::builtin();
        assert_eq!(registry.len(), Protocol::ALL.len());
        let limit_v1 = JUPITER_LIMIT_ORDER_PROGRAM_ID;
        assert_eq!(
            registry.resolve(&limit_v1).unwrap().protocol,
            Protocol::LimitV1
        );
        assert_eq!(
            registry.indexer(&limit_v1).protocol(),
            Some(Protocol::LimitV1)
        );
    }

    #[test]
    fn builtin_discriminators_are_unique_per_program() {
        for protocol in Protocol::ALL {
            let schema = protocols::schema_for(protocol);
            let mut seen = std::collections::HashSet::new();
            for layout in schema.instructions() {
                assert!(
                    seen.insert(layout.discriminator),
                    "duplicate discriminator in {protocol:?}"
                );
            }
        }
    }
}
