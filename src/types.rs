use std::fmt;

use serde::{Deserialize, Serialize};
use solana_pubkey::Pubkey;

use crate::protocols::Protocol;

/// One instruction as delivered by the ledger client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawInstruction {
    /// Program the instruction is addressed to.
    #[serde(with = "pubkey_str")]
    pub program_id: Pubkey,
    /// Account keys in the order the program expects them.
    #[serde(with = "pubkey_vec_str")]
    pub accounts: Vec<Pubkey>,
    /// Instruction data, base58 in JSON form.
    #[serde(with = "base58_bytes")]
    pub data: Vec<u8>,
}

/// A transaction as delivered by the ledger client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTransaction {
    /// Slot in which the transaction landed.
    pub block: u64,
    /// Position of the transaction within its block.
    pub tx_index: u32,
    /// Transaction signature (base58).
    pub signature: String,
    /// `false` when the transaction failed on chain; its instructions had no effect.
    #[serde(default = "default_success")]
    pub success: bool,
    pub instructions: Vec<RawInstruction>,
}

fn default_success() -> bool {
    true
}

/// Stable source position of an event: `(block, tx_index, ix_index)`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct OriginKey {
    pub block: u64,
    pub tx_index: u32,
    pub ix_index: u32,
}

impl fmt::Display for OriginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.block, self.tx_index, self.ix_index)
    }
}

/// What an indexer sees about the transaction an instruction belongs to.
pub struct TransactionContext<'a> {
    /// Name of the market being extracted.
    pub market: &'a str,
    pub transaction: &'a RawTransaction,
}

impl TransactionContext<'_> {
    pub fn origin(&self, ix_index: u32) -> OriginKey {
        OriginKey {
            block: self.transaction.block,
            tx_index: self.transaction.tx_index,
            ix_index,
        }
    }

    pub fn accounts(&self, ix_index: u32) -> &[Pubkey] {
        self.transaction
            .instructions
            .get(ix_index as usize)
            .map_or(&[], |ix| ix.accounts.as_slice())
    }
}

/// A configured market: the accounts whose transactions are extracted and the
/// block its checkpoint starts from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    pub name: String,
    pub program: Protocol,
    #[serde(with = "pubkey_vec_str")]
    pub accounts: Vec<Pubkey>,
    #[serde(default)]
    pub floor_block: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MakeEvent {
    pub origin: OriginKey,
    pub market: String,
    pub protocol: Protocol,
    pub signature: String,
    pub maker: String,
    pub order: String,
    pub input_mint: String,
    pub output_mint: String,
    pub making_amount: u64,
    pub taking_amount: u64,
    pub expired_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakeEvent {
    pub origin: OriginKey,
    pub market: String,
    pub protocol: Protocol,
    pub signature: String,
    pub taker: String,
    pub order: String,
    /// Amount of the order's input side consumed by the fill.
    pub making_amount: u64,
    /// Amount of the order's output side paid by the taker.
    pub taking_amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainEvent {
    Make(MakeEvent),
    Take(TakeEvent),
}

impl DomainEvent {
    pub fn origin(&self) -> OriginKey {
        match self {
            Self::Make(make) => make.origin,
            Self::Take(take) => take.origin,
        }
    }

    pub fn market(&self) -> &str {
        match self {
            Self::Make(make) => &make.market,
            Self::Take(take) => &take.market,
        }
    }

    pub fn is_make(&self) -> bool {
        matches!(self, Self::Make(_))
    }

    pub fn is_take(&self) -> bool {
        matches!(self, Self::Take(_))
    }
}

pub(crate) mod pubkey_str {
    use std::str::FromStr;

    use serde::{Deserialize, Deserializer, Serializer};
    use solana_pubkey::Pubkey;

    pub fn serialize<S: Serializer>(key: &Pubkey, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(key)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Pubkey, D::Error> {
        let s = String::deserialize(deserializer)?;
        Pubkey::from_str(&s).map_err(serde::de::Error::custom)
    }
}

pub(crate) mod pubkey_vec_str {
    use std::str::FromStr;

    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};
    use solana_pubkey::Pubkey;

    pub fn serialize<S: Serializer>(keys: &[Pubkey], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(keys.len()))?;
        for key in keys {
            seq.serialize_element(&key.to_string())?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Pubkey>, D::Error> {
        let raw = Vec::<String>::deserialize(deserializer)?;
        raw.iter()
            .map(|s| Pubkey::from_str(s).map_err(serde::de::Error::custom))
            .collect()
    }
}

mod base58_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&bs58::encode(bytes).into_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        bs58::decode(&s)
            .into_vec()
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "test assertions")]
mod tests {
    use super::*;

    #[test]
    fn origin_keys_order_by_block_then_tx_then_ix() {
        let a = OriginKey {
            block: 5,
            tx_index: 2,
            ix_index: 9,
        };
        let b = OriginKey {
            block: 5,
            tx_index: 3,
            ix_index: 0,
        };
        let c = OriginKey {
            block: 6,
            tx_index: 0,
            ix_index: 0,
        };
        assert!(a < b && b < c);
        assert_eq!(a.to_string(), "5:2:9");
    }

    #[test]
    fn raw_transaction_json_uses_base58() {
        let program = Pubkey::new_from_array([7; 32]);
        let tx = RawTransaction {
            block: 42,
            tx_index: 1,
            signature: "sig".to_string(),
            success: true,
            instructions: vec![RawInstruction {
                program_id: program,
                accounts: vec![Pubkey::new_from_array([1; 32])],
                data: vec![1, 2, 3],
            }],
        };
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["instructions"][0]["program_id"], program.to_string());
        let data = bs58::encode([1, 2, 3]).into_string();
        assert_eq!(json["instructions"][0]["data"], data);

        let back: RawTransaction = serde_json::from_value(json).unwrap();
        assert_eq!(back, tx);
    }

    #[test]
    fn missing_success_flag_defaults_to_true() {
        let json = serde_json::json!({
            "block": 1,
            "tx_index": 0,
            "signature": "s",
            "instructions": []
        });
        let tx: RawTransaction = serde_json::from_value(json).unwrap();
        assert!(tx.success);
    }

    #[test]
    fn context_accounts_out_of_range_are_empty() {
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
        assert!(ctx.accounts(3).is_empty());
        assert_eq!(ctx.origin(3).ix_index, 3);
    }
}
