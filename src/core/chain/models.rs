use serde::Deserialize;
use serde::Serialize;

use crate::core::types::BlockHash;
use crate::core::types::BlockNumber;
use crate::core::types::Timestamp;
use crate::core::types::TransactionHash;

/// Identifies a block on the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockRef {
    Number(BlockNumber),
    Hash(BlockHash),
}

/// Block header fields as returned by the chain node.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChainBlock {
    #[serde(with = "quantity")]
    pub number: BlockNumber,
    pub hash: BlockHash,
    pub parent_hash: BlockHash,
    #[serde(with = "unix_time")]
    pub timestamp: Timestamp,
}

impl ChainBlock {
    /// Returns true if this block is a child of block with `hash`.
    pub fn is_child_of(&self, hash: &str) -> bool {
        self.parent_hash == hash
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_hash: BlockHash,
    #[serde(with = "quantity")]
    pub block_number: BlockNumber,
    pub transaction_hash: TransactionHash,
    #[serde(with = "quantity")]
    pub log_index: i64,
}

/// Log query, either for a single block hash or for a number range.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub address: Vec<String>,
    /// Topic alternatives per position, e.g. `[[t1, t2]]` matches t1 OR t2 in first position.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none", with = "opt_quantity")]
    pub from_block: Option<BlockNumber>,
    #[serde(skip_serializing_if = "Option::is_none", with = "opt_quantity")]
    pub to_block: Option<BlockNumber>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<BlockHash>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: TransactionHash,
    pub from: String,
    pub to: Option<String>,
    pub input: String,
    pub value: String,
    pub block_hash: Option<BlockHash>,
    #[serde(default, with = "opt_quantity")]
    pub block_number: Option<BlockNumber>,
}

/// Hex encoded quantities ("0x1b4").
pub(super) mod quantity {
    use serde::de::Error;
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{value:#x}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(D::Error::custom)
    }

    pub fn parse(s: &str) -> Result<i64, String> {
        let digits = s
            .strip_prefix("0x")
            .ok_or_else(|| format!("missing 0x prefix in quantity {s}"))?;
        i64::from_str_radix(digits, 16).map_err(|e| format!("bad quantity {s}: {e}"))
    }
}

mod opt_quantity {
    use serde::de::Error;
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => super::quantity::serialize(v, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(s) => super::quantity::parse(&s).map(Some).map_err(D::Error::custom),
            None => Ok(None),
        }
    }
}

/// Unix timestamps (seconds) encoded as hex quantities.
mod unix_time {
    use serde::de::Error;
    use serde::Deserializer;
    use serde::Serializer;
    use time::OffsetDateTime;

    pub fn serialize<S: Serializer>(
        value: &OffsetDateTime,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        super::quantity::serialize(&value.unix_timestamp(), serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<OffsetDateTime, D::Error> {
        let secs = super::quantity::deserialize(deserializer)?;
        OffsetDateTime::from_unix_timestamp(secs).map_err(D::Error::custom)
    }
}
