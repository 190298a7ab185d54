use postgres_from_row::FromRow;
use time::OffsetDateTime;

/// Surrogate key of a persisted block. Strictly increasing, never reused.
pub type BlockId = i64;
/// Chain height. Not unique over time: a reorg reassigns numbers to new blocks.
pub type BlockNumber = i64;
pub type BlockHash = String;
pub type TransactionHash = String;
pub type Timestamp = OffsetDateTime;

/// A canonical block as persisted in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Block {
    pub id: BlockId,
    pub number: BlockNumber,
    pub hash: BlockHash,
    pub timestamp: Timestamp,
}

impl Block {
    /// Returns true if `other` immediately follows this block by number.
    pub fn is_followed_by(&self, other: &Block) -> bool {
        self.number + 1 == other.number
    }
}

/// Snapshot of the chain taken once at service startup.
///
/// Only used as reference point when deciding if batching is safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkState {
    pub latest_block_number_at_start: BlockNumber,
}

impl NetworkState {
    pub fn new(latest_block_number_at_start: BlockNumber) -> Self {
        Self {
            latest_block_number_at_start,
        }
    }
}

/// Inclusive range of block id's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub first_id: BlockId,
    pub last_id: BlockId,
}

impl BlockRange {
    /// Range spanned by a non-empty slice of blocks ordered by id.
    pub fn of(blocks: &[Block]) -> Option<Self> {
        match (blocks.first(), blocks.last()) {
            (Some(first), Some(last)) => Some(Self {
                first_id: first.id,
                last_id: last.id,
            }),
            _ => None,
        }
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.first_id <= id && id <= self.last_id
    }
}
