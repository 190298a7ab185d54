mod generator;

use thiserror::Error;

use super::chain::ChainBlock;
use super::chain::ChainError;
use super::store::StoreError;
use super::types::BlockNumber;

pub use generator::BlockGenerator;

#[derive(Error, Debug)]
pub enum TrackingError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Expected persisted block {0} is missing from the ledger")]
    MissingParent(BlockNumber),
    #[error("Starting block {0} could not be persisted")]
    NoStartingBlock(BlockNumber),
}

/// Returns true if `batch` forms a hash chain on top of block `parent_hash`.
pub fn is_continuous(parent_hash: &str, batch: &[ChainBlock]) -> bool {
    let mut expected = parent_hash;
    for block in batch {
        if !block.is_child_of(expected) {
            return false;
        }
        expected = &block.hash;
    }
    true
}

/// Length of the leading part of `batch` that is hash-linked internally.
pub fn linked_prefix_len(batch: &[ChainBlock]) -> usize {
    match batch.first() {
        None => 0,
        Some(_) => {
            1 + batch
                .windows(2)
                .take_while(|pair| pair[1].is_child_of(&pair[0].hash))
                .count()
        }
    }
}
