use crate::core::types::Block;
use crate::core::types::BlockNumber;

/// Returns true if a batch starting at `first` could reach blocks within
/// `reorg_buffer` of the chain tip.
///
/// A zero `reorg_buffer` means reorgs are not a concern.
pub fn close_to_tip(
    first: BlockNumber,
    batch_size: i64,
    latest_at_start: BlockNumber,
    reorg_buffer: i64,
) -> bool {
    reorg_buffer != 0 && first + batch_size - latest_at_start + reorg_buffer > 0
}

/// Splits `blocks` into maximal runs of consecutive numbers.
///
/// Order is preserved, so runs are in id order too.
pub fn consecutive_runs(blocks: &[Block]) -> Vec<&[Block]> {
    let mut runs = vec![];
    let mut start = 0;
    for i in 1..blocks.len() {
        if !blocks[i - 1].is_followed_by(&blocks[i]) {
            runs.push(&blocks[start..i]);
            start = i;
        }
    }
    if start < blocks.len() {
        runs.push(&blocks[start..]);
    }
    runs
}

/// One block per unit.
pub fn singletons(blocks: &[Block]) -> Vec<&[Block]> {
    blocks.chunks(1).collect()
}
