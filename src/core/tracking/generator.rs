use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::is_continuous;
use super::linked_prefix_len;
use super::TrackingError;
use crate::config::EtlConfig;
use crate::core::chain::BlockRef;
use crate::core::chain::ChainBlock;
use crate::core::chain::ChainClient;
use crate::core::chain::ChainError;
use crate::core::store::Ledger;
use crate::core::types::BlockNumber;
use crate::monitor::MonitorMessage;
use crate::utils::Breakout;

/// Keeps the ledger in sync with the chain.
///
/// Reorgs are undone one block at a time: whenever a fetched batch doesn't
/// connect to the last persisted block, that block is deleted and the
/// generator steps back by one height.
pub struct BlockGenerator<L: Ledger> {
    ledger: L,
    chain: Arc<dyn ChainClient>,
    batch_size: i64,
    starting_block: BlockNumber,
    /// Inclusive
    last_block: Option<BlockNumber>,
    breakout: Breakout,
    monitor_tx: Option<mpsc::Sender<MonitorMessage>>,
}

impl<L: Ledger> BlockGenerator<L> {
    pub fn new(ledger: L, chain: Arc<dyn ChainClient>, config: &EtlConfig, breakout: Breakout) -> Self {
        Self {
            ledger,
            chain,
            batch_size: config.generator_batch.max(1),
            starting_block: config.starting_block,
            last_block: config.last_block,
            breakout,
            monitor_tx: None,
        }
    }

    pub fn with_monitor(mut self, monitor_tx: mpsc::Sender<MonitorMessage>) -> Self {
        self.monitor_tx = Some(monitor_tx);
        self
    }

    /// Access to the underlying ledger.
    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Runs until the last block is reached or breakout is triggered.
    pub async fn run(&mut self) -> Result<(), TrackingError> {
        info!("starting block generator");
        let Some(mut current) = self.ensure_starting_block().await? else {
            return Ok(());
        };

        while self.last_block.map_or(true, |to| current <= to) && !self.breakout.is_set() {
            let mut batch = self.fetch_batch(current).await?;
            if batch.is_empty() {
                match self.wait_for_block(current).await? {
                    Some(block) => batch.push(block),
                    None => break,
                }
            }

            let previous_number = current - 1;
            let previous = self
                .ledger
                .block_by_number(previous_number)
                .await?
                .ok_or(TrackingError::MissingParent(previous_number))?;

            if is_continuous(&previous.hash, &batch) {
                self.ledger.insert_blocks(&batch).await?;
                // Non-empty, checked above
                let tip = batch[batch.len() - 1].number;
                debug!("ledger extended to block {tip}");
                self.report(tip);
                current = tip + 1;
                continue;
            }

            warn!(
                "fetched blocks do not connect to block {} ({}), rolling it back",
                previous.number, previous.hash
            );
            self.ledger.delete_block(&previous.hash).await?;
            current = previous_number;

            if current <= self.starting_block {
                // Nothing left to walk back to, start over from a fresh batch.
                match self.ensure_starting_block().await? {
                    Some(next) => current = next,
                    None => break,
                }
            }
        }
        info!("block generator stopped");
        Ok(())
    }

    /// Persists a batch starting at the starting block if it isn't there yet.
    ///
    /// Only the hash-linked head of the batch is kept, the rest is left to the
    /// main loop and its continuity check.
    ///
    /// Returns the number of the next block to fetch, `None` if interrupted.
    async fn ensure_starting_block(&self) -> Result<Option<BlockNumber>, TrackingError> {
        if self.ledger.block_by_number(self.starting_block).await?.is_none() {
            info!("starting block {} not in ledger yet", self.starting_block);
            let mut batch = self.fetch_batch(self.starting_block).await?;
            if batch.is_empty() {
                match self.wait_for_block(self.starting_block).await? {
                    Some(block) => batch.push(block),
                    None => return Ok(None),
                }
            }
            let linked = linked_prefix_len(&batch);
            if linked < batch.len() {
                debug!(
                    "bootstrap batch broken after block {}, keeping {linked} blocks",
                    batch[linked - 1].number
                );
                batch.truncate(linked);
            }
            self.ledger.insert_blocks(&batch).await?;
        }
        let last = self
            .ledger
            .last_block()
            .await?
            .ok_or(TrackingError::NoStartingBlock(self.starting_block))?;
        self.report(last.number);
        Ok(Some(last.number + 1))
    }

    /// Fetches up to a batch of consecutive blocks starting at `from`.
    ///
    /// Blocks are requested concurrently. The batch is cut short at the first
    /// block the chain doesn't have (yet).
    async fn fetch_batch(&self, from: BlockNumber) -> Result<Vec<ChainBlock>, ChainError> {
        let size = match self.last_block {
            Some(to) => self.batch_size.min(to - from + 1).max(1),
            None => self.batch_size,
        };
        let results = join_all(
            (from..from + size).map(|number| self.chain.block(BlockRef::Number(number))),
        )
        .await;
        let mut batch = Vec::with_capacity(results.len());
        for res in results {
            match res? {
                Some(block) => batch.push(block),
                None => break,
            }
        }
        Ok(batch)
    }

    /// Waits for the chain to reach block `number`, then fetches it.
    ///
    /// Returns `None` if interrupted while waiting.
    async fn wait_for_block(&self, number: BlockNumber) -> Result<Option<ChainBlock>, ChainError> {
        debug!("waiting for block {number}");
        let mut head_rx = self.chain.subscribe();
        loop {
            let head = *head_rx.borrow_and_update();
            if head.map_or(false, |head| head >= number) {
                break;
            }
            tokio::select! {
                changed = head_rx.changed() => {
                    if changed.is_err() {
                        return Err(ChainError::NodeUnreachable);
                    }
                }
                _ = self.breakout.wait() => return Ok(None),
            }
        }
        match self.chain.block(BlockRef::Number(number)).await? {
            Some(block) => Ok(Some(block)),
            None => Err(ChainError::MissingBlock(number)),
        }
    }

    fn report(&self, number: BlockNumber) {
        if let Some(tx) = &self.monitor_tx {
            // Monitor falling behind is not our concern
            let _ = tx.try_send(MonitorMessage::LedgerTip(number));
        }
    }
}
