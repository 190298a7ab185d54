// cargo test --test test_generator
mod common;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::watch;

use chain_etl::config::EtlConfig;
use chain_etl::core::chain::BlockRef;
use chain_etl::core::chain::ChainBlock;
use chain_etl::core::chain::ChainClient;
use chain_etl::core::chain::ChainError;
use chain_etl::core::chain::Log;
use chain_etl::core::chain::LogFilter;
use chain_etl::core::chain::Transaction;
use chain_etl::core::store::Ledger;
use chain_etl::core::tracking::BlockGenerator;
use chain_etl::core::types::Block;
use chain_etl::monitor::MonitorMessage;
use chain_etl::testing::MemoryStore;
use chain_etl::testing::random_hash;
use chain_etl::testing::MockChain;
use chain_etl::utils::Breakout;

fn config(generator_batch: i64, last_block: Option<i64>) -> EtlConfig {
    EtlConfig {
        generator_batch,
        last_block,
        ..Default::default()
    }
}

/// (number, hash) of persisted blocks, in id order.
fn summary(blocks: &[Block]) -> Vec<(i64, String)> {
    blocks.iter().map(|b| (b.number, b.hash.clone())).collect()
}

fn chain_summary(blocks: &[ChainBlock]) -> Vec<(i64, String)> {
    blocks.iter().map(|b| (b.number, b.hash.clone())).collect()
}

/// Polls `store` until its tip has `number`.
async fn wait_for_tip(store: &MemoryStore, number: i64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if store.last_block().await.unwrap().map(|b| b.number) == Some(number) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("tip not reached in time");
}

#[tokio::test]
async fn test_syncs_up_to_last_block() {
    let _guard = common::set_tracing_subscriber(false);
    let chain = MockChain::new(10);
    let store = MemoryStore::new();
    let mut generator = BlockGenerator::new(
        store.clone(),
        Arc::new(chain.clone()),
        &config(3, Some(7)),
        Breakout::new(),
    );
    generator.run().await.unwrap();

    let blocks = store.blocks().await;
    assert_eq!(summary(&blocks), chain_summary(&chain.blocks()[..8]));
    // Ids follow insertion order
    let ids: Vec<i64> = blocks.iter().map(|b| b.id).collect();
    assert_eq!(ids, (1..=8).collect::<Vec<i64>>());
}

#[tokio::test]
async fn test_starts_at_starting_block() {
    let chain = MockChain::new(10);
    let store = MemoryStore::new();
    let config = EtlConfig {
        starting_block: 5,
        ..config(2, Some(8))
    };
    let mut generator =
        BlockGenerator::new(store.clone(), Arc::new(chain.clone()), &config, Breakout::new());
    generator.run().await.unwrap();

    let numbers: Vec<i64> = store.blocks().await.iter().map(|b| b.number).collect();
    assert_eq!(numbers, vec![5, 6, 7, 8]);
}

#[tokio::test]
async fn test_resumes_from_ledger_tip() {
    let chain = MockChain::new(6);
    let store = MemoryStore::new();
    store.insert_blocks(&chain.blocks()[..3]).await.unwrap();

    let mut generator = BlockGenerator::new(
        store.clone(),
        Arc::new(chain.clone()),
        &config(10, Some(5)),
        Breakout::new(),
    );
    generator.run().await.unwrap();

    let blocks = store.blocks().await;
    assert_eq!(summary(&blocks), chain_summary(&chain.blocks()));
    assert_eq!(blocks.last().unwrap().id, 6);
}

#[tokio::test]
async fn test_reorg_is_rolled_back_block_by_block() {
    let _guard = common::set_tracing_subscriber(false);
    let chain = MockChain::new(4);
    let store = MemoryStore::new();
    let breakout = Breakout::new();
    let (monitor_tx, mut monitor_rx) = mpsc::channel(100);
    let mut generator = BlockGenerator::new(
        store.clone(),
        Arc::new(chain.clone()),
        &config(2, None),
        breakout.clone(),
    )
    .with_monitor(monitor_tx);

    let scenario = async {
        wait_for_tip(&store, 3).await;
        let original = store.blocks().await;
        assert_eq!(summary(&original), chain_summary(&chain.blocks()));

        // Blocks 1, 2 and 3 get replaced and the new branch grows to 4
        chain.reorg(1, 4);
        wait_for_tip(&store, 4).await;
        breakout.trigger();
        original
    };
    let (res, original) = tokio::join!(generator.run(), scenario);
    res.unwrap();

    let blocks = store.blocks().await;
    assert_eq!(summary(&blocks), chain_summary(&chain.blocks()));
    // Genesis survived, replaced blocks got new ids
    assert_eq!(blocks[0], original[0]);
    let ids: Vec<i64> = blocks.iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![1, 5, 6, 7, 8]);
    for old in &original[1..] {
        assert_eq!(store.block_by_hash(&old.hash).await.unwrap(), None);
    }

    let mut tips = vec![];
    while let Ok(MonitorMessage::LedgerTip(n)) = monitor_rx.try_recv() {
        tips.push(n);
    }
    assert_eq!(tips.last(), Some(&4));
}

#[tokio::test]
async fn test_waits_for_new_blocks() {
    let chain = MockChain::new(2);
    let store = MemoryStore::new();
    let mut generator = BlockGenerator::new(
        store.clone(),
        Arc::new(chain.clone()),
        &config(5, Some(3)),
        Breakout::new(),
    );
    let scenario = async {
        wait_for_tip(&store, 1).await;
        chain.extend(1);
        wait_for_tip(&store, 2).await;
        chain.extend(1);
    };
    let (res, _) = tokio::join!(generator.run(), scenario);
    res.unwrap();
    assert_eq!(summary(&store.blocks().await), chain_summary(&chain.blocks()));
}

#[tokio::test]
async fn test_breakout_while_waiting() {
    let chain = MockChain::new(1);
    let store = MemoryStore::new();
    let breakout = Breakout::new();
    let mut generator = BlockGenerator::new(
        store.clone(),
        Arc::new(chain.clone()),
        &config(5, None),
        breakout.clone(),
    );
    let scenario = async {
        wait_for_tip(&store, 0).await;
        breakout.trigger();
    };
    let (res, _) = tokio::join!(generator.run(), scenario);
    res.unwrap();
    assert_eq!(store.blocks().await.len(), 1);
}

/// Serves a block from an abandoned fork the first time `number` is asked for.
struct StaleOnce {
    chain: MockChain,
    number: i64,
    served: AtomicBool,
}

#[async_trait]
impl ChainClient for StaleOnce {
    async fn block(&self, block: BlockRef) -> Result<Option<ChainBlock>, ChainError> {
        match self.chain.block(block).await? {
            Some(block)
                if block.number == self.number && !self.served.swap(true, Ordering::SeqCst) =>
            {
                Ok(Some(ChainBlock {
                    hash: random_hash(),
                    parent_hash: random_hash(),
                    ..block
                }))
            }
            other => Ok(other),
        }
    }

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<Log>, ChainError> {
        self.chain.logs(filter).await
    }

    async fn transaction(&self, hash: &str) -> Result<Option<Transaction>, ChainError> {
        self.chain.transaction(hash).await
    }

    async fn latest_block_number(&self) -> Result<i64, ChainError> {
        self.chain.latest_block_number().await
    }

    fn subscribe(&self) -> watch::Receiver<Option<i64>> {
        self.chain.subscribe()
    }
}

#[tokio::test]
async fn test_stale_block_in_first_batch_is_not_persisted() {
    let _guard = common::set_tracing_subscriber(false);
    let chain = MockChain::new(6);
    let store = MemoryStore::new();
    let client = StaleOnce {
        chain: chain.clone(),
        number: 1,
        served: AtomicBool::new(false),
    };
    let mut generator = BlockGenerator::new(
        store.clone(),
        Arc::new(client),
        &config(4, Some(5)),
        Breakout::new(),
    );
    generator.run().await.unwrap();

    let blocks = store.blocks().await;
    // Stale block 1 never made it in, so the ledger is the canonical chain
    assert_eq!(summary(&blocks), chain_summary(&chain.blocks()));
    let ids: Vec<i64> = blocks.iter().map(|b| b.id).collect();
    assert_eq!(ids, (1..=6).collect::<Vec<i64>>());
}
