//! In-memory store and chain mockups, for testing without a database or a node.
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use time::Duration;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::sync::Mutex;
use tokio::sync::OwnedMutexGuard;

use crate::core::chain::BlockRef;
use crate::core::chain::ChainBlock;
use crate::core::chain::ChainClient;
use crate::core::chain::ChainError;
use crate::core::chain::Log;
use crate::core::chain::LogFilter;
use crate::core::chain::Transaction;
use crate::core::store::Backend;
use crate::core::store::Ledger;
use crate::core::store::StoreError;
use crate::core::types::Block;
use crate::core::types::BlockId;
use crate::core::types::BlockNumber;
use crate::framework::Job;
use crate::framework::JobStatus;
use crate::framework::Registry;
use crate::framework::RegistryTx;

/// Random 32 bytes hash, hex encoded with 0x prefix.
pub fn random_hash() -> String {
    format!("0x{}", base16::encode_lower(&rand::random::<[u8; 32]>()))
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    blocks: Vec<Block>,
    last_block_id: BlockId,
    jobs: Vec<Job>,
    /// Processor output: table -> block id -> values
    tables: HashMap<String, BTreeMap<BlockId, Vec<serde_json::Value>>>,
    commits: usize,
}

/// Shared in-memory store. Clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All blocks, ordered by id.
    pub async fn blocks(&self) -> Vec<Block> {
        self.state.lock().await.blocks.clone()
    }

    /// Number of committed transactions so far.
    pub async fn commits(&self) -> usize {
        self.state.lock().await.commits
    }

    /// Values stored in `table`, ordered by block id.
    pub async fn rows(&self, table: &str) -> Vec<(BlockId, serde_json::Value)> {
        flatten(self.state.lock().await.tables.get(table), BlockId::MIN, BlockId::MAX)
    }
}

fn flatten(
    table: Option<&BTreeMap<BlockId, Vec<serde_json::Value>>>,
    from_id: BlockId,
    to_id: BlockId,
) -> Vec<(BlockId, serde_json::Value)> {
    table
        .map(|t| {
            t.range(from_id..=to_id)
                .flat_map(|(id, values)| values.iter().map(|v| (*id, v.clone())))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Ledger for MemoryStore {
    async fn insert_blocks(&self, blocks: &[ChainBlock]) -> Result<Vec<Block>, StoreError> {
        let mut state = self.state.lock().await;
        let mut inserted = vec![];
        for cb in blocks {
            if state.blocks.iter().any(|b| b.hash == cb.hash) {
                continue;
            }
            state.last_block_id += 1;
            let block = Block {
                id: state.last_block_id,
                number: cb.number,
                hash: cb.hash.clone(),
                timestamp: cb.timestamp,
            };
            state.blocks.push(block.clone());
            inserted.push(block);
        }
        Ok(inserted)
    }

    async fn block_by_number(&self, number: BlockNumber) -> Result<Option<Block>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .blocks
            .iter()
            .filter(|b| b.number == number)
            .max_by_key(|b| b.id)
            .cloned())
    }

    async fn block_by_id(&self, id: BlockId) -> Result<Option<Block>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.blocks.iter().find(|b| b.id == id).cloned())
    }

    async fn block_by_hash(&self, hash: &str) -> Result<Option<Block>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.blocks.iter().find(|b| b.hash == hash).cloned())
    }

    async fn blocks_in_range(
        &self,
        from_id: BlockId,
        to_id: BlockId,
    ) -> Result<Vec<Block>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .blocks
            .iter()
            .filter(|b| from_id <= b.id && b.id <= to_id)
            .cloned()
            .collect())
    }

    async fn blocks_after(
        &self,
        after_id: BlockId,
        max_id: Option<BlockId>,
        limit: i64,
    ) -> Result<Vec<Block>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .blocks
            .iter()
            .filter(|b| b.id > after_id && max_id.map_or(true, |max| b.id <= max))
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn last_block(&self) -> Result<Option<Block>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .blocks
            .iter()
            .max_by_key(|b| (b.number, b.id))
            .cloned())
    }

    async fn delete_block(&self, hash: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let removed: Vec<BlockId> = state
            .blocks
            .iter()
            .filter(|b| b.hash == hash)
            .map(|b| b.id)
            .collect();
        state.blocks.retain(|b| b.hash != hash);
        // Mimic cascading deletes of processor output
        for table in state.tables.values_mut() {
            for id in &removed {
                table.remove(id);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Registry for MemoryStore {
    type Tx<'a> = MemTx;

    async fn job(&self, name: &str) -> Result<Option<Job>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.jobs.iter().find(|j| j.name == name).cloned())
    }

    async fn jobs(&self) -> Result<Vec<Job>, StoreError> {
        Ok(self.state.lock().await.jobs.clone())
    }

    async fn insert_job(&self, name: &str, last_block_id: BlockId) -> Result<Job, StoreError> {
        let mut state = self.state.lock().await;
        if state.jobs.iter().any(|j| j.name == name) {
            return Err(StoreError::Inconsistent(format!("duplicate job {name}")));
        }
        let job = Job {
            id: state.jobs.len() as i32 + 1,
            name: name.to_owned(),
            last_block_id,
            status: JobStatus::Processing,
            extra_info: None,
        };
        state.jobs.push(job.clone());
        Ok(job)
    }

    async fn set_status(&self, name: &str, status: JobStatus) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        for job in state.jobs.iter_mut().filter(|j| j.name == name) {
            job.status = status;
        }
        Ok(())
    }

    async fn exclude_all(&self) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        for job in state.jobs.iter_mut() {
            job.status = JobStatus::NotReady;
        }
        Ok(state.jobs.len() as u64)
    }

    async fn stop_job(&self, name: &str, extra_info: serde_json::Value) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        for job in state.jobs.iter_mut().filter(|j| j.name == name) {
            job.status = JobStatus::Stopped;
            job.extra_info = Some(extra_info.clone());
        }
        Ok(())
    }

    async fn min_watermark(&self, names: &[String]) -> Result<Option<BlockId>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .iter()
            .filter(|j| names.contains(&j.name))
            .map(|j| j.last_block_id)
            .min())
    }

    async fn begin(&mut self) -> Result<MemTx, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let snapshot = guard.clone();
        Ok(MemTx {
            guard: StdMutex::new(guard),
            snapshot,
            committed: false,
        })
    }
}

/// Transaction over a [`MemoryStore`].
///
/// Holds the store for its whole lifetime. Changes are reverted on drop
/// unless committed.
pub struct MemTx {
    guard: StdMutex<OwnedMutexGuard<MemoryState>>,
    snapshot: MemoryState,
    committed: bool,
}

impl MemTx {
    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> Result<T, StoreError> {
        let mut guard = self.guard.lock().map_err(|_| StoreError::Closed)?;
        Ok(f(&mut **guard))
    }

    /// Appends `value` to `table` for block `block_id`.
    pub fn insert(
        &self,
        table: &str,
        block_id: BlockId,
        value: serde_json::Value,
    ) -> Result<(), StoreError> {
        self.with_state(|state| {
            state
                .tables
                .entry(table.to_owned())
                .or_default()
                .entry(block_id)
                .or_default()
                .push(value);
        })
    }

    /// Replaces values of `table` for block `block_id`.
    pub fn upsert(
        &self,
        table: &str,
        block_id: BlockId,
        values: Vec<serde_json::Value>,
    ) -> Result<(), StoreError> {
        self.with_state(|state| {
            state
                .tables
                .entry(table.to_owned())
                .or_default()
                .insert(block_id, values);
        })
    }

    /// Values of `table` for blocks with id in `from_id..=to_id`.
    pub fn rows(
        &self,
        table: &str,
        from_id: BlockId,
        to_id: BlockId,
    ) -> Result<Vec<(BlockId, serde_json::Value)>, StoreError> {
        self.with_state(|state| flatten(state.tables.get(table), from_id, to_id))
    }

    pub fn job(&self, name: &str) -> Result<Option<Job>, StoreError> {
        self.with_state(|state| state.jobs.iter().find(|j| j.name == name).cloned())
    }
}

#[async_trait]
impl RegistryTx for MemTx {
    async fn advance_job(&self, name: &str, last_block_id: BlockId) -> Result<(), StoreError> {
        self.with_state(|state| {
            for job in state.jobs.iter_mut().filter(|j| j.name == name) {
                job.last_block_id = last_block_id;
            }
        })
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        self.with_state(|state| state.commits += 1)?;
        self.committed = true;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        // Reverted on drop
        Ok(())
    }
}

impl Drop for MemTx {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let snapshot = std::mem::take(&mut self.snapshot);
        match self.guard.get_mut() {
            Ok(guard) => **guard = snapshot,
            Err(poisoned) => **poisoned.into_inner() = snapshot,
        }
    }
}

/// Backend handing out clones of the same [`MemoryStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    store: MemoryStore,
    locks: Arc<StdMutex<HashSet<i64>>>,
}

impl MemoryBackend {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            locks: Arc::default(),
        }
    }

    pub fn store(&self) -> MemoryStore {
        self.store.clone()
    }

    pub fn is_locked(&self, id: i64) -> bool {
        self.locks.lock().map(|l| l.contains(&id)).unwrap_or(false)
    }

    fn try_lock(&self, id: i64) -> Result<bool, StoreError> {
        let mut locks = self.locks.lock().map_err(|_| StoreError::Closed)?;
        Ok(locks.insert(id))
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    type Store = MemoryStore;
    type Lock = i64;

    async fn connect(&self) -> Result<MemoryStore, StoreError> {
        Ok(self.store.clone())
    }

    async fn lock(&self, id: i64) -> Result<i64, StoreError> {
        while !self.try_lock(id)? {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        Ok(id)
    }

    async fn unlock(&self, id: i64) -> Result<(), StoreError> {
        let mut locks = self.locks.lock().map_err(|_| StoreError::Closed)?;
        locks.remove(&id);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MockChainState {
    blocks: Vec<ChainBlock>,
    logs: Vec<Log>,
    transactions: HashMap<String, Transaction>,
}

/// A chain that can be extended and reorganized at will.
///
/// Block numbers start at 0 and blocks are 12 seconds apart.
#[derive(Debug, Clone)]
pub struct MockChain {
    state: Arc<StdMutex<MockChainState>>,
    head: Arc<watch::Sender<Option<BlockNumber>>>,
}

impl MockChain {
    /// New chain of `length` blocks.
    pub fn new(length: usize) -> Self {
        let (head, _) = watch::channel(None);
        let chain = Self {
            state: Arc::default(),
            head: Arc::new(head),
        };
        chain.extend(length);
        chain
    }

    pub fn blocks(&self) -> Vec<ChainBlock> {
        self.state.lock().map(|s| s.blocks.clone()).unwrap_or_default()
    }

    pub fn block_at(&self, number: BlockNumber) -> Option<ChainBlock> {
        self.blocks().into_iter().find(|b| b.number == number)
    }

    pub fn tip(&self) -> Option<BlockNumber> {
        self.blocks().last().map(|b| b.number)
    }

    /// Appends `n` new blocks.
    pub fn extend(&self, n: usize) {
        self.update(|blocks| {
            for _ in 0..n {
                let block = match blocks.last() {
                    Some(parent) => child_of(parent),
                    None => ChainBlock {
                        number: 0,
                        hash: random_hash(),
                        parent_hash: format!("0x{}", "0".repeat(64)),
                        timestamp: genesis_time(),
                    },
                };
                blocks.push(block);
            }
        });
    }

    /// Replaces all blocks from `number` onwards with a new branch of `length` blocks.
    pub fn reorg(&self, number: BlockNumber, length: usize) {
        self.update(|blocks| {
            blocks.retain(|b| b.number < number);
            for _ in 0..length {
                match blocks.last() {
                    Some(parent) => {
                        let block = child_of(parent);
                        blocks.push(block);
                    }
                    None => break,
                }
            }
        });
    }

    /// Makes `log` part of the chain, along with its transaction.
    pub fn add_log(&self, log: Log, transaction: Transaction) {
        if let Ok(mut state) = self.state.lock() {
            state.transactions.insert(transaction.hash.clone(), transaction);
            state.logs.push(log);
        }
    }

    fn update(&self, f: impl FnOnce(&mut Vec<ChainBlock>)) {
        let tip = match self.state.lock() {
            Ok(mut state) => {
                f(&mut state.blocks);
                state.blocks.last().map(|b| b.number)
            }
            Err(_) => return,
        };
        self.head.send_replace(tip);
    }
}

fn genesis_time() -> OffsetDateTime {
    OffsetDateTime::UNIX_EPOCH + Duration::days(365 * 50)
}

fn child_of(parent: &ChainBlock) -> ChainBlock {
    ChainBlock {
        number: parent.number + 1,
        hash: random_hash(),
        parent_hash: parent.hash.clone(),
        timestamp: parent.timestamp + Duration::seconds(12),
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn block(&self, block: BlockRef) -> Result<Option<ChainBlock>, ChainError> {
        let state = self.state.lock().map_err(|_| ChainError::NodeUnreachable)?;
        Ok(state
            .blocks
            .iter()
            .find(|b| match &block {
                BlockRef::Number(number) => b.number == *number,
                BlockRef::Hash(hash) => &b.hash == hash,
            })
            .cloned())
    }

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<Log>, ChainError> {
        let state = self.state.lock().map_err(|_| ChainError::NodeUnreachable)?;
        let canonical: HashSet<&str> = state.blocks.iter().map(|b| b.hash.as_str()).collect();
        Ok(state
            .logs
            .iter()
            .filter(|log| canonical.contains(log.block_hash.as_str()))
            .filter(|log| match (&filter.block_hash, filter.from_block, filter.to_block) {
                (Some(hash), _, _) => &log.block_hash == hash,
                (None, from, to) => {
                    from.map_or(true, |f| log.block_number >= f)
                        && to.map_or(true, |t| log.block_number <= t)
                }
            })
            .filter(|log| {
                filter.address.is_empty()
                    || filter
                        .address
                        .iter()
                        .any(|a| a.eq_ignore_ascii_case(&log.address))
            })
            .filter(|log| match (filter.topics.first(), log.topics.first()) {
                (None, _) => true,
                (Some(wanted), Some(topic)) => wanted.is_empty() || wanted.contains(topic),
                (Some(wanted), None) => wanted.is_empty(),
            })
            .cloned()
            .collect())
    }

    async fn transaction(&self, hash: &str) -> Result<Option<Transaction>, ChainError> {
        let state = self.state.lock().map_err(|_| ChainError::NodeUnreachable)?;
        Ok(state.transactions.get(hash).cloned())
    }

    async fn latest_block_number(&self) -> Result<BlockNumber, ChainError> {
        self.tip().ok_or(ChainError::MissingBlock(0))
    }

    fn subscribe(&self) -> watch::Receiver<Option<BlockNumber>> {
        self.head.subscribe()
    }
}
