mod blocks;
mod locks;

use async_trait::async_trait;
use thiserror::Error;
use tokio_postgres::Client;
use tokio_postgres::NoTls;

use super::chain::ChainBlock;
use super::types::Block;
use super::types::BlockId;
use super::types::BlockNumber;
use crate::config::PostgresConfig;
use crate::utils::Schema;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
    #[error("Failed (de)serializing stored json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported schema revision {major}.{minor} for schema {schema}")]
    SchemaRevision {
        schema: String,
        major: i32,
        minor: i32,
    },
    #[error("Store is inconsistent: {0}")]
    Inconsistent(String),
    #[error("Store was closed")]
    Closed,
}

/// Persisted canonical chain.
///
/// Blocks are only ever inserted or deleted, never updated.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Inserts `blocks`, silently skipping hashes already present.
    ///
    /// Returns the blocks that got inserted, ordered by id.
    async fn insert_blocks(&self, blocks: &[ChainBlock]) -> Result<Vec<Block>, StoreError>;

    async fn block_by_number(&self, number: BlockNumber) -> Result<Option<Block>, StoreError>;

    async fn block_by_id(&self, id: BlockId) -> Result<Option<Block>, StoreError>;

    async fn block_by_hash(&self, hash: &str) -> Result<Option<Block>, StoreError>;

    /// Blocks with `from_id <= id <= to_id`, ordered by id.
    async fn blocks_in_range(
        &self,
        from_id: BlockId,
        to_id: BlockId,
    ) -> Result<Vec<Block>, StoreError>;

    /// First `limit` blocks with id above `after_id`, ordered by id.
    ///
    /// Blocks with an id above `max_id` are ignored.
    async fn blocks_after(
        &self,
        after_id: BlockId,
        max_id: Option<BlockId>,
        limit: i64,
    ) -> Result<Vec<Block>, StoreError>;

    /// Block with the highest number, if any.
    async fn last_block(&self) -> Result<Option<Block>, StoreError>;

    async fn delete_block(&self, hash: &str) -> Result<(), StoreError>;
}

/// Hands out store connections and the process-wide lock.
#[async_trait]
pub trait Backend: Send + Sync {
    type Store: Ledger + 'static;
    type Lock: Send;

    /// Opens a new store connection.
    async fn connect(&self) -> Result<Self::Store, StoreError>;

    /// Waits until exclusive lock `id` is acquired.
    async fn lock(&self, id: i64) -> Result<Self::Lock, StoreError>;

    async fn unlock(&self, lock: Self::Lock) -> Result<(), StoreError>;
}

/// Postgres backed store.
#[derive(Debug)]
pub struct PgStore {
    client: Client,
}

impl PgStore {
    pub async fn new(pgconf: &PostgresConfig) -> Result<Self, StoreError> {
        tracing::debug!("initializing new store");
        let (mut client, connection) =
            tokio_postgres::connect(&pgconf.connection_uri, NoTls).await?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("connection error: {}", e);
            }
        });

        let schema = Schema::new("etl", include_str!("store/schema.sql"));
        schema.init(&mut client).await?;

        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut Client {
        &mut self.client
    }
}

#[async_trait]
impl Ledger for PgStore {
    async fn insert_blocks(&self, blocks: &[ChainBlock]) -> Result<Vec<Block>, StoreError> {
        if blocks.is_empty() {
            return Ok(vec![]);
        }
        Ok(blocks::insert(&self.client, blocks).await?)
    }

    async fn block_by_number(&self, number: BlockNumber) -> Result<Option<Block>, StoreError> {
        Ok(blocks::get_by_number(&self.client, number).await?)
    }

    async fn block_by_id(&self, id: BlockId) -> Result<Option<Block>, StoreError> {
        Ok(blocks::get_by_id(&self.client, id).await?)
    }

    async fn block_by_hash(&self, hash: &str) -> Result<Option<Block>, StoreError> {
        Ok(blocks::get_by_hash(&self.client, hash).await?)
    }

    async fn blocks_in_range(
        &self,
        from_id: BlockId,
        to_id: BlockId,
    ) -> Result<Vec<Block>, StoreError> {
        Ok(blocks::get_range(&self.client, from_id, to_id).await?)
    }

    async fn blocks_after(
        &self,
        after_id: BlockId,
        max_id: Option<BlockId>,
        limit: i64,
    ) -> Result<Vec<Block>, StoreError> {
        Ok(blocks::get_after(&self.client, after_id, max_id, limit).await?)
    }

    async fn last_block(&self) -> Result<Option<Block>, StoreError> {
        Ok(blocks::get_last(&self.client).await?)
    }

    async fn delete_block(&self, hash: &str) -> Result<(), StoreError> {
        blocks::delete(&self.client, hash).await?;
        Ok(())
    }
}

/// Opens [`PgStore`] connections.
#[derive(Debug, Clone)]
pub struct PgBackend {
    pgconf: PostgresConfig,
}

/// A held advisory lock.
///
/// Session level locks are tied to the connection that took them,
/// so the connection is kept alive until release.
pub struct PgLock {
    id: i64,
    store: PgStore,
}

impl PgBackend {
    pub fn new(pgconf: PostgresConfig) -> Self {
        Self { pgconf }
    }
}

#[async_trait]
impl Backend for PgBackend {
    type Store = PgStore;
    type Lock = PgLock;

    async fn connect(&self) -> Result<PgStore, StoreError> {
        PgStore::new(&self.pgconf).await
    }

    async fn lock(&self, id: i64) -> Result<PgLock, StoreError> {
        let store = self.connect().await?;
        locks::acquire(&store.client, id).await?;
        Ok(PgLock { id, store })
    }

    async fn unlock(&self, lock: PgLock) -> Result<(), StoreError> {
        locks::release(&lock.store.client, lock.id).await?;
        Ok(())
    }
}
