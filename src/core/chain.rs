mod models;
mod rpc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

use super::types::BlockNumber;

pub use models::BlockRef;
pub use models::ChainBlock;
pub use models::Log;
pub use models::LogFilter;
pub use models::Transaction;
pub use rpc::RpcClient;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Chain node is unreachable. Could be a temporary outage but make sure your config is set correctly and the node is running.")]
    NodeUnreachable,
    #[error("Bad chain node request: {0}")]
    BadRequest(String),
    #[error("Chain node returned an error for {method}: {message}")]
    Rpc { method: String, message: String },
    #[error("Failed parsing response from chain node: {0}")]
    Deserialization(String),
    #[error("Block {0} could not be fetched after notification of its inclusion")]
    MissingBlock(BlockNumber),
}

/// Read access to the chain.
///
/// Implementations are expected to retry transient failures internally. Any
/// error coming out of here is considered fatal by the ingestion loop.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Get block by number or hash, `None` if not produced (yet).
    async fn block(&self, block: BlockRef) -> Result<Option<ChainBlock>, ChainError>;

    /// Get logs matching `filter`.
    async fn logs(&self, filter: &LogFilter) -> Result<Vec<Log>, ChainError>;

    /// Get transaction with given `hash`.
    async fn transaction(&self, hash: &str) -> Result<Option<Transaction>, ChainError>;

    /// Number of the latest block known to the node.
    async fn latest_block_number(&self) -> Result<BlockNumber, ChainError>;

    /// Subscribe to new block notifications.
    ///
    /// The receiver holds the number of the latest block seen so far, `None`
    /// until the first notification. Dropping it removes the listener.
    fn subscribe(&self) -> watch::Receiver<Option<BlockNumber>>;
}
