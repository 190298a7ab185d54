use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::jobs::Registry;
use crate::config::EtlConfig;
use crate::core::chain::ChainClient;
use crate::core::chain::ChainError;
use crate::core::store::StoreError;
use crate::core::types::Block;
use crate::core::types::BlockNumber;
use crate::core::types::NetworkState;

/// Failure of a processor on a unit of blocks.
///
/// Always retryable, the unit's watermark advance is rolled back with it.
#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Postgres(#[from] tokio_postgres::Error),
    #[error("Bad processor data: {0}")]
    Data(#[from] serde_json::Error),
    #[error("Missing extractor dependency {0}")]
    MissingDependency(String),
    #[error("{0}")]
    Other(String),
}

impl ProcessorError {
    /// Short label used in serialized error histories.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Store(_) => "store",
            Self::Chain(_) => "chain",
            Self::Postgres(_) => "postgres",
            Self::Data(_) => "data",
            Self::MissingDependency(_) => "dependency",
            Self::Other(_) => "other",
        }
    }
}

/// Everything a processor gets to work with during a unit.
pub struct TxServices<'s, 'c, R: Registry + 'c> {
    /// Open transaction of the unit.
    pub tx: &'s R::Tx<'c>,
    pub chain: &'s dyn ChainClient,
    pub config: &'s EtlConfig,
    pub network: &'s NetworkState,
}

impl<'s, 'c, R: Registry + 'c> TxServices<'s, 'c, R> {
    pub fn new(
        tx: &'s R::Tx<'c>,
        chain: &'s dyn ChainClient,
        config: &'s EtlConfig,
        network: &'s NetworkState,
    ) -> Self {
        Self {
            tx,
            chain,
            config,
            network,
        }
    }
}

/// Pulls data out of blocks and persists it.
#[async_trait]
pub trait Extractor<R: Registry>: Send + Sync {
    fn name(&self) -> &str;

    /// Chain number to start from. Blocks before it are skipped.
    fn starting_block(&self) -> Option<BlockNumber> {
        None
    }

    fn extractor_dependencies(&self) -> &[String] {
        &[]
    }

    /// Always process one block per transaction.
    fn disable_perf_boost(&self) -> bool {
        false
    }

    /// Extracts data of `blocks`. Must tolerate being rerun on the same blocks.
    async fn extract(
        &self,
        services: &TxServices<'_, '_, R>,
        blocks: &[Block],
    ) -> Result<(), ProcessorError>;

    /// Extracted data of `blocks`, for dependent transformers.
    async fn get_data(
        &self,
        services: &TxServices<'_, '_, R>,
        blocks: &[Block],
    ) -> Result<serde_json::Value, ProcessorError>;
}

/// Derives data from what extractors collected.
#[async_trait]
pub trait Transformer<R: Registry>: Send + Sync {
    fn name(&self) -> &str;

    fn starting_block(&self) -> Option<BlockNumber> {
        None
    }

    /// Extractors whose data gets passed to `transform`, in that order.
    fn dependencies(&self) -> &[String];

    fn transformer_dependencies(&self) -> &[String] {
        &[]
    }

    /// `data` holds one entry per dependency.
    async fn transform(
        &self,
        services: &TxServices<'_, '_, R>,
        data: Vec<serde_json::Value>,
    ) -> Result<(), ProcessorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorKind {
    Extractor,
    Transformer,
}

impl fmt::Display for ProcessorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Extractor => write!(f, "extractor"),
            Self::Transformer => write!(f, "transformer"),
        }
    }
}

pub enum Processor<R: Registry> {
    Extractor(Arc<dyn Extractor<R>>),
    Transformer(Arc<dyn Transformer<R>>),
}

impl<R: Registry> Clone for Processor<R> {
    fn clone(&self) -> Self {
        match self {
            Self::Extractor(e) => Self::Extractor(e.clone()),
            Self::Transformer(t) => Self::Transformer(t.clone()),
        }
    }
}

impl<R: Registry> fmt::Debug for Processor<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind(), self.name())
    }
}

impl<R: Registry> Processor<R> {
    pub fn extractor(extractor: impl Extractor<R> + 'static) -> Self {
        Self::Extractor(Arc::new(extractor))
    }

    pub fn transformer(transformer: impl Transformer<R> + 'static) -> Self {
        Self::Transformer(Arc::new(transformer))
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Extractor(e) => e.name(),
            Self::Transformer(t) => t.name(),
        }
    }

    pub fn kind(&self) -> ProcessorKind {
        match self {
            Self::Extractor(_) => ProcessorKind::Extractor,
            Self::Transformer(_) => ProcessorKind::Transformer,
        }
    }

    pub fn starting_block(&self) -> Option<BlockNumber> {
        match self {
            Self::Extractor(e) => e.starting_block(),
            Self::Transformer(t) => t.starting_block(),
        }
    }

    pub fn disable_perf_boost(&self) -> bool {
        match self {
            Self::Extractor(e) => e.disable_perf_boost(),
            Self::Transformer(_) => false,
        }
    }

    /// Names of all jobs this processor must not get ahead of.
    pub fn dependencies(&self) -> Vec<String> {
        match self {
            Self::Extractor(e) => e.extractor_dependencies().to_vec(),
            Self::Transformer(t) => t
                .dependencies()
                .iter()
                .chain(t.transformer_dependencies())
                .cloned()
                .collect(),
        }
    }
}
