//! Processors operating on the in-memory store.
use async_trait::async_trait;
use serde_json::json;
use serde_json::Value;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use chain_etl::core::types::Block;
use chain_etl::core::types::BlockNumber;
use chain_etl::framework::Extractor;
use chain_etl::framework::ProcessorError;
use chain_etl::framework::Transformer;
use chain_etl::framework::TxServices;
use chain_etl::testing::MemoryStore;

/// Stores the number of each block it sees, in a table named after itself.
///
/// Can be told to fail a number of times first.
#[derive(Clone)]
pub struct NumberExtractor {
    name: String,
    starting_block: Option<BlockNumber>,
    disable_perf_boost: bool,
    dependencies: Vec<String>,
    labelled: bool,
    failures: Arc<AtomicUsize>,
    units: Arc<Mutex<Vec<Vec<BlockNumber>>>>,
}

impl NumberExtractor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            starting_block: None,
            disable_perf_boost: false,
            dependencies: vec![],
            labelled: false,
            failures: Arc::new(AtomicUsize::new(0)),
            units: Arc::default(),
        }
    }

    pub fn starting_at(mut self, number: BlockNumber) -> Self {
        self.starting_block = Some(number);
        self
    }

    pub fn without_perf_boost(mut self) -> Self {
        self.disable_perf_boost = true;
        self
    }

    pub fn depending_on(mut self, extractor: &str) -> Self {
        self.dependencies.push(extractor.to_owned());
        self
    }

    /// Tag data handed to transformers with the extractor's name.
    pub fn labelled(mut self) -> Self {
        self.labelled = true;
        self
    }

    /// Fail next `n` units.
    pub fn failing(self, n: usize) -> Self {
        self.failures.store(n, Ordering::SeqCst);
        self
    }

    /// Block numbers of each unit attempted so far.
    pub fn units(&self) -> Vec<Vec<BlockNumber>> {
        self.units.lock().unwrap().clone()
    }
}

#[async_trait]
impl Extractor<MemoryStore> for NumberExtractor {
    fn name(&self) -> &str {
        &self.name
    }

    fn starting_block(&self) -> Option<BlockNumber> {
        self.starting_block
    }

    fn extractor_dependencies(&self) -> &[String] {
        &self.dependencies
    }

    fn disable_perf_boost(&self) -> bool {
        self.disable_perf_boost
    }

    async fn extract(
        &self,
        services: &TxServices<'_, '_, MemoryStore>,
        blocks: &[Block],
    ) -> Result<(), ProcessorError> {
        self.units
            .lock()
            .unwrap()
            .push(blocks.iter().map(|b| b.number).collect());
        for block in blocks {
            services.tx.insert(&self.name, block.id, json!(block.number))?;
        }
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ProcessorError::Other("boom".to_owned()));
        }
        Ok(())
    }

    async fn get_data(
        &self,
        services: &TxServices<'_, '_, MemoryStore>,
        blocks: &[Block],
    ) -> Result<Value, ProcessorError> {
        let (Some(first), Some(last)) = (blocks.first(), blocks.last()) else {
            return Ok(json!([]));
        };
        let rows = services.tx.rows(&self.name, first.id, last.id)?;
        let values = Value::Array(rows.into_iter().map(|(_, v)| v).collect());
        match self.labelled {
            true => Ok(json!({ "extractor": self.name, "rows": values })),
            false => Ok(values),
        }
    }
}

/// Records the data it receives.
#[derive(Clone)]
pub struct RecordingTransformer {
    name: String,
    dependencies: Vec<String>,
    transformer_dependencies: Vec<String>,
    received: Arc<Mutex<Vec<Vec<Value>>>>,
}

impl RecordingTransformer {
    pub fn new(name: &str, dependencies: &[&str]) -> Self {
        Self {
            name: name.to_owned(),
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
            transformer_dependencies: vec![],
            received: Arc::default(),
        }
    }

    pub fn after(mut self, transformer: &str) -> Self {
        self.transformer_dependencies.push(transformer.to_owned());
        self
    }

    pub fn received(&self) -> Vec<Vec<Value>> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transformer<MemoryStore> for RecordingTransformer {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    fn transformer_dependencies(&self) -> &[String] {
        &self.transformer_dependencies
    }

    async fn transform(
        &self,
        _services: &TxServices<'_, '_, MemoryStore>,
        data: Vec<Value>,
    ) -> Result<(), ProcessorError> {
        self.received.lock().unwrap().push(data);
        Ok(())
    }
}
