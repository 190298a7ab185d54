use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

use super::jobs::Registry;
use super::jobs::RegistryTx;
use super::processor::Extractor;
use super::processor::Processor;
use super::processor::ProcessorError;
use super::processor::ProcessorKind;
use super::processor::Transformer;
use super::processor::TxServices;
use super::registration::ProcessorSet;
use super::state::ErrorState;
use super::state::SerializedError;
use super::utils::close_to_tip;
use super::utils::consecutive_runs;
use super::utils::singletons;
use crate::config::EtlConfig;
use crate::core::chain::ChainClient;
use crate::core::store::StoreError;
use crate::core::types::Block;
use crate::core::types::NetworkState;
use crate::monitor::MonitorMessage;
use crate::utils::Breakout;

/// Runs processors of one kind over the ledger.
///
/// Each sweep gives every processor its next blocks. Blocks are processed in
/// units, each one in its own transaction together with the watermark update.
pub struct Scheduler<R: Registry> {
    store: R,
    chain: Arc<dyn ChainClient>,
    config: EtlConfig,
    network: NetworkState,
    processors: Vec<Processor<R>>,
    /// Extractors transformers may pull data from.
    extractors: HashMap<String, Arc<dyn Extractor<R>>>,
    batch_size: i64,
    errors: ErrorState,
    breakout: Breakout,
    monitor_tx: Option<mpsc::Sender<MonitorMessage>>,
}

impl<R: Registry> Scheduler<R> {
    /// Batch size comes from the kind's own setting (`extractor_batch` or
    /// `transformer_batch`). It bounds each fetch of next blocks and also
    /// sets how far from the tip a batch may start before falling back to
    /// single block units, so transformers use a different tip threshold.
    pub fn new(
        store: R,
        chain: Arc<dyn ChainClient>,
        config: &EtlConfig,
        network: NetworkState,
        processors: &ProcessorSet<R>,
        kind: ProcessorKind,
        breakout: Breakout,
    ) -> Self {
        let batch_size = match kind {
            ProcessorKind::Extractor => config.extractor_batch,
            ProcessorKind::Transformer => config.transformer_batch,
        };
        Self {
            store,
            chain,
            config: config.clone(),
            network,
            processors: processors.of_kind(kind),
            extractors: processors.extractors(),
            batch_size: batch_size.max(1),
            errors: ErrorState::new(),
            breakout,
            monitor_tx: None,
        }
    }

    pub fn with_monitor(mut self, monitor_tx: mpsc::Sender<MonitorMessage>) -> Self {
        self.monitor_tx = Some(monitor_tx);
        self
    }

    pub fn store(&self) -> &R {
        &self.store
    }

    pub fn errors(&self) -> &ErrorState {
        &self.errors
    }

    /// Sweeps processors until breakout, pausing when there's nothing to do.
    pub async fn run(&mut self) -> Result<(), StoreError> {
        debug!("starting scheduler for {} processors", self.processors.len());
        if self.processors.is_empty() {
            return Ok(());
        }
        while !self.breakout.is_set() {
            let processed = self.sweep().await?;
            if processed == 0 && self.breakout.sleep(self.config.poll_interval).await {
                break;
            }
        }
        debug!("scheduler stopped");
        Ok(())
    }

    /// Gives each processor one go. Returns the number of blocks handed out.
    pub async fn sweep(&mut self) -> Result<usize, StoreError> {
        let processors = self.processors.clone();
        let mut processed = 0;
        for processor in &processors {
            if self.breakout.is_set() {
                break;
            }
            processed += self.process_blocks(processor).await?;
        }
        Ok(processed)
    }

    /// Processes the next blocks available to `processor`.
    ///
    /// Processor failures are recorded, not returned. Only store failures
    /// outside of a unit are.
    pub async fn process_blocks(&mut self, processor: &Processor<R>) -> Result<usize, StoreError> {
        let name = processor.name();
        let blocks = self
            .store
            .next_blocks(name, &processor.dependencies(), self.batch_size)
            .await?;
        let Some(first) = blocks.first() else {
            return Ok(0);
        };

        let risky = close_to_tip(
            first.number,
            self.batch_size,
            self.network.latest_block_number_at_start,
            self.config.reorg_buffer,
        );
        let units = if risky || processor.disable_perf_boost() {
            singletons(&blocks)
        } else {
            consecutive_runs(&blocks)
        };
        debug!(
            "processing {} blocks with {name} in {} units",
            blocks.len(),
            units.len()
        );

        for unit in units {
            if self.breakout.is_set() {
                return Ok(blocks.len());
            }
            trace!(
                "{name} processing blocks {}..={}",
                unit[0].number,
                unit[unit.len() - 1].number
            );
            match self.process_unit(processor, unit).await {
                Ok(last_id) => self.report(MonitorMessage::Watermark(name.to_owned(), last_id)),
                Err(err) => {
                    self.handle_failure(name, unit, err).await?;
                    return Ok(blocks.len());
                }
            }
        }
        self.errors.clear(name);
        Ok(blocks.len())
    }

    /// Runs `processor` on `unit` and advances its watermark, atomically.
    ///
    /// Returns the new watermark.
    async fn process_unit(
        &mut self,
        processor: &Processor<R>,
        unit: &[Block],
    ) -> Result<i64, ProcessorError> {
        let last_id = unit[unit.len() - 1].id;
        let tx = self.store.begin().await?;
        let outcome = {
            let services: TxServices<'_, '_, R> = TxServices::new(
                &tx,
                self.chain.as_ref(),
                &self.config,
                &self.network,
            );
            run_unit(processor, &self.extractors, &services, unit).await
        };
        match outcome {
            Ok(()) => {
                tx.commit().await?;
                Ok(last_id)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("rollback failed: {rollback_err}");
                }
                Err(err)
            }
        }
    }

    async fn handle_failure(
        &mut self,
        name: &str,
        unit: &[Block],
        err: ProcessorError,
    ) -> Result<(), StoreError> {
        warn!(
            "{name} failed on blocks {}..={}: {err}",
            unit[0].number,
            unit[unit.len() - 1].number
        );
        let count = self.errors.record(name, SerializedError::new(&err, unit));
        if count > self.config.retries_on_errors {
            let history = self.errors.take(name);
            let extra_info = serde_json::to_value(&history)?;
            error!("stopping {name} after {count} failures, restart to resume: {extra_info}");
            self.store.stop_job(name, extra_info).await?;
            self.report(MonitorMessage::Stopped(name.to_owned()));
        }
        Ok(())
    }

    fn report(&self, msg: MonitorMessage) {
        if let Some(tx) = &self.monitor_tx {
            let _ = tx.try_send(msg);
        }
    }
}

async fn run_unit<R: Registry>(
    processor: &Processor<R>,
    extractors: &HashMap<String, Arc<dyn Extractor<R>>>,
    services: &TxServices<'_, '_, R>,
    unit: &[Block],
) -> Result<(), ProcessorError> {
    match processor {
        Processor::Extractor(extractor) => extractor.extract(services, unit).await?,
        Processor::Transformer(transformer) => {
            let data = gather(transformer.as_ref(), extractors, services, unit).await?;
            transformer.transform(services, data).await?;
        }
    }
    services
        .tx
        .advance_job(processor.name(), unit[unit.len() - 1].id)
        .await?;
    Ok(())
}

/// Data of each extractor `transformer` depends on, in declaration order.
async fn gather<R: Registry>(
    transformer: &dyn Transformer<R>,
    extractors: &HashMap<String, Arc<dyn Extractor<R>>>,
    services: &TxServices<'_, '_, R>,
    unit: &[Block],
) -> Result<Vec<serde_json::Value>, ProcessorError> {
    let dependencies = transformer
        .dependencies()
        .iter()
        .map(|name| {
            extractors
                .get(name)
                .ok_or_else(|| ProcessorError::MissingDependency(name.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    join_all(dependencies.iter().map(|e| e.get_data(services, unit)))
        .await
        .into_iter()
        .collect()
}
