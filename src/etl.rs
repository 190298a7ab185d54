use futures::future::BoxFuture;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;
use tracing::warn;

use crate::config::ConfigError;
use crate::config::EtlConfig;
use crate::core::chain::ChainClient;
use crate::core::chain::ChainError;
use crate::core::store::Backend;
use crate::core::store::StoreError;
use crate::core::tracking::BlockGenerator;
use crate::core::tracking::TrackingError;
use crate::core::types::NetworkState;
use crate::framework::register;
use crate::framework::Processor;
use crate::framework::ProcessorKind;
use crate::framework::ProcessorSet;
use crate::framework::Registry;
use crate::framework::RegistrationError;
use crate::framework::Scheduler;
use crate::framework::StatsWorker;
use crate::monitor::MonitorMessage;
use crate::utils::Breakout;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Tracking(#[from] TrackingError),
    #[error(transparent)]
    Registration(#[from] RegistrationError),
}

/// Hook run once the process lock is acquired, before registration.
pub type OnStart<S> =
    Box<dyn for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, Result<(), StoreError>> + Send>;

/// A complete ETL: block generator, extractors, transformers and stats.
pub struct Etl<B: Backend>
where
    B::Store: Registry,
{
    backend: B,
    chain: Arc<dyn ChainClient>,
    config: EtlConfig,
    processors: ProcessorSet<B::Store>,
    on_start: Option<OnStart<B::Store>>,
    breakout: Breakout,
    monitor_tx: Option<mpsc::Sender<MonitorMessage>>,
}

impl<B: Backend> Etl<B>
where
    B::Store: Registry,
{
    /// Fails if `processors` don't form a valid set.
    pub fn new(
        backend: B,
        chain: Arc<dyn ChainClient>,
        config: EtlConfig,
        processors: Vec<Processor<B::Store>>,
    ) -> Result<Self, RegistrationError> {
        Ok(Self {
            backend,
            chain,
            config,
            processors: ProcessorSet::new(processors)?,
            on_start: None,
            breakout: Breakout::new(),
            monitor_tx: None,
        })
    }

    pub fn with_on_start(mut self, hook: OnStart<B::Store>) -> Self {
        self.on_start = Some(hook);
        self
    }

    pub fn with_monitor(mut self, monitor_tx: mpsc::Sender<MonitorMessage>) -> Self {
        self.monitor_tx = Some(monitor_tx);
        self
    }

    /// Use `breakout` to stop the ETL.
    pub fn with_breakout(mut self, breakout: Breakout) -> Self {
        self.breakout = breakout;
        self
    }

    /// Handle to stop the ETL.
    pub fn breakout(&self) -> Breakout {
        self.breakout.clone()
    }

    /// Runs under the process lock until breakout or a fatal error.
    pub async fn run(mut self) -> Result<(), EtlError> {
        info!("waiting for process lock {:#x}", self.config.process_lock_id);
        let lock = self.backend.lock(self.config.process_lock_id).await?;
        let res = self.run_locked().await;
        if let Err(e) = self.backend.unlock(lock).await {
            warn!("failed releasing process lock: {e}");
        }
        res
    }

    async fn run_locked(&mut self) -> Result<(), EtlError> {
        let mut store = self.backend.connect().await?;
        if let Some(hook) = self.on_start.take() {
            info!("running on start hook");
            hook(&mut store).await?;
        }

        info!("registering {} processors", self.processors.all().len());
        register(&store, &self.processors).await?;

        let network = NetworkState::new(self.chain.latest_block_number().await?);
        info!(
            "chain at block {} on start",
            network.latest_block_number_at_start
        );

        let mut generator = BlockGenerator::new(
            store,
            self.chain.clone(),
            &self.config,
            self.breakout.clone(),
        );
        let mut extractors = self.scheduler(network, ProcessorKind::Extractor).await?;
        let mut transformers = self.scheduler(network, ProcessorKind::Transformer).await?;
        let stats = match self.config.stats_enabled {
            true => Some(StatsWorker::new(
                self.backend.connect().await?,
                self.config.stats_interval,
                names(&self.processors, ProcessorKind::Extractor),
                names(&self.processors, ProcessorKind::Transformer),
                self.breakout.clone(),
            )),
            false => None,
        };
        if let Some(tx) = &self.monitor_tx {
            generator = generator.with_monitor(tx.clone());
            extractors = extractors.with_monitor(tx.clone());
            transformers = transformers.with_monitor(tx.clone());
        }

        tokio::try_join!(
            async { generator.run().await.map_err(EtlError::from) },
            async { extractors.run().await.map_err(EtlError::from) },
            async { transformers.run().await.map_err(EtlError::from) },
            async {
                match &stats {
                    Some(worker) => worker.run().await.map_err(EtlError::from),
                    None => Ok(()),
                }
            },
        )?;
        info!("etl stopped");
        Ok(())
    }

    async fn scheduler(
        &self,
        network: NetworkState,
        kind: ProcessorKind,
    ) -> Result<Scheduler<B::Store>, StoreError> {
        Ok(Scheduler::new(
            self.backend.connect().await?,
            self.chain.clone(),
            &self.config,
            network,
            &self.processors,
            kind,
            self.breakout.clone(),
        ))
    }
}

fn names<R: Registry>(
    processors: &ProcessorSet<R>,
    kind: ProcessorKind,
) -> std::collections::HashSet<String> {
    processors
        .of_kind(kind)
        .iter()
        .map(|p| p.name().to_owned())
        .collect()
}
