use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

use super::jobs::Registry;
use crate::core::store::StoreError;
use crate::core::types::BlockId;
use crate::utils::Breakout;

/// Progress counters at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Id of the ledger's tip
    pub blocks_synced: BlockId,
    /// Sum of extractor watermarks
    pub blocks_extracted: BlockId,
    /// Sum of transformer watermarks
    pub blocks_transformed: BlockId,
}

/// Per second rates between two samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rates {
    pub synced: f64,
    pub extracted: f64,
    pub transformed: f64,
}

impl Stats {
    /// Rates since `previous`, taken `elapsed` ago.
    pub fn rates_since(&self, previous: &Stats, elapsed: Duration) -> Rates {
        let secs = elapsed.as_secs_f64().max(f64::EPSILON);
        Rates {
            synced: (self.blocks_synced - previous.blocks_synced) as f64 / secs,
            extracted: (self.blocks_extracted - previous.blocks_extracted) as f64 / secs,
            transformed: (self.blocks_transformed - previous.blocks_transformed) as f64 / secs,
        }
    }
}

/// Reads current stats from `registry`.
pub async fn get_stats<R: Registry>(
    registry: &R,
    extractors: &HashSet<String>,
    transformers: &HashSet<String>,
) -> Result<Stats, StoreError> {
    let blocks_synced = registry.last_block().await?.map_or(0, |b| b.id);
    let mut stats = Stats {
        blocks_synced,
        blocks_extracted: 0,
        blocks_transformed: 0,
    };
    for job in registry.jobs().await? {
        if extractors.contains(&job.name) {
            stats.blocks_extracted += job.last_block_id;
        } else if transformers.contains(&job.name) {
            stats.blocks_transformed += job.last_block_id;
        }
    }
    Ok(stats)
}

/// Periodically logs ingestion and processing rates.
pub struct StatsWorker<R: Registry> {
    store: R,
    interval: Duration,
    extractors: HashSet<String>,
    transformers: HashSet<String>,
    breakout: Breakout,
}

impl<R: Registry> StatsWorker<R> {
    pub fn new(
        store: R,
        interval: Duration,
        extractors: HashSet<String>,
        transformers: HashSet<String>,
        breakout: Breakout,
    ) -> Self {
        Self {
            store,
            interval,
            extractors,
            transformers,
            breakout,
        }
    }

    pub async fn run(&self) -> Result<(), StoreError> {
        info!("stats worker starting");
        let mut previous: Option<(Stats, Instant)> = None;
        loop {
            tracing::debug!("next stats in {}s", self.interval.as_secs());
            if self.breakout.sleep(self.interval).await {
                break;
            }
            let stats = get_stats(&self.store, &self.extractors, &self.transformers).await?;
            let now = Instant::now();
            match previous {
                Some((last, at)) => {
                    let rates = stats.rates_since(&last, now - at);
                    info!(
                        "synced: {:.2} blocks/sec, extracted: {:.2} tasks/sec, transformed: {:.2} tasks/sec",
                        rates.synced, rates.extracted, rates.transformed
                    );
                }
                None => info!("missing baseline"),
            }
            previous = Some((stats, now));
        }
        Ok(())
    }
}
