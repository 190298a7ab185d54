use futures::future::BoxFuture;
use std::env;
use std::sync::Arc;

use chain_etl::config::ConfigError;
use chain_etl::config::EtlConfig;
use chain_etl::config::PostgresConfig;
use chain_etl::core::chain::RpcClient;
use chain_etl::core::store::PgBackend;
use chain_etl::core::store::PgStore;
use chain_etl::core::store::StoreError;
use chain_etl::framework::Processor;
use chain_etl::monitor::Monitor;
use chain_etl::processors::RawLogExtractor;
use chain_etl::Etl;
use chain_etl::EtlError;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn init_raw_logs(store: &mut PgStore) -> BoxFuture<'_, Result<(), StoreError>> {
    Box::pin(RawLogExtractor::init(store))
}

#[tokio::main]
async fn main() -> Result<(), EtlError> {
    // Configure tracing subscriber
    let filter = env::var("ETL_LOG").unwrap_or(String::from("chain_etl=info"));
    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_max_level(tracing::Level::INFO)
        .with_env_filter(filter)
        .finish();

    let _guard = tracing::subscriber::set_global_default(subscriber);

    tracing::info!("starting chain-etl v{VERSION}");
    if cfg!(feature = "test-utilities") {
        tracing::warn!("build includes test-utilities, use cargo's `--no-default-features` flag");
    } else {
        tracing::debug!("compiled without test-utilities");
    }

    // Env variables
    let config = EtlConfig::from_env()?;
    let pgconf = PostgresConfig::from_env()?;
    let node_url = env::var("ETL_NODE_URL").map_err(|_| ConfigError::Missing("ETL_NODE_URL"))?;
    tracing::debug!("found ETL_NODE_URL environment variable");

    let rpc = RpcClient::new(&node_url, config.chain_retries);
    let head_poller = rpc.spawn_head_poller(config.head_poll_interval);

    let mut processors: Vec<Processor<PgStore>> = vec![];
    if !config.log_addresses.is_empty() {
        let extractor = RawLogExtractor::new("raw-logs", config.log_addresses.clone(), vec![])
            .with_starting_block(config.starting_block);
        processors.push(Processor::Extractor(Arc::new(extractor)));
    } else {
        tracing::warn!("ETL_LOG_ADDRESSES is not set, only blocks will be ingested");
    }

    let mut etl = Etl::new(PgBackend::new(pgconf), Arc::new(rpc), config.clone(), processors)?
        .with_on_start(Box::new(init_raw_logs));

    if let Some(port) = config.monitor_port {
        let monitor = Monitor::new();
        etl = etl.with_monitor(monitor.sender());
        tokio::spawn(monitor.start(port));
    }

    // Stop on ctrl-c
    let breakout = etl.breakout();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received ctrl-c, stopping");
            breakout.trigger();
        }
    });

    let res = etl.run().await;
    head_poller.abort();
    match &res {
        Ok(()) => tracing::info!("exiting"),
        Err(e) => tracing::error!("{e}"),
    }
    res
}
