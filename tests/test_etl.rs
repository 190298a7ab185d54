// cargo test --test test_etl
mod common;

use futures::future::BoxFuture;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use chain_etl::config::EtlConfig;
use chain_etl::core::store::Ledger;
use chain_etl::core::store::StoreError;
use chain_etl::framework::JobStatus;
use chain_etl::framework::Processor;
use chain_etl::framework::Registry;
use chain_etl::monitor::MonitorMessage;
use chain_etl::testing::MemoryBackend;
use chain_etl::testing::MemoryStore;
use chain_etl::testing::MockChain;
use chain_etl::Etl;
use common::processors::NumberExtractor;
use common::processors::RecordingTransformer;

fn config() -> EtlConfig {
    EtlConfig {
        generator_batch: 3,
        extractor_batch: 2,
        transformer_batch: 2,
        poll_interval: Duration::from_millis(5),
        stats_interval: Duration::from_millis(20),
        ..Default::default()
    }
}

fn seed_legacy_job(store: &mut MemoryStore) -> BoxFuture<'_, Result<(), StoreError>> {
    Box::pin(async move {
        store.insert_job("legacy", 3).await?;
        Ok(())
    })
}

/// Polls until job `name` reaches `last_block_id`.
async fn wait_for_watermark(store: &MemoryStore, name: &str, last_block_id: i64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let job = store.job(name).await.unwrap();
            if job.map(|j| j.last_block_id) == Some(last_block_id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("watermark not reached in time");
}

#[tokio::test]
async fn test_end_to_end() {
    let _guard = common::set_tracing_subscriber(false);
    let chain = MockChain::new(6);
    let backend = MemoryBackend::default();
    let store = backend.store();
    let extractor = NumberExtractor::new("numbers");
    let transformer = RecordingTransformer::new("sums", &["numbers"]);
    let (monitor_tx, mut monitor_rx) = mpsc::channel(1000);

    let etl = Etl::new(
        backend.clone(),
        Arc::new(chain.clone()),
        config(),
        vec![
            Processor::extractor(extractor.clone()),
            Processor::transformer(transformer.clone()),
        ],
    )
    .unwrap()
    .with_on_start(Box::new(seed_legacy_job))
    .with_monitor(monitor_tx);
    let breakout = etl.breakout();

    let scenario = async {
        wait_for_watermark(&store, "sums", 6).await;
        assert!(backend.is_locked(config().process_lock_id));

        chain.extend(2);
        wait_for_watermark(&store, "sums", 8).await;
        breakout.trigger();
    };
    let (res, _) = tokio::join!(etl.run(), scenario);
    res.unwrap();

    assert!(!backend.is_locked(config().process_lock_id));
    assert_eq!(store.blocks().await.len(), 8);
    assert_eq!(store.last_block().await.unwrap().unwrap().number, 7);
    assert_eq!(watermark_of(&store, "numbers").await, 8);
    let numbers: Vec<serde_json::Value> = store
        .rows("numbers")
        .await
        .into_iter()
        .map(|(_, v)| v)
        .collect();
    assert_eq!(numbers, (0..8).map(|n| serde_json::json!(n)).collect::<Vec<_>>());

    // Each extracted number got transformed exactly once
    let mut received: Vec<serde_json::Value> = transformer
        .received()
        .into_iter()
        .flat_map(|data| data[0].as_array().cloned().unwrap_or_default())
        .collect();
    received.sort_by_key(|v| v.as_i64());
    assert_eq!(received, numbers);

    // Hook ran before registration excluded the job it created
    let legacy = store.job("legacy").await.unwrap().unwrap();
    assert_eq!(legacy.status, JobStatus::NotReady);

    let mut messages = vec![];
    while let Ok(msg) = monitor_rx.try_recv() {
        messages.push(msg);
    }
    assert!(messages.contains(&MonitorMessage::LedgerTip(7)));
    assert!(messages.contains(&MonitorMessage::Watermark("sums".to_owned(), 8)));
    assert!(!messages
        .iter()
        .any(|m| matches!(m, MonitorMessage::Stopped(_))));
}

async fn watermark_of(store: &MemoryStore, name: &str) -> i64 {
    store.job(name).await.unwrap().unwrap().last_block_id
}

#[tokio::test]
async fn test_stops_at_last_block_after_breakout() {
    let chain = MockChain::new(4);
    let backend = MemoryBackend::default();
    let store = backend.store();
    let config = EtlConfig {
        last_block: Some(2),
        stats_enabled: false,
        ..config()
    };
    let etl = Etl::new(
        backend.clone(),
        Arc::new(chain.clone()),
        config,
        vec![Processor::extractor(NumberExtractor::new("numbers"))],
    )
    .unwrap();
    let breakout = etl.breakout();

    let scenario = async {
        wait_for_watermark(&store, "numbers", 3).await;
        breakout.trigger();
    };
    let (res, _) = tokio::join!(etl.run(), scenario);
    res.unwrap();

    let numbers: Vec<i64> = store.blocks().await.iter().map(|b| b.number).collect();
    assert_eq!(numbers, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_invalid_processor_set() {
    let res = Etl::new(
        MemoryBackend::default(),
        Arc::new(MockChain::new(1)),
        config(),
        vec![Processor::transformer(RecordingTransformer::new("sums", &["numbers"]))],
    );
    assert!(res.is_err());
}
