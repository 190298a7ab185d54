// cargo test --test test_rpc_client
mod common;

use pretty_assertions::assert_eq;
use std::time::Duration;

use chain_etl::core::chain::BlockRef;
use chain_etl::core::chain::ChainClient;
use chain_etl::core::chain::ChainError;
use chain_etl::core::chain::LogFilter;
use chain_etl::core::chain::RpcClient;
use chain_etl::testing::MockChain;
use common::rpc_node::TestNode;

fn client(node: &TestNode, retries: u32) -> RpcClient {
    RpcClient::new(&node.url, retries).with_retry_delay(Duration::from_millis(5))
}

#[tokio::test]
async fn test_get_block_by_number_and_hash() {
    let _guard = common::set_tracing_subscriber(false);
    let chain = MockChain::new(3);
    let node = TestNode::start(chain.clone()).await;
    let rpc = client(&node, 0);

    let block = rpc.block(BlockRef::Number(1)).await.unwrap().unwrap();
    assert_eq!(block, chain.block_at(1).unwrap());

    let by_hash = rpc
        .block(BlockRef::Hash(block.hash.clone()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_hash, block);
}

#[tokio::test]
async fn test_unknown_block_is_none() {
    let node = TestNode::start(MockChain::new(3)).await;
    let rpc = client(&node, 0);
    assert_eq!(rpc.block(BlockRef::Number(3)).await.unwrap(), None);
    assert_eq!(rpc.transaction("0xabc").await.unwrap(), None);
    assert!(rpc.logs(&LogFilter::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_latest_block_number() {
    let chain = MockChain::new(5);
    let node = TestNode::start(chain.clone()).await;
    let rpc = client(&node, 0);
    assert_eq!(rpc.latest_block_number().await.unwrap(), 4);
    chain.extend(2);
    assert_eq!(rpc.latest_block_number().await.unwrap(), 6);
}

#[tokio::test]
async fn test_retries_through_outage() {
    let node = TestNode::start(MockChain::new(2)).await;
    let rpc = client(&node, 3);
    node.go_down_for(2);
    assert_eq!(rpc.latest_block_number().await.unwrap(), 1);
    assert_eq!(node.requests(), 3);
}

#[tokio::test]
async fn test_gives_up_after_retries() {
    let node = TestNode::start(MockChain::new(2)).await;
    let rpc = client(&node, 1);
    node.go_down_for(5);
    let err = rpc.latest_block_number().await.unwrap_err();
    assert!(matches!(err, ChainError::Rpc { .. }));
    assert_eq!(node.requests(), 2);
}

#[tokio::test]
async fn test_unreachable_node() {
    // Nothing listens on port 1
    let rpc = RpcClient::new("http://127.0.0.1:1", 0);
    let err = rpc.latest_block_number().await.unwrap_err();
    assert!(matches!(err, ChainError::NodeUnreachable));
}

#[tokio::test]
async fn test_head_poller_notifies_subscribers() {
    let chain = MockChain::new(3);
    let node = TestNode::start(chain.clone()).await;
    let rpc = client(&node, 0);
    let mut head_rx = rpc.subscribe();
    assert_eq!(*head_rx.borrow(), None);

    let poller = rpc.spawn_head_poller(Duration::from_millis(10));
    head_rx.changed().await.unwrap();
    assert_eq!(*head_rx.borrow_and_update(), Some(2));

    chain.extend(1);
    head_rx.changed().await.unwrap();
    assert_eq!(*head_rx.borrow(), Some(3));
    poller.abort();
}
