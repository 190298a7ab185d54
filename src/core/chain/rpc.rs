use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use serde_json::Value;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::models::quantity;
use super::BlockRef;
use super::ChainBlock;
use super::ChainClient;
use super::ChainError;
use super::Log;
use super::LogFilter;
use super::Transaction;
use crate::core::types::BlockNumber;

/// JSON-RPC client for an EVM style node.
///
/// Failed calls are retried `retries` times before giving up.
#[derive(Debug, Clone)]
pub struct RpcClient {
    url: String,
    http: reqwest::Client,
    retries: u32,
    retry_delay: Duration,
    next_id: Arc<AtomicU64>,
    head: Arc<watch::Sender<Option<BlockNumber>>>,
}

#[derive(Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorObject>,
}

#[derive(Deserialize)]
struct ErrorObject {
    code: i64,
    message: String,
}

impl RpcClient {
    pub fn new(url: &str, retries: u32) -> Self {
        tracing::info!("using chain node at {url}");
        let (head, _) = watch::channel(None);
        Self {
            url: url.to_owned(),
            http: reqwest::Client::new(),
            retries,
            retry_delay: Duration::from_secs(1),
            next_id: Arc::new(AtomicU64::new(1)),
            head: Arc::new(head),
        }
    }

    /// Override the delay between retries (1s by default).
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Spawns a task polling the node's latest block number every `interval`
    /// and publishing changes to subscribers.
    ///
    /// The task runs until aborted.
    pub fn spawn_head_poller(&self, interval: Duration) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            loop {
                match client.latest_block_number().await {
                    Ok(number) => {
                        client.head.send_if_modified(|head| {
                            if *head == Some(number) {
                                return false;
                            }
                            tracing::trace!("new chain head {number}");
                            *head = Some(number);
                            true
                        });
                    }
                    Err(e) => tracing::warn!("failed polling chain head: {e}"),
                }
                tokio::time::sleep(interval).await;
            }
        })
    }

    /// Performs `method` call, retrying on failure.
    async fn call<R: DeserializeOwned>(&self, method: &str, params: Value) -> Result<R, ChainError> {
        let mut attempt = 0;
        loop {
            match self.call_once(method, &params).await {
                Ok(value) => {
                    return serde_json::from_value(value)
                        .map_err(|e| ChainError::Deserialization(format!("{method}: {e}")))
                }
                Err(e @ ChainError::Deserialization(_)) => return Err(e),
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    tracing::debug!("{method} failed ({e}), retry {attempt}/{}", self.retries);
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn call_once(&self, method: &str, params: &Value) -> Result<Value, ChainError> {
        let request = Request {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params: params.clone(),
        };
        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|_| ChainError::NodeUnreachable)?;

        match response.status() {
            StatusCode::OK => (),
            StatusCode::BAD_REQUEST => return Err(ChainError::BadRequest(method.to_owned())),
            status => {
                return Err(ChainError::Rpc {
                    method: method.to_owned(),
                    message: format!("http status {status}"),
                })
            }
        }

        let body: Response = response
            .json()
            .await
            .map_err(|e| ChainError::Deserialization(format!("{method}: {e}")))?;
        if let Some(err) = body.error {
            return Err(ChainError::Rpc {
                method: method.to_owned(),
                message: format!("{} ({})", err.message, err.code),
            });
        }
        Ok(body.result.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl ChainClient for RpcClient {
    async fn block(&self, block: BlockRef) -> Result<Option<ChainBlock>, ChainError> {
        match block {
            BlockRef::Number(number) => {
                self.call(
                    "eth_getBlockByNumber",
                    json!([format!("{number:#x}"), false]),
                )
                .await
            }
            BlockRef::Hash(hash) => self.call("eth_getBlockByHash", json!([hash, false])).await,
        }
    }

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<Log>, ChainError> {
        self.call("eth_getLogs", json!([filter])).await
    }

    async fn transaction(&self, hash: &str) -> Result<Option<Transaction>, ChainError> {
        self.call("eth_getTransactionByHash", json!([hash])).await
    }

    async fn latest_block_number(&self) -> Result<BlockNumber, ChainError> {
        let hex: String = self.call("eth_blockNumber", json!([])).await?;
        quantity::parse(&hex).map_err(ChainError::Deserialization)
    }

    fn subscribe(&self) -> watch::Receiver<Option<BlockNumber>> {
        self.head.subscribe()
    }
}
