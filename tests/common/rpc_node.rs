//! Minimal JSON-RPC node serving blocks of a `MockChain`.
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde_json::json;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chain_etl::core::chain::BlockRef;
use chain_etl::core::chain::ChainClient;
use chain_etl::testing::MockChain;

#[derive(Clone)]
struct NodeState {
    chain: MockChain,
    /// Requests to answer with a 503 before behaving
    outages: Arc<AtomicUsize>,
    requests: Arc<AtomicUsize>,
}

pub struct TestNode {
    pub url: String,
    state: NodeState,
}

impl TestNode {
    /// Serves `chain` on a random local port.
    pub async fn start(chain: MockChain) -> Self {
        let state = NodeState {
            chain,
            outages: Arc::default(),
            requests: Arc::default(),
        };
        let app = Router::new()
            .route("/", post(handle))
            .with_state(state.clone());
        let server = axum::Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0)))
            .serve(app.into_make_service());
        let url = format!("http://{}", server.local_addr());
        tokio::spawn(async move {
            server.await.unwrap();
        });
        Self { url, state }
    }

    /// Makes the next `n` requests fail.
    pub fn go_down_for(&self, n: usize) {
        self.state.outages.store(n, Ordering::SeqCst);
    }

    pub fn requests(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }
}

async fn handle(State(state): State<NodeState>, Json(request): Json<Value>) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    let down = state
        .outages
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if down {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let id = request["id"].clone();
    let params = request["params"].clone();
    let result = match request["method"].as_str() {
        Some("eth_blockNumber") => state
            .chain
            .latest_block_number()
            .await
            .map(|n| json!(format!("{n:#x}")))
            .ok(),
        Some("eth_getBlockByNumber") => {
            let number = params[0]
                .as_str()
                .and_then(|s| s.strip_prefix("0x"))
                .and_then(|s| i64::from_str_radix(s, 16).ok());
            match number {
                Some(n) => fetch(&state.chain, BlockRef::Number(n)).await,
                None => return StatusCode::BAD_REQUEST.into_response(),
            }
        }
        Some("eth_getBlockByHash") => match params[0].as_str() {
            Some(hash) => fetch(&state.chain, BlockRef::Hash(hash.to_owned())).await,
            None => return StatusCode::BAD_REQUEST.into_response(),
        },
        Some("eth_getLogs") => Some(json!([])),
        Some("eth_getTransactionByHash") => Some(Value::Null),
        _ => {
            return Json(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": "Method not found"}
            }))
            .into_response()
        }
    };
    Json(json!({"jsonrpc": "2.0", "id": id, "result": result.unwrap_or(Value::Null)}))
        .into_response()
}

async fn fetch(chain: &MockChain, block: BlockRef) -> Option<Value> {
    let block = chain.block(block).await.ok()??;
    serde_json::to_value(block).ok()
}
