use axum::extract::Extension;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::RwLock;
use tokio::sync::mpsc;

use crate::core::types::BlockId;
use crate::core::types::BlockNumber;

/// Capacity of the monitor channel. Senders drop messages when it's full.
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorMessage {
    /// Number of the last block in the ledger
    LedgerTip(BlockNumber),
    /// Watermark of a job moved to given block id
    Watermark(String, BlockId),
    /// Job got stopped
    Stopped(String),
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatusReport {
    pub last_block_id: BlockId,
    pub stopped: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorData {
    pub ledger_tip: Option<BlockNumber>,
    pub jobs: BTreeMap<String, JobStatusReport>,
}

impl MonitorData {
    fn apply(&mut self, msg: MonitorMessage) {
        match msg {
            MonitorMessage::LedgerTip(number) => self.ledger_tip = Some(number),
            MonitorMessage::Watermark(name, id) => {
                self.jobs.entry(name).or_default().last_block_id = id;
            }
            MonitorMessage::Stopped(name) => self.jobs.entry(name).or_default().stopped = true,
        }
    }
}

type SharedState = Arc<RwLock<MonitorData>>;

pub struct Monitor {
    tx: mpsc::Sender<MonitorMessage>,
    rx: mpsc::Receiver<MonitorMessage>,
    state: SharedState,
}

impl Monitor {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            rx,
            state: SharedState::default(),
        }
    }

    pub fn sender(&self) -> mpsc::Sender<MonitorMessage> {
        self.tx.clone()
    }

    /// Copy of current state.
    pub fn snapshot(&self) -> MonitorData {
        self.state.read().map(|d| d.clone()).unwrap_or_default()
    }

    /// Serves `/status` on `port` and applies incoming messages until all senders are gone.
    pub async fn start(mut self, port: u16) {
        self.start_server(port);
        // Our own sender would keep the channel open forever
        drop(self.tx);
        while let Some(msg) = self.rx.recv().await {
            if let Ok(mut data) = self.state.write() {
                data.apply(msg);
            }
        }
        tracing::debug!("monitor channel closed");
    }

    fn start_server(&self, port: u16) {
        let app = Router::new()
            .route(
                "/",
                get(|| async { "Hey there, you're probably after /status" }),
            )
            .route("/status", get(status))
            .layer(Extension(self.state.clone()));

        let address = SocketAddr::from(([0, 0, 0, 0], port));
        tokio::spawn(async move {
            tracing::info!("monitor listening on {}", &address);
            if let Err(e) = axum::Server::bind(&address)
                .serve(app.into_make_service())
                .await
            {
                tracing::error!("monitor server failed: {e}");
            }
        });
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

async fn status(Extension(state): Extension<SharedState>) -> Json<MonitorData> {
    Json(state.read().map(|d| d.clone()).unwrap_or_default())
}
