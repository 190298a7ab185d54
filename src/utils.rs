use std::time::Duration;
use tokio::sync::watch;
use tokio_postgres::Client;

use crate::core::store::StoreError;

/// Latest schema revision known to this build.
const REV_MAJOR: i32 = 1;
const REV_MINOR: i32 = 0;

pub struct Schema {
    name: String,
    sql: &'static str,
}

struct Revision {
    pub major: i32,
    pub minor: i32,
}

impl Schema {
    pub fn new(name: &str, sql: &'static str) -> Self {
        Self {
            name: name.to_owned(),
            sql,
        }
    }

    /// Loads the schema if it doesn't exist yet and checks its revision.
    pub async fn init(&self, client: &mut Client) -> Result<(), StoreError> {
        if !self.schema_exists(client).await? {
            self.load_schema(client).await?;
        }
        let rev = self.schema_revision(client).await?;
        if rev.major != REV_MAJOR || rev.minor > REV_MINOR {
            return Err(StoreError::SchemaRevision {
                schema: self.name.clone(),
                major: rev.major,
                minor: rev.minor,
            });
        }
        Ok(())
    }

    async fn schema_revision(&self, client: &Client) -> Result<Revision, StoreError> {
        tracing::debug!("reading current revision of {}", self.name);
        let qry = format!("select rev_major, rev_minor from {}._rev;", self.name);
        let row = client.query_one(&qry, &[]).await?;
        Ok(Revision {
            major: row.get(0),
            minor: row.get(1),
        })
    }

    async fn schema_exists(&self, client: &Client) -> Result<bool, StoreError> {
        tracing::debug!("checking for existing schema {}", self.name);
        let qry = "
        select exists(
            select schema_name
            from information_schema.schemata
            where schema_name = $1
        );";
        Ok(client.query_one(qry, &[&self.name]).await?.get(0))
    }

    async fn load_schema(&self, client: &mut Client) -> Result<(), StoreError> {
        tracing::info!("loading schema {}", self.name);
        let tx = client.transaction().await?;
        tx.batch_execute(self.sql).await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Cancellation flag shared by all long running loops.
///
/// Cheap to clone. Once triggered, stays triggered.
#[derive(Debug, Clone)]
pub struct Breakout {
    tx: std::sync::Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Breakout {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: std::sync::Arc::new(tx),
            rx,
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_set(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once triggered.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // Sender lives as long as self, so this can't fail before being set.
        let _ = rx.wait_for(|set| *set).await;
    }

    /// Sleeps for `duration` or until triggered, whichever comes first.
    ///
    /// Returns true if triggered.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_set(),
            _ = self.wait() => true,
        }
    }
}

impl Default for Breakout {
    fn default() -> Self {
        Self::new()
    }
}
