use std::time::Duration;
use tokio_postgres::Client;

/// Delay between lock acquisition attempts.
const RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Waits until the session level advisory lock `id` is acquired.
pub(super) async fn acquire(client: &Client, id: i64) -> Result<(), tokio_postgres::Error> {
    let mut attempts: u64 = 0;
    loop {
        let acquired: bool = client
            .query_one("select pg_try_advisory_lock($1);", &[&id])
            .await?
            .get(0);
        if acquired {
            tracing::debug!("acquired lock {id:#x}");
            return Ok(());
        }
        attempts += 1;
        if attempts == 1 || attempts % 20 == 0 {
            tracing::info!("lock {id:#x} is held by another process, waiting");
        }
        tokio::time::sleep(RETRY_INTERVAL).await;
    }
}

/// Releases advisory lock `id`. Returns false if it wasn't held.
pub(super) async fn release(client: &Client, id: i64) -> Result<bool, tokio_postgres::Error> {
    let released: bool = client
        .query_one("select pg_advisory_unlock($1);", &[&id])
        .await?
        .get(0);
    if !released {
        tracing::warn!("lock {id:#x} was not held on release");
    }
    Ok(released)
}
