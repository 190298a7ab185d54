mod pg;

use async_trait::async_trait;
use postgres_from_row::FromRow;
use postgres_types::FromSql;
use postgres_types::ToSql;
use serde::Deserialize;
use serde::Serialize;

use crate::core::store::Ledger;
use crate::core::store::StoreError;
use crate::core::types::Block;
use crate::core::types::BlockId;

/// Lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ToSql, FromSql, Serialize, Deserialize)]
#[postgres(name = "job_status")]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    #[postgres(name = "processing")]
    Processing,
    /// Stopped after too many failures. Only a restart resumes it.
    #[postgres(name = "stopped")]
    Stopped,
    /// Not part of the current configuration.
    #[postgres(name = "not-ready")]
    NotReady,
}

/// Persisted progress of a processor.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Job {
    pub id: i32,
    pub name: String,
    /// Watermark: id of the last fully processed block.
    pub last_block_id: BlockId,
    pub status: JobStatus,
    /// Error history of a stopped job.
    pub extra_info: Option<serde_json::Value>,
}

/// Job table, on top of the ledger.
#[async_trait]
pub trait Registry: Ledger {
    /// Transaction handed to processors.
    type Tx<'a>: RegistryTx
    where
        Self: 'a;

    async fn job(&self, name: &str) -> Result<Option<Job>, StoreError>;

    async fn jobs(&self) -> Result<Vec<Job>, StoreError>;

    /// Creates a new job with `processing` status.
    async fn insert_job(&self, name: &str, last_block_id: BlockId) -> Result<Job, StoreError>;

    async fn set_status(&self, name: &str, status: JobStatus) -> Result<(), StoreError>;

    /// Marks all jobs as not ready.
    async fn exclude_all(&self) -> Result<u64, StoreError>;

    /// Marks job as stopped, recording `extra_info`.
    async fn stop_job(&self, name: &str, extra_info: serde_json::Value) -> Result<(), StoreError>;

    /// Lowest watermark of jobs named in `names`, `None` if none of them exist.
    async fn min_watermark(&self, names: &[String]) -> Result<Option<BlockId>, StoreError>;

    async fn begin(&mut self) -> Result<Self::Tx<'_>, StoreError>;

    /// Blocks job `name` can process next, ordered by id.
    ///
    /// Empty if the job isn't processing. Never goes beyond the
    /// lowest watermark of `dependencies`.
    async fn next_blocks(
        &self,
        name: &str,
        dependencies: &[String],
        limit: i64,
    ) -> Result<Vec<Block>, StoreError> {
        let job = self
            .job(name)
            .await?
            .ok_or_else(|| StoreError::Inconsistent(format!("missing job for {name}")))?;
        if job.status != JobStatus::Processing {
            tracing::debug!("skipping {name}, job status is {:?}", job.status);
            return Ok(vec![]);
        }
        let cap = if dependencies.is_empty() {
            None
        } else {
            match self.min_watermark(dependencies).await? {
                Some(min) if min > job.last_block_id => Some(min),
                _ => return Ok(vec![]),
            }
        };
        self.blocks_after(job.last_block_id, cap, limit).await
    }
}

/// Unit of work of a processor.
///
/// Dropping it without commit discards all changes.
#[async_trait]
pub trait RegistryTx: Send + Sync {
    /// Moves watermark of job `name` to `last_block_id`.
    async fn advance_job(&self, name: &str, last_block_id: BlockId) -> Result<(), StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}
