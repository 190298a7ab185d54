use async_trait::async_trait;
use postgres_from_row::FromRow;
use tokio_postgres::Transaction;

use super::Job;
use super::JobStatus;
use super::Registry;
use super::RegistryTx;
use crate::core::store::PgStore;
use crate::core::store::StoreError;
use crate::core::types::BlockId;

const COLUMNS: &str = "id, name, last_block_id, status, extra_info";

#[async_trait]
impl Registry for PgStore {
    type Tx<'a> = Transaction<'a>;

    async fn job(&self, name: &str) -> Result<Option<Job>, StoreError> {
        let qry = format!("select {COLUMNS} from etl.jobs where name = $1;");
        Ok(self
            .client()
            .query_opt(&qry, &[&name])
            .await?
            .map(|row| Job::try_from_row(&row))
            .transpose()?)
    }

    async fn jobs(&self) -> Result<Vec<Job>, StoreError> {
        let qry = format!("select {COLUMNS} from etl.jobs order by id;");
        Ok(self
            .client()
            .query(&qry, &[])
            .await?
            .iter()
            .map(Job::try_from_row)
            .collect::<Result<Vec<Job>, _>>()?)
    }

    async fn insert_job(&self, name: &str, last_block_id: BlockId) -> Result<Job, StoreError> {
        let stmt = format!(
            "insert into etl.jobs (name, last_block_id, status) values ($1, $2, $3) returning {COLUMNS};"
        );
        let row = self
            .client()
            .query_one(&stmt, &[&name, &last_block_id, &JobStatus::Processing])
            .await?;
        Ok(Job::try_from_row(&row)?)
    }

    async fn set_status(&self, name: &str, status: JobStatus) -> Result<(), StoreError> {
        self.client()
            .execute(
                "update etl.jobs set status = $2 where name = $1;",
                &[&name, &status],
            )
            .await?;
        Ok(())
    }

    async fn exclude_all(&self) -> Result<u64, StoreError> {
        Ok(self
            .client()
            .execute(
                "update etl.jobs set status = $1;",
                &[&JobStatus::NotReady],
            )
            .await?)
    }

    async fn stop_job(&self, name: &str, extra_info: serde_json::Value) -> Result<(), StoreError> {
        self.client()
            .execute(
                "update etl.jobs set status = $2, extra_info = $3 where name = $1;",
                &[&name, &JobStatus::Stopped, &extra_info],
            )
            .await?;
        Ok(())
    }

    async fn min_watermark(&self, names: &[String]) -> Result<Option<BlockId>, StoreError> {
        let qry = "select min(last_block_id) from etl.jobs where name = any($1);";
        Ok(self.client().query_one(qry, &[&names]).await?.get(0))
    }

    async fn begin(&mut self) -> Result<Transaction<'_>, StoreError> {
        Ok(self.client_mut().transaction().await?)
    }
}

#[async_trait]
impl<'a> RegistryTx for Transaction<'a> {
    async fn advance_job(&self, name: &str, last_block_id: BlockId) -> Result<(), StoreError> {
        self.execute(
            "update etl.jobs set last_block_id = $2 where name = $1;",
            &[&name, &last_block_id],
        )
        .await?;
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        Transaction::commit(self).await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Transaction::rollback(self).await?;
        Ok(())
    }
}
