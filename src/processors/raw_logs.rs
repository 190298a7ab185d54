use async_trait::async_trait;
use futures::future::join_all;
use itertools::Itertools;
use postgres_from_row::FromRow;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use tokio_postgres::Transaction;

use crate::core::chain::Log;
use crate::core::chain::LogFilter;
use crate::core::store::PgStore;
use crate::core::store::StoreError;
use crate::core::types::Block;
use crate::core::types::BlockId;
use crate::core::types::BlockNumber;
use crate::core::types::BlockRange;
use crate::framework::Extractor;
use crate::framework::ProcessorError;
use crate::framework::TxServices;
use crate::utils::Schema;

/// A log as stored by the raw log extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PersistedLog {
    pub block_id: BlockId,
    pub log_index: i64,
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub tx_hash: String,
}

/// Stores raw logs emitted by given contracts, optionally restricted to some topics.
///
/// Transactions the logs belong to are stored alongside.
#[derive(Debug, Clone)]
pub struct RawLogExtractor {
    name: String,
    addresses: Vec<String>,
    topics: Vec<String>,
    starting_block: Option<BlockNumber>,
}

impl RawLogExtractor {
    /// Empty `addresses` or `topics` match anything.
    pub fn new(name: &str, addresses: Vec<String>, topics: Vec<String>) -> Self {
        Self {
            name: name.to_owned(),
            addresses: addresses.into_iter().map(|a| a.to_lowercase()).collect(),
            topics,
            starting_block: None,
        }
    }

    pub fn with_starting_block(mut self, number: BlockNumber) -> Self {
        self.starting_block = Some(number);
        self
    }

    /// Creates the extractor's tables if needed.
    pub async fn init(store: &mut PgStore) -> Result<(), StoreError> {
        let schema = Schema::new("raw_logs", include_str!("raw_logs.sql"));
        schema.init(store.client_mut()).await
    }

    /// Query for logs of `blocks`. Single blocks are queried by hash.
    pub fn log_filter(&self, blocks: &[Block]) -> Option<LogFilter> {
        let (first, last) = (blocks.first()?, blocks.last()?);
        let topics = match self.topics.is_empty() {
            true => vec![],
            false => vec![self.topics.clone()],
        };
        let filter = LogFilter {
            address: self.addresses.clone(),
            topics,
            ..Default::default()
        };
        if blocks.len() == 1 {
            Some(LogFilter {
                block_hash: Some(first.hash.clone()),
                ..filter
            })
        } else {
            Some(LogFilter {
                from_block: Some(first.number),
                to_block: Some(last.number),
                ..filter
            })
        }
    }

    /// Pairs `logs` with the id of their block.
    ///
    /// Logs of blocks not in `blocks` (another branch) are dropped.
    pub fn to_persisted(blocks: &[Block], logs: Vec<Log>) -> Vec<PersistedLog> {
        let ids: HashMap<&str, BlockId> = blocks.iter().map(|b| (b.hash.as_str(), b.id)).collect();
        logs.into_iter()
            .filter_map(|log| {
                let block_id = *ids.get(log.block_hash.as_str())?;
                Some(PersistedLog {
                    block_id,
                    log_index: log.log_index,
                    address: log.address.to_lowercase(),
                    topics: log.topics,
                    data: log.data,
                    tx_hash: log.transaction_hash,
                })
            })
            .collect()
    }

    async fn insert_logs(
        &self,
        pgtx: &Transaction<'_>,
        logs: &[PersistedLog],
    ) -> Result<(), tokio_postgres::Error> {
        let stmt = "
            insert into raw_logs.logs (extractor, block_id, log_index, address, topics, data, tx_hash)
            values ($1, $2, $3, $4, $5, $6, $7)
            on conflict do nothing;";
        let stmt = pgtx.prepare(stmt).await?;
        for log in logs {
            pgtx.execute(
                &stmt,
                &[
                    &self.name,
                    &log.block_id,
                    &log.log_index,
                    &log.address,
                    &log.topics,
                    &log.data,
                    &log.tx_hash,
                ],
            )
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Extractor<PgStore> for RawLogExtractor {
    fn name(&self) -> &str {
        &self.name
    }

    fn starting_block(&self) -> Option<BlockNumber> {
        self.starting_block
    }

    async fn extract(
        &self,
        services: &TxServices<'_, '_, PgStore>,
        blocks: &[Block],
    ) -> Result<(), ProcessorError> {
        let Some(filter) = self.log_filter(blocks) else {
            return Ok(());
        };
        let logs = Self::to_persisted(blocks, services.chain.logs(&filter).await?);
        tracing::trace!("{} found {} logs in {} blocks", self.name, logs.len(), blocks.len());
        if logs.is_empty() {
            return Ok(());
        }
        self.insert_logs(services.tx, &logs).await?;

        // One transaction can emit many logs
        let tx_blocks: Vec<(&str, BlockId)> = logs
            .iter()
            .map(|log| (log.tx_hash.as_str(), log.block_id))
            .unique()
            .collect();
        let transactions = join_all(
            tx_blocks
                .iter()
                .map(|(hash, _)| services.chain.transaction(hash)),
        )
        .await;
        let stmt = services
            .tx
            .prepare(
                "
                insert into raw_logs.transactions (hash, block_id, from_address, to_address, value)
                values ($1, $2, $3, $4, $5)
                on conflict do nothing;",
            )
            .await?;
        for ((hash, block_id), res) in tx_blocks.iter().zip(transactions) {
            let tx = res?.ok_or_else(|| {
                ProcessorError::Other(format!("transaction {hash} not found on chain"))
            })?;
            services
                .tx
                .execute(&stmt, &[hash, block_id, &tx.from, &tx.to, &tx.value])
                .await?;
        }
        Ok(())
    }

    async fn get_data(
        &self,
        services: &TxServices<'_, '_, PgStore>,
        blocks: &[Block],
    ) -> Result<serde_json::Value, ProcessorError> {
        let Some(range) = BlockRange::of(blocks) else {
            return Ok(serde_json::Value::Array(vec![]));
        };
        let qry = "
            select block_id, log_index, address, topics, data, tx_hash
            from raw_logs.logs
            where extractor = $1 and block_id >= $2 and block_id <= $3
            order by block_id, log_index;";
        let logs = services
            .tx
            .query(qry, &[&self.name, &range.first_id, &range.last_id])
            .await?
            .iter()
            .map(PersistedLog::try_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(serde_json::to_value(logs)?)
    }
}
