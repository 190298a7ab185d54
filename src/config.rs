use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::core::types::BlockNumber;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing environment variable {0}")]
    Missing(&'static str),
    #[error("Invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Postgresql connection URI postgresql://[userspec@][hostspec][/dbname][?paramspec]
    pub connection_uri: String,
}

impl PostgresConfig {
    pub fn new(uri: &str) -> Self {
        Self {
            connection_uri: uri.to_owned(),
        }
    }

    /// Reads connection URI from `ETL_POSTGRES_URI`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let uri = env::var("ETL_POSTGRES_URI").map_err(|_| ConfigError::Missing("ETL_POSTGRES_URI"))?;
        tracing::debug!("found ETL_POSTGRES_URI environment variable");
        Ok(Self::new(&uri))
    }
}

/// Run-time settings of an ETL instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtlConfig {
    /// Chain number ingestion starts from.
    pub starting_block: BlockNumber,
    /// Ingestion stops once this number is reached. Runs forever if `None`.
    pub last_block: Option<BlockNumber>,
    /// Blocks fetched in parallel by the generator.
    pub generator_batch: i64,
    pub extractor_batch: i64,
    pub transformer_batch: i64,
    /// Distance to chain tip (in blocks) under which batching is avoided.
    /// Zero disables the check, for chains that don't reorg.
    pub reorg_buffer: i64,
    /// Failures tolerated before a processor gets stopped.
    pub retries_on_errors: usize,
    /// Scheduler sleep after an idle sweep.
    pub poll_interval: Duration,
    /// Advisory lock preventing concurrent instances.
    pub process_lock_id: i64,
    pub chain_retries: u32,
    pub head_poll_interval: Duration,
    pub stats_enabled: bool,
    pub stats_interval: Duration,
    pub monitor_port: Option<u16>,
    /// Contracts the raw log extractor is restricted to. All when empty.
    pub log_addresses: Vec<String>,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            starting_block: 0,
            last_block: None,
            generator_batch: 40,
            extractor_batch: 400,
            transformer_batch: 1000,
            reorg_buffer: 100,
            retries_on_errors: 10,
            poll_interval: Duration::from_millis(1000),
            process_lock_id: 0x1337,
            chain_retries: 15,
            head_poll_interval: Duration::from_millis(1000),
            stats_enabled: true,
            stats_interval: Duration::from_secs(600),
            monitor_port: None,
            log_addresses: vec![],
        }
    }
}

impl EtlConfig {
    /// Default config overridden by any `ETL_*` variables set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Builds a config from `lookup`, falling back to defaults for missing entries.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let d = Self::default();
        let lookup = &lookup;
        Ok(Self {
            starting_block: parse(lookup, "ETL_STARTING_BLOCK")?.unwrap_or(d.starting_block),
            last_block: parse(lookup, "ETL_LAST_BLOCK")?.or(d.last_block),
            generator_batch: positive(lookup, "ETL_GENERATOR_BATCH")?.unwrap_or(d.generator_batch),
            extractor_batch: positive(lookup, "ETL_EXTRACTOR_BATCH")?.unwrap_or(d.extractor_batch),
            transformer_batch: positive(lookup, "ETL_TRANSFORMER_BATCH")?
                .unwrap_or(d.transformer_batch),
            reorg_buffer: parse(lookup, "ETL_REORG_BUFFER")?.unwrap_or(d.reorg_buffer),
            retries_on_errors: parse(lookup, "ETL_RETRIES_ON_ERRORS")?
                .unwrap_or(d.retries_on_errors),
            poll_interval: parse(lookup, "ETL_POLL_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(d.poll_interval),
            process_lock_id: lock_id(lookup)?.unwrap_or(d.process_lock_id),
            chain_retries: parse(lookup, "ETL_CHAIN_RETRIES")?.unwrap_or(d.chain_retries),
            head_poll_interval: parse(lookup, "ETL_HEAD_POLL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(d.head_poll_interval),
            stats_enabled: parse(lookup, "ETL_STATS")?.unwrap_or(d.stats_enabled),
            stats_interval: parse(lookup, "ETL_STATS_INTERVAL_S")?
                .map(Duration::from_secs)
                .unwrap_or(d.stats_interval),
            monitor_port: parse(lookup, "ETL_MONITOR_PORT")?.or(d.monitor_port),
            log_addresses: lookup("ETL_LOG_ADDRESSES")
                .map(|s| {
                    s.split(',')
                        .map(|a| a.trim().to_lowercase())
                        .filter(|a| !a.is_empty())
                        .collect()
                })
                .unwrap_or(d.log_addresses),
        })
    }
}

fn parse<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&'static str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

fn positive<F>(lookup: &F, var: &'static str) -> Result<Option<i64>, ConfigError>
where
    F: Fn(&'static str) -> Option<String>,
{
    match parse::<i64, F>(lookup, var)? {
        Some(n) if n <= 0 => Err(ConfigError::Invalid {
            var,
            value: n.to_string(),
        }),
        other => Ok(other),
    }
}

/// Lock id's are commonly written in hex.
fn lock_id<F>(lookup: &F) -> Result<Option<i64>, ConfigError>
where
    F: Fn(&'static str) -> Option<String>,
{
    let var = "ETL_PROCESS_LOCK";
    match lookup(var) {
        None => Ok(None),
        Some(value) => {
            let trimmed = value.trim();
            let parsed = match trimmed.strip_prefix("0x") {
                Some(hex) => i64::from_str_radix(hex, 16),
                None => trimmed.parse(),
            };
            parsed
                .map(Some)
                .map_err(|_| ConfigError::Invalid { var, value })
        }
    }
}
