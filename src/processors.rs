//! Ready to use processors.
mod raw_logs;

pub use raw_logs::PersistedLog;
pub use raw_logs::RawLogExtractor;
