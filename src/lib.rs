pub mod config;
pub mod core;
pub mod etl;
pub mod framework;
pub mod monitor;
pub mod processors;
#[cfg(feature = "test-utilities")]
pub mod testing;
pub mod utils;

pub use etl::Etl;
pub use etl::EtlError;
