pub mod chain;
pub mod store;
pub mod tracking;
pub mod types;
