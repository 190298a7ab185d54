pub mod jobs;
mod processor;
mod registration;
mod scheduler;
pub mod state;
pub mod stats;
pub mod utils;

pub use jobs::Job;
pub use jobs::JobStatus;
pub use jobs::Registry;
pub use jobs::RegistryTx;
pub use processor::Extractor;
pub use processor::Processor;
pub use processor::ProcessorError;
pub use processor::ProcessorKind;
pub use processor::Transformer;
pub use processor::TxServices;
pub use registration::register;
pub use registration::ProcessorSet;
pub use registration::RegistrationError;
pub use scheduler::Scheduler;
pub use state::ErrorState;
pub use state::SerializedError;
pub use stats::StatsWorker;
