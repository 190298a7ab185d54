use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use super::jobs::JobStatus;
use super::jobs::Registry;
use super::processor::Extractor;
use super::processor::Processor;
use super::processor::ProcessorKind;
use crate::core::store::StoreError;

#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("Processor name {0} is used more than once")]
    DuplicateName(String),
    #[error("{processor} depends on unknown {kind} {dependency}")]
    UnknownDependency {
        processor: String,
        kind: ProcessorKind,
        dependency: String,
    },
    #[error("{processor} depends on itself")]
    SelfDependency { processor: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A validated collection of processors.
///
/// Names are unique and every dependency resolves to a processor of the expected kind.
pub struct ProcessorSet<R: Registry> {
    processors: Vec<Processor<R>>,
}

impl<R: Registry> Clone for ProcessorSet<R> {
    fn clone(&self) -> Self {
        Self {
            processors: self.processors.clone(),
        }
    }
}

impl<R: Registry> ProcessorSet<R> {
    pub fn new(processors: Vec<Processor<R>>) -> Result<Self, RegistrationError> {
        let mut kinds: HashMap<&str, ProcessorKind> = HashMap::new();
        for p in &processors {
            if kinds.insert(p.name(), p.kind()).is_some() {
                return Err(RegistrationError::DuplicateName(p.name().to_owned()));
            }
        }

        for p in &processors {
            let expected: Vec<(&String, ProcessorKind)> = match p {
                Processor::Extractor(e) => e
                    .extractor_dependencies()
                    .iter()
                    .map(|d| (d, ProcessorKind::Extractor))
                    .collect(),
                Processor::Transformer(t) => t
                    .dependencies()
                    .iter()
                    .map(|d| (d, ProcessorKind::Extractor))
                    .chain(
                        t.transformer_dependencies()
                            .iter()
                            .map(|d| (d, ProcessorKind::Transformer)),
                    )
                    .collect(),
            };
            for (dependency, kind) in expected {
                if dependency == p.name() {
                    return Err(RegistrationError::SelfDependency {
                        processor: p.name().to_owned(),
                    });
                }
                if kinds.get(dependency.as_str()) != Some(&kind) {
                    return Err(RegistrationError::UnknownDependency {
                        processor: p.name().to_owned(),
                        kind,
                        dependency: dependency.clone(),
                    });
                }
            }
        }
        Ok(Self { processors })
    }

    pub fn all(&self) -> &[Processor<R>] {
        &self.processors
    }

    /// Processors of given `kind`, in configuration order.
    pub fn of_kind(&self, kind: ProcessorKind) -> Vec<Processor<R>> {
        self.processors
            .iter()
            .filter(|p| p.kind() == kind)
            .cloned()
            .collect()
    }

    /// Extractors by name.
    pub fn extractors(&self) -> HashMap<String, Arc<dyn Extractor<R>>> {
        self.processors
            .iter()
            .filter_map(|p| match p {
                Processor::Extractor(e) => Some((e.name().to_owned(), e.clone())),
                Processor::Transformer(_) => None,
            })
            .collect()
    }
}

/// Brings the job table in line with the configured `processors`.
///
/// Existing jobs are excluded first, then configured ones set back to
/// processing (or created) with their watermark untouched.
pub async fn register<R: Registry>(
    registry: &R,
    processors: &ProcessorSet<R>,
) -> Result<(), RegistrationError> {
    let excluded = registry.exclude_all().await?;
    tracing::debug!("excluded {excluded} existing jobs");

    for p in processors.all() {
        match registry.job(p.name()).await? {
            Some(job) => {
                if job.status == JobStatus::Stopped {
                    info!("resuming stopped {:?} at block id {}", p, job.last_block_id);
                }
                registry.set_status(p.name(), JobStatus::Processing).await?;
            }
            None => {
                let last_block_id = match p.starting_block() {
                    Some(number) => match registry.block_by_number(number).await? {
                        Some(block) => block.id,
                        None => {
                            tracing::warn!(
                                "starting block {number} of {:?} is not synced yet, starting from first block",
                                p
                            );
                            0
                        }
                    },
                    None => 0,
                };
                info!("registering new {:?} at block id {last_block_id}", p);
                registry.insert_job(p.name(), last_block_id).await?;
            }
        }
    }
    Ok(())
}
