use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;

use super::processor::ProcessorError;
use crate::core::types::Block;
use crate::core::types::BlockId;

/// A processor failure as recorded in a stopped job's `extra_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedError {
    pub kind: String,
    pub message: String,
    pub first_block_id: BlockId,
    pub last_block_id: BlockId,
}

impl SerializedError {
    /// Records `error` raised while processing `unit`.
    pub fn new(error: &ProcessorError, unit: &[Block]) -> Self {
        Self {
            kind: error.kind().to_owned(),
            message: error.to_string(),
            first_block_id: unit.first().map_or(0, |b| b.id),
            last_block_id: unit.last().map_or(0, |b| b.id),
        }
    }
}

/// Recent failures per processor, since its last successful batch.
///
/// Owned by a single scheduler for the duration of a run.
#[derive(Debug, Default)]
pub struct ErrorState {
    errors: HashMap<String, Vec<SerializedError>>,
}

impl ErrorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `error` to history of `name` and returns the new error count.
    pub fn record(&mut self, name: &str, error: SerializedError) -> usize {
        let history = self.errors.entry(name.to_owned()).or_default();
        history.push(error);
        history.len()
    }

    pub fn history(&self, name: &str) -> &[SerializedError] {
        self.errors.get(name).map(|h| h.as_slice()).unwrap_or(&[])
    }

    pub fn count(&self, name: &str) -> usize {
        self.history(name).len()
    }

    pub fn clear(&mut self, name: &str) {
        self.errors.remove(name);
    }

    /// Removes and returns the history of `name`.
    pub fn take(&mut self, name: &str) -> Vec<SerializedError> {
        self.errors.remove(name).unwrap_or_default()
    }
}
