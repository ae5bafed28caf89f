//! Ordered error collection and flattening for scope exit.

use crate::errors::TaskError;

/// Collects task errors in spawn order and applies the scope-exit
/// flattening rule.
///
/// `Many` contributions are flattened one level as they are appended, so
/// a finalized `Many` never nests and never has fewer than two elements.
#[derive(Debug, Default)]
pub struct ErrorAggregator {
    errors: Vec<TaskError>,
}

impl ErrorAggregator {
    /// Creates an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an error, preserving insertion order. A `Many` is unpacked
    /// into its elements.
    pub fn append(&mut self, error: TaskError) {
        match error {
            TaskError::Many(inner) => self.errors.extend(inner),
            other => self.errors.push(other),
        }
    }

    /// Returns true when nothing has been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of collected errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Applies the flattening rule: zero errors yields `None`, one error
    /// is returned unwrapped, several become `Many` in insertion order.
    /// When every collected error is `Cancelled` the scope's cancellation
    /// had a single cause, so a single `Cancelled` is returned instead of
    /// `Many`.
    #[must_use]
    pub fn finalize(mut self) -> Option<TaskError> {
        match self.errors.len() {
            0 => None,
            1 => Some(self.errors.remove(0)),
            _ if self.errors.iter().all(TaskError::is_cancelled) => Some(TaskError::Cancelled),
            _ => Some(TaskError::Many(self.errors)),
        }
    }
}
