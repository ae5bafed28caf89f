//! Error types for the scopeflow runtime.
//!
//! The task failure taxonomy is deliberately small: a task either observed
//! cancellation, ran out of time, faulted, or a scope collected several of
//! those at exit. `Many` is always flat and never carries fewer than two
//! elements; flattening happens in [`crate::scope::ErrorAggregator`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The failure outcome of a task or scope.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskError {
    /// The task observed scope-requested or inherited cancellation.
    #[error("task was cancelled")]
    Cancelled,

    /// The deadline elapsed before the computation completed.
    #[error("operation timed out")]
    Timeout,

    /// An unrecoverable defect in the task's computation.
    #[error("task fault: {0}")]
    Fault(String),

    /// Two or more concrete errors collected at one scope exit,
    /// ordered by spawn order. Never nested, never fewer than two.
    #[error("{} tasks failed", .0.len())]
    Many(Vec<TaskError>),
}

impl TaskError {
    /// Creates a `Fault` from any description.
    #[must_use]
    pub fn fault(description: impl Into<String>) -> Self {
        Self::Fault(description.into())
    }

    /// Returns true if this error is `Cancelled`.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns true if this error is `Timeout`.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// Error returned by [`crate::task::TaskHandle::join`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    /// The handle's result was already consumed by an earlier join.
    #[error("task handle was already joined")]
    AlreadyJoined,

    /// The task reached a failure state.
    #[error(transparent)]
    Failed(#[from] TaskError),
}

impl From<JoinError> for TaskError {
    fn from(err: JoinError) -> Self {
        match err {
            JoinError::AlreadyJoined => Self::fault("task handle was already joined"),
            JoinError::Failed(e) => e,
        }
    }
}
