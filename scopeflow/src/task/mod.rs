//! Task handles, states, and the drain seam used by scopes.

mod handle;
mod state;

pub use handle::TaskHandle;
pub use state::{TaskId, TaskState};

pub(crate) use handle::{DrainEntry, TaskShared};
