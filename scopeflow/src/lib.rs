//! # Scopeflow
//!
//! A structured-concurrency runtime: task scopes, scoped spawning,
//! tree-propagated cancellation, and clock-capability timeouts.
//!
//! The central guarantee is leak-freedom — no task ever outlives the
//! scope that created it. A scope drains every remaining handle to a
//! terminal state before its entry call returns, whatever the exit path:
//!
//! - **Scoped tasks**: `spawn` registers a handle owned by the scope;
//!   unjoined handles are swept at exit and their failures aggregated
//!   deterministically in spawn order
//! - **Tree cancellation**: tokens form a parent/child tree; cancelling
//!   one flips its whole subtree before the call returns
//! - **Cooperative interruption**: cancellation only sets a flag; tasks
//!   observe it at suspension points (`join`, `timeout`, interruptible
//!   host operations)
//! - **Timeouts**: a deadline registered with an injectable clock races
//!   the computation inside an internal child scope
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use scopeflow::prelude::*;
//!
//! let ctx = RuntimeContext::new();
//! let root = ctx.root_token(); // cancel this on peer disconnect
//!
//! let result = scope_with_parent(&ctx, &root, |s| async move {
//!     let fetch = s.spawn(|token| async move { fetch_input(&token).await });
//!     let value = fetch.join().await?;
//!     s.timeout(Duration::from_secs(5), move |token| async move {
//!         process(&token, value).await
//!     })
//!     .await
//! })
//! .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, missing_docs, rust_2018_idioms)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod errors;
pub mod host;
pub mod runtime;
pub mod scope;
pub mod task;

mod timeout;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancelToken;
    pub use crate::errors::{JoinError, TaskError};
    pub use crate::host::{interruptible, sleep};
    pub use crate::runtime::{Clock, RuntimeBuilder, RuntimeContext, TimerHandle, TokioClock};
    pub use crate::scope::{
        scope, scope_with_parent, ErrorAggregator, Scope, ScopeId, ScopeState,
    };
    pub use crate::task::{TaskHandle, TaskId, TaskState};
}
