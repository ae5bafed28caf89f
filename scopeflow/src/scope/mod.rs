//! Task scopes and error aggregation.
//!
//! This module provides:
//! - `Scope` and the `scope` / `scope_with_parent` entry points
//! - the scope-exit drain and aggregation protocol
//! - `ErrorAggregator` for ordered failure collection

mod aggregate;
mod task_scope;

#[cfg(test)]
mod integration_tests;

pub use aggregate::ErrorAggregator;
pub use task_scope::{scope, scope_with_parent, Scope, ScopeId, ScopeState};

pub(crate) use task_scope::ScopeInner;
