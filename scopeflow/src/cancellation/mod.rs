//! Tree-based cooperative cancellation.
//!
//! This module provides:
//! - `CancelToken` for cooperative, tree-propagated cancellation
//! - an index-addressed arena backing the token tree

pub(crate) mod arena;
mod token;

pub use token::CancelToken;
