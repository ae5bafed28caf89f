//! Runtime context and clock capability.
//!
//! This module provides:
//! - `RuntimeContext` — the explicit runtime object scopes run under
//! - `RuntimeBuilder` — clock and handle injection
//! - `Clock` / `TokioClock` — the timer capability used by timeouts

mod clock;
mod context;

pub use clock::{Clock, TimerCallback, TimerHandle, TokioClock};
pub use context::{RuntimeBuilder, RuntimeContext};

pub(crate) use context::panic_message;
