//! Host interruption primitives.
//!
//! Blocking host operations (sleeps, socket reads) become suspension
//! points by racing them against a token: when the token transitions to
//! cancelled mid-flight, the operation resolves to `Err(Cancelled)`
//! instead of running to completion.

use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::cancellation::CancelToken;
use crate::errors::TaskError;
use crate::runtime::RuntimeContext;

/// Races `operation` against cancellation of `token`.
///
/// Returns `Err(Cancelled)` immediately when the token is already
/// cancelled; otherwise resolves with whichever side finishes first.
/// The losing operation is dropped, not completed.
pub async fn interruptible<F>(token: &CancelToken, operation: F) -> Result<F::Output, TaskError>
where
    F: Future,
{
    if token.is_cancelled() {
        return Err(TaskError::Cancelled);
    }
    tokio::select! {
        output = operation => Ok(output),
        () = token.cancelled() => Err(TaskError::Cancelled),
    }
}

/// Sleeps for `duration` through the context's clock capability,
/// resolving early with `Err(Cancelled)` if the token transitions first.
pub async fn sleep(
    ctx: &RuntimeContext,
    token: &CancelToken,
    duration: Duration,
) -> Result<(), TaskError> {
    let (tx, rx) = oneshot::channel();
    let timer = ctx.clock().schedule(
        duration,
        Box::new(move || {
            let _ = tx.send(());
        }),
    );
    match interruptible(token, rx).await {
        Ok(_) => Ok(()),
        Err(error) => {
            ctx.clock().disarm(&timer);
            Err(error)
        }
    }
}
