//! End-to-end tests for scope lifetimes, cancellation propagation, and
//! failure aggregation.

use crate::errors::TaskError;
use crate::host::sleep;
use crate::prelude::*;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_leak_freedom_every_handle_terminal_after_exit() {
    let ctx = RuntimeContext::new();
    let spawn_ctx = ctx.clone();

    let handles = scope(&ctx, |s| {
        let ctx = spawn_ctx;
        async move {
            let handles: Vec<TaskHandle<()>> = (0..4_u64)
                .map(|i| {
                    let ctx = ctx.clone();
                    s.spawn(move |token| async move {
                        sleep(&ctx, &token, Duration::from_millis(10 * (i + 1))).await
                    })
                })
                .collect();
            // Handles escape unjoined; the exit drain must still wait.
            Ok(handles)
        }
    })
    .await
    .unwrap();

    for handle in &handles {
        assert!(handle.is_finished());
        assert_eq!(handle.state(), TaskState::Completed);
    }
}

#[tokio::test]
async fn test_cancellation_reaches_three_levels() {
    let ctx = RuntimeContext::new();
    let root = ctx.root_token();
    let observed = Arc::new(AtomicUsize::new(0));

    let spawn_ctx = ctx.clone();
    let root_cancel = root.clone();
    let leaf_probe = observed.clone();

    // 1 root scope, 2 mid scopes, 4 leaf tasks.
    let result: Result<(), _> = scope_with_parent(&ctx, &root, |s| {
        let ctx = spawn_ctx;
        let observed = leaf_probe;
        async move {
            for _ in 0..2 {
                let ctx = ctx.clone();
                let observed = observed.clone();
                s.spawn(move |token| async move {
                    scope_with_parent(&ctx, &token, |mid| {
                        let observed = observed.clone();
                        async move {
                            for _ in 0..2 {
                                let observed = observed.clone();
                                mid.spawn(move |leaf_token| async move {
                                    leaf_token.cancelled().await;
                                    observed.fetch_add(1, Ordering::SeqCst);
                                    Err::<(), _>(TaskError::Cancelled)
                                });
                            }
                            Ok(())
                        }
                    })
                    .await
                });
            }
            tokio::task::yield_now().await;
            root_cancel.request_cancel();
            Ok(())
        }
    })
    .await;

    assert_eq!(observed.load(Ordering::SeqCst), 4);
    assert_eq!(result, Err(TaskError::Cancelled));
}

#[tokio::test]
async fn test_exit_aggregation_in_spawn_order() {
    let ctx = RuntimeContext::new();
    let result: Result<(), _> = scope(&ctx, |s| async move {
        let _a = s.spawn(|_token| async { Err::<(), _>(TaskError::Cancelled) });
        let _b = s.spawn(|_token| async { Err::<(), _>(TaskError::fault("x")) });
        Ok(())
    })
    .await;

    assert_eq!(
        result,
        Err(TaskError::Many(vec![
            TaskError::Cancelled,
            TaskError::fault("x"),
        ]))
    );
}

#[tokio::test(start_paused = true)]
async fn test_drain_before_propagate() {
    let ctx = RuntimeContext::new();
    let finished = Arc::new(AtomicUsize::new(0));
    let probe = finished.clone();

    let result: Result<(), _> = scope(&ctx, |s| {
        let finished = probe;
        async move {
            for _ in 0..2 {
                let finished = finished.clone();
                s.spawn(move |_token| async move {
                    // Never polls its token, so the scope has to wait it out.
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
            }
            Err(TaskError::fault("body bailed early"))
        }
    })
    .await;

    // Both children ran to completion before the failure surfaced.
    assert_eq!(finished.load(Ordering::SeqCst), 2);
    assert_eq!(result, Err(TaskError::fault("body bailed early")));
}

#[tokio::test(start_paused = true)]
async fn test_request_layer_disconnect_cancels_scope() {
    let ctx = RuntimeContext::new();
    let root = ctx.root_token();

    // Simulated peer disconnect 20ms in.
    let disconnect = root.clone();
    ctx.clock().schedule(
        Duration::from_millis(20),
        Box::new(move || disconnect.request_cancel()),
    );

    let spawn_ctx = ctx.clone();
    let result: Result<(), _> = scope_with_parent(&ctx, &root, |s| {
        let ctx = spawn_ctx;
        async move {
            let handle = s.spawn(move |token| async move {
                sleep(&ctx, &token, Duration::from_secs(60)).await
            });
            handle.join().await.map_err(TaskError::from)
        }
    })
    .await;

    assert_eq!(result, Err(TaskError::Cancelled));
}

#[tokio::test]
async fn test_nested_scope_failure_flattens_once() {
    let ctx = RuntimeContext::new();

    // The inner scope exits with Many; the outer sweep flattens it one
    // level, never producing a nested Many.
    let result: Result<(), _> = scope(&ctx, |s| async move {
        let _outer_failure =
            s.spawn(|_token| async { Err::<(), _>(TaskError::fault("outer")) });
        s.child_scope(|inner| async move {
            let _a = inner.spawn(|_token| async { Err::<(), _>(TaskError::fault("a")) });
            let _b = inner.spawn(|_token| async { Err::<(), _>(TaskError::fault("b")) });
            Ok(())
        })
        .await
    })
    .await;

    assert_eq!(
        result,
        Err(TaskError::Many(vec![
            TaskError::fault("outer"),
            TaskError::fault("a"),
            TaskError::fault("b"),
        ]))
    );
}
