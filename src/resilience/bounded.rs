//! Bounded Blocking Call
//! The single bridge from async work to a synchronous caller.
//!
//! Contract:
//! - the future runs on the given runtime handle, never on the caller's thread;
//! - the caller is released after at most `timeout`, whatever the future does;
//! - on timeout the spawned future is aborted (dropped at its next await);
//! - on a multi-threaded runtime worker the wait goes through
//!   `block_in_place` so the worker pool is not starved.
//!
//! Blocking the thread of a current-thread runtime that also drives `handle`
//! cannot make progress; such a call resolves with `TimedOut`.

use std::future::Future;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::{Handle, RuntimeFlavor};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoundedCallError {
    #[error("call did not complete within {0:?}")]
    TimedOut(Duration),

    #[error("call was cancelled before producing a result")]
    Cancelled,
}

/// Run `future` on `handle` and block the current thread for at most `timeout`
pub fn block_on_bounded<F>(
    handle: &Handle,
    timeout: Duration,
    future: F,
) -> Result<F::Output, BoundedCallError>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);

    let task = handle.spawn(async move {
        let output = future.await;
        // Receiver may already have given up
        let _ = tx.send(output);
    });

    let wait = || rx.recv_timeout(timeout);
    let received = match Handle::try_current().map(|h| h.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(wait),
        _ => wait(),
    };

    match received {
        Ok(output) => Ok(output),
        Err(RecvTimeoutError::Timeout) => {
            task.abort();
            tracing::debug!(timeout_ms = timeout.as_millis() as u64, "Bounded call timed out");
            Err(BoundedCallError::TimedOut(timeout))
        }
        Err(RecvTimeoutError::Disconnected) => Err(BoundedCallError::Cancelled),
    }
}
