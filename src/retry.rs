//! Retry Manager - Backoff for store connectivity recovery
//!
//! Hands out the delay to wait after each consecutive failure. The agent
//! runs with a fixed single-step schedule; longer schedules keep the last
//! step once exhausted.

use crate::schedule::Clock;
use anyhow::Result;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::warn;

/// Manages retry attempts against a backoff schedule
#[derive(Debug)]
pub struct RetryManager {
    backoff_schedule: Vec<Duration>,
    current_attempt: AtomicUsize,
}

impl RetryManager {
    /// Retry with the same delay every time
    pub fn fixed(delay: Duration) -> Self {
        Self::with_schedule(vec![delay])
    }

    /// Create with custom backoff schedule
    pub fn with_schedule(schedule: Vec<Duration>) -> Self {
        assert!(!schedule.is_empty(), "backoff schedule must not be empty");
        Self {
            backoff_schedule: schedule,
            current_attempt: AtomicUsize::new(0),
        }
    }

    /// Get the next delay duration based on current attempt
    pub fn next_delay(&self) -> Duration {
        let attempt = self.current_attempt.fetch_add(1, Ordering::Relaxed);
        let index = attempt.min(self.backoff_schedule.len() - 1);
        self.backoff_schedule[index]
    }

    /// Reset the retry counter (call on successful round trip)
    pub fn reset(&self) {
        self.current_attempt.store(0, Ordering::Relaxed);
    }
}

/// Run a store operation until it stops failing on connectivity.
///
/// Connectivity errors are logged and retried after the next backoff delay.
/// Any other error is returned as is.
pub async fn with_store_retry<T, F, Fut, C>(
    what: &str,
    retry: &RetryManager,
    clock: &C,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    C: Clock,
{
    loop {
        match op().await {
            Ok(value) => {
                retry.reset();
                return Ok(value);
            }
            Err(e) if is_connectivity_error(&e) => {
                let delay = retry.next_delay();
                warn!("{} failed, store unreachable ({:#}). Retrying in {:?}...", what, e, delay);
                clock.sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Check if an error means the store could not be reached
///
/// Looks for a sqlx transport error anywhere in the chain first, then falls
/// back to matching the rendered message.
pub fn is_connectivity_error(error: &anyhow::Error) -> bool {
    for cause in error.chain() {
        if let Some(sqlx_err) = cause.downcast_ref::<sqlx::Error>() {
            return matches!(
                sqlx_err,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            );
        }
    }
    is_connection_error(&format!("{:#}", error))
}

/// Check if an error message indicates a connection error
pub fn is_connection_error(error: &str) -> bool {
    let error_lower = error.to_lowercase();

    // Connection-related patterns
    let patterns = [
        "connection refused",
        "connection reset",
        "connection closed",
        "connection timed out",
        "timeout",
        "timed out",
        "network",
        "broken pipe",
        "no route to host",
        "host unreachable",
        "connection aborted",
        "socket",
        "eof",
        "end of file",
        "i/o error",
        "io error",
        "failed to connect",
        "unable to connect",
        "could not connect",
        "dns",
        "tls",
        "handshake",
    ];

    patterns.iter().any(|p| error_lower.contains(p))
}
