//! Isolation for short-lived extraction operations.
//!
//! Thumbnail sampling and duration probing get a private handle over a byte
//! copy of the source. The copy is a separate content object, so revoking its
//! handle cannot invalidate a display handle on hosts that revoke every handle
//! derived from one object together. The copy is never indexed for reuse.

use bytes::Bytes;
use medialease_core::{ContentSource, MediaError, Result, SharedSource};
use medialease_handles::{HandleTable, HandleUri};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// What a temporary operation receives: its private handle and the detached copy.
#[derive(Debug, Clone)]
pub struct IsolatedHandle {
    pub handle: HandleUri,
    pub source: SharedSource,
}

/// How an isolated operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Finished,
    TimedOut,
}

/// Reaches exactly one terminal revoke, whether the operation finishes,
/// times out, or the future is dropped.
struct CleanupGuard {
    table: HandleTable,
    handle: HandleUri,
    grace: Duration,
    pending: bool,
}

impl CleanupGuard {
    fn run(&mut self, outcome: Outcome) {
        if !self.pending {
            return;
        }
        self.pending = false;
        match outcome {
            Outcome::Finished => self.table.release_after(&self.handle, self.grace),
            Outcome::TimedOut => {
                if let Err(e) = self.table.force_revoke(&self.handle) {
                    warn!(handle = %self.handle, error = %e, "Isolated cleanup failed");
                }
            }
        }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        self.run(Outcome::Finished);
    }
}

/// Runs transient consumers against an isolated copy of their source.
#[derive(Clone)]
pub struct TemporaryOperationIsolator {
    table: HandleTable,
    timeout: Duration,
    grace: Duration,
}

impl TemporaryOperationIsolator {
    pub fn new(table: HandleTable, timeout: Duration, grace: Duration) -> Self {
        Self {
            table,
            timeout,
            grace,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `op` with a private handle over a copy of `source`.
    ///
    /// The timeout covers the byte copy as well as `op`. On completion
    /// (success or error) the handle is released and revoked after the
    /// isolation grace delay. On timeout the operation is dropped, its handle
    /// (if one was created yet) is revoked immediately, and
    /// `OperationTimedOut` is returned.
    pub async fn run<T, F, Fut>(&self, source: &SharedSource, purpose: &str, op: F) -> Result<T>
    where
        F: FnOnce(IsolatedHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut guard: Option<CleanupGuard> = None;
        let timed = tokio::time::timeout(self.timeout, async {
            let copy = detached_copy(source).await?;
            let handle = self.table.acquire_isolated(&copy, purpose)?;
            guard = Some(CleanupGuard {
                table: self.table.clone(),
                handle: handle.clone(),
                grace: self.grace,
                pending: true,
            });
            debug!(handle = %handle, purpose, "Started isolated operation");

            let isolated = IsolatedHandle {
                handle,
                source: copy,
            };
            op(isolated).await
        })
        .await;

        match timed {
            Ok(result) => {
                if let Some(guard) = guard.as_mut() {
                    guard.run(Outcome::Finished);
                }
                result
            }
            Err(_) => {
                if let Some(guard) = guard.as_mut() {
                    guard.run(Outcome::TimedOut);
                }
                warn!(purpose, timeout_ms = self.timeout.as_millis() as u64, "Isolated operation timed out");
                Err(MediaError::OperationTimedOut {
                    purpose: purpose.to_string(),
                    after_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }
}

/// Copy the payload into a new, independent content object.
async fn detached_copy(source: &ContentSource) -> Result<SharedSource> {
    let bytes = source.read_all().await?;
    let copy = Bytes::copy_from_slice(&bytes);
    Ok(ContentSource::from_bytes(
        source.display_name(),
        copy,
        source.unstable_mtime(),
    )
    .shared())
}
