//! Detached background work.
//!
//! Cache writes run after the response has been handed back. Production
//! callers can only spawn; failures are logged and counted, never surfaced.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use metrics::counter;
use tokio::sync::Notify;
use tracing::{Instrument, debug, warn};

use crate::error::BoxError;

#[derive(Default)]
struct Inner {
    pending: AtomicUsize,
    idle: Notify,
}

/// Spawner for fire-and-forget tasks.
#[derive(Clone, Default)]
pub struct DeferredTasks {
    inner: Arc<Inner>,
}

impl DeferredTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` in the background. The caller never waits on it.
    pub fn spawn<F, E>(&self, op: &'static str, task: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        let inner = self.inner.clone();
        inner.pending.fetch_add(1, Ordering::SeqCst);

        let span = tracing::debug_span!("deferred", op);
        tokio::spawn(
            async move {
                let guard = PendingGuard(inner);
                match task.await {
                    Ok(()) => debug!(op, "deferred task completed"),
                    Err(err) => {
                        let err: BoxError = err.into();
                        counter!("tiercache_deferred_failed_total", "op" => op).increment(1);
                        warn!(op, error = %err, "deferred task failed");
                    }
                }
                drop(guard);
            }
            .instrument(span),
        );
    }

    /// Number of spawned tasks that have not finished yet.
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Wait until every task spawned so far has finished.
    #[cfg(test)]
    pub(crate) async fn settle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

// Decrements on drop so a panicking task does not leave `pending` stuck.
struct PendingGuard(Arc<Inner>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.0.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}
