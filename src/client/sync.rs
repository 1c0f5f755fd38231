//! Background sync: work queued while offline, replayed when the runtime
//! fires a sync event for its tag.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::cache::mutex_lock;

const SOURCE: &str = "client.sync";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no handler registered for sync tag `{0}`")]
    UnknownTag(String),
    #[error("sync task failed: {message}")]
    Task { message: String },
}

impl SyncError {
    pub fn task(message: impl Into<String>) -> Self {
        Self::Task {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncTask {
    pub tag: String,
    #[serde(with = "time::serde::rfc3339")]
    pub enqueued_at: OffsetDateTime,
    pub payload: Value,
}

#[async_trait]
pub trait SyncHandler: Send + Sync {
    async fn run(&self, task: &SyncTask) -> Result<(), SyncError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed { ran: usize },
    /// Another firing for the same tag is still running.
    AlreadyRunning,
    /// No handler for this tag.
    Ignored,
}

struct TagQueue {
    handler: Arc<dyn SyncHandler>,
    queue: VecDeque<SyncTask>,
    running: bool,
}

/// Per-tag queues with single-flight execution.
#[derive(Default)]
pub struct SyncCoordinator {
    tags: Mutex<HashMap<String, TagQueue>>,
}

impl SyncCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tag: impl Into<String>, handler: Arc<dyn SyncHandler>) {
        mutex_lock(&self.tags, SOURCE, "register").insert(
            tag.into(),
            TagQueue {
                handler,
                queue: VecDeque::new(),
                running: false,
            },
        );
    }

    pub fn enqueue(&self, tag: &str, payload: Value) -> Result<SyncTask, SyncError> {
        let mut tags = mutex_lock(&self.tags, SOURCE, "enqueue");
        let entry = tags
            .get_mut(tag)
            .ok_or_else(|| SyncError::UnknownTag(tag.to_string()))?;
        let task = SyncTask {
            tag: tag.to_string(),
            enqueued_at: OffsetDateTime::now_utc(),
            payload,
        };
        entry.queue.push_back(task.clone());
        Ok(task)
    }

    pub fn pending(&self, tag: &str) -> usize {
        mutex_lock(&self.tags, SOURCE, "pending")
            .get(tag)
            .map_or(0, |entry| entry.queue.len())
    }

    /// Run the tasks queued for `tag`, each at most once for this firing.
    ///
    /// A task leaves the queue only after its handler succeeds, so a failed
    /// or cancelled firing keeps it and everything behind it. Failures are
    /// returned so the runtime retries with backoff.
    pub async fn on_sync(&self, tag: &str) -> Result<SyncOutcome, SyncError> {
        let (handler, budget) = {
            let mut tags = mutex_lock(&self.tags, SOURCE, "on_sync");
            let Some(entry) = tags.get_mut(tag) else {
                debug!(tag, "Ignoring sync event for unregistered tag");
                return Ok(SyncOutcome::Ignored);
            };
            if entry.running {
                debug!(tag, "Sync already running");
                return Ok(SyncOutcome::AlreadyRunning);
            }
            entry.running = true;
            (entry.handler.clone(), entry.queue.len())
        };

        let _running = RunningGuard { coordinator: self, tag };
        let mut ran = 0;
        while ran < budget {
            let Some(task) = self.front(tag) else {
                break;
            };
            if let Err(err) = handler.run(&task).await {
                warn!(tag, ran, error = %err, "Sync task failed; left queued");
                return Err(err);
            }
            self.complete(tag);
            ran += 1;
        }

        info!(tag, ran, "Sync completed");
        Ok(SyncOutcome::Completed { ran })
    }

    fn front(&self, tag: &str) -> Option<SyncTask> {
        mutex_lock(&self.tags, SOURCE, "front")
            .get(tag)
            .and_then(|entry| entry.queue.front().cloned())
    }

    fn complete(&self, tag: &str) {
        if let Some(entry) = mutex_lock(&self.tags, SOURCE, "complete").get_mut(tag) {
            entry.queue.pop_front();
        }
    }
}

// Clears the running flag even if the handler future is dropped mid-run.
struct RunningGuard<'a> {
    coordinator: &'a SyncCoordinator,
    tag: &'a str,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        if let Some(entry) = mutex_lock(&self.coordinator.tags, SOURCE, "release").get_mut(self.tag)
        {
            entry.running = false;
        }
    }
}
