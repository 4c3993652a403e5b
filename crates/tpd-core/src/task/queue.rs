use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::{error, warn};

use crate::error::{EngineError, EngineResult};

/// Persistent FIFO of task ids.
///
/// `pop` waits until an id is available instead of polling. The queue is
/// snapshotted to disk on every mutation so a restarted daemon resumes with
/// the same backlog.
pub struct TaskQueue {
    path: PathBuf,
    inner: Mutex<VecDeque<String>>,
    notify: Notify,
}

impl TaskQueue {
    /// Opens the queue, restoring the snapshot at `path` when present.
    pub fn open(path: PathBuf) -> EngineResult<Self> {
        let inner = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str::<VecDeque<String>>(&raw)
                .map_err(|e| EngineError::Queue(format!("could not decode queue snapshot: {e}")))?
        } else {
            VecDeque::new()
        };

        Ok(Self {
            path,
            inner: Mutex::new(inner),
            notify: Notify::new(),
        })
    }

    /// Appends a task id and wakes one waiting consumer.
    pub fn push(&self, id: impl Into<String>) -> EngineResult<()> {
        {
            let mut queue = self.lock();
            queue.push_back(id.into());
            self.persist(&queue)?;
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Removes and returns the head of the queue, waiting while it is
    /// empty. Concurrent pushes never go unobserved: the waiter registers
    /// before re-checking the queue.
    pub async fn pop(&self) -> String {
        loop {
            let notified = self.notify.notified();
            if let Some(id) = self.try_pop() {
                return id;
            }
            notified.await;
        }
    }

    /// Non-blocking variant of [`TaskQueue::pop`].
    pub fn try_pop(&self) -> Option<String> {
        let mut queue = self.lock();
        let id = queue.pop_front()?;
        if let Err(e) = self.persist(&queue) {
            // The pop itself stands; losing the snapshot only costs
            // re-enqueueing on an unlucky restart.
            error!(err = %e, "could not persist queue snapshot");
        }
        Some(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().iter().any(|queued| queued == id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<String>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, queue: &VecDeque<String>) -> EngineResult<()> {
        let raw = serde_json::to_vec(queue)
            .map_err(|e| EngineError::Queue(format!("could not encode queue snapshot: {e}")))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            warn!(err = %e, "could not replace queue snapshot");
            EngineError::from(e)
        })
    }
}
