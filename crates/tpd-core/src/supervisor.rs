//! The worker pool driving task execution.
//!
//! A fixed set of workers pops task ids from the shared queue. Each task
//! gets its own cancellation scope wired to two triggers: an external kill
//! delivered through the signal map, and the per-task deadline. The worker
//! persists the `Processing` transition before dispatching to a planner and
//! always records a terminal state afterwards.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use tpd_config::EnvConfig;
use tpd_model::{State, Task, TaskFilters, TaskInput};

use crate::error::{EngineError, EngineResult};
use crate::notify::Notifier;
use crate::output::OutputWriter;
use crate::registry::PluginRegistry;
use crate::task::{TaskQueue, TaskStore};

/// The task supervisor: registries, durable task state and the worker pool.
pub struct Engine {
    env: EnvConfig,
    registry: PluginRegistry,
    store: Arc<TaskStore>,
    queue: Arc<TaskQueue>,
    signals: Mutex<HashMap<String, mpsc::Sender<()>>>,
    notifier: Notifier,
}

impl Engine {
    /// Creates an engine rooted at the env config's directories. Opens the
    /// store and queue, creating their files as needed.
    pub fn new(env: EnvConfig, registry: PluginRegistry) -> EngineResult<Arc<Self>> {
        let store = Arc::new(TaskStore::open(env.tasks_dir())?);
        let queue = Arc::new(TaskQueue::open(env.queue_path())?);
        std::fs::create_dir_all(env.daemon_dir())?;
        let notifier = Notifier::new(env.daemon.webhook_url.clone())?;

        Ok(Arc::new(Self {
            env,
            registry,
            store,
            queue,
            signals: Mutex::new(HashMap::new()),
            notifier,
        }))
    }

    pub fn env(&self) -> &EnvConfig {
        &self.env
    }

    pub(crate) fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// Reconciles leftover state from a previous run: interrupted tasks are
    /// failed by the store, still-scheduled ones are re-enqueued unless the
    /// restored queue snapshot already holds them. Returns the number of
    /// scheduled tasks found.
    pub fn recover(&self) -> EngineResult<usize> {
        let requeue = self.store.recover()?;
        let count = requeue.len();
        for id in requeue {
            if !self.queue.contains(&id) {
                self.queue.push(id)?;
            }
        }
        Ok(count)
    }

    /// Spawns the configured number of supervisor workers onto the current
    /// runtime. Workers run until the process exits.
    pub fn start(self: &Arc<Self>) {
        for n in 0..self.env.daemon.workers.max(1) {
            let engine = Arc::clone(self);
            tokio::spawn(engine.worker(n));
        }
    }

    /// Persists a new task and enqueues it for execution, returning its id.
    pub fn queue_task(&self, input: TaskInput, created_by: &str) -> EngineResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let task = Task::new(&id, input, created_by);
        self.store.create(task)?;
        self.queue.push(&id)?;
        debug!(task_id = %id, "task enqueued");
        Ok(id)
    }

    /// Cancels a task. A processing task is signalled through its
    /// cancellation channel; a still-scheduled one is canceled directly in
    /// the store and skipped when a worker eventually pops it.
    pub fn kill(&self, task_id: &str) -> EngineResult<()> {
        let sender = {
            let signals = self.lock_signals();
            signals.get(task_id).cloned()
        };
        if let Some(tx) = sender {
            let _ = tx.try_send(());
            info!(task_id, "kill signal delivered");
            return Ok(());
        }
        self.store.cancel(task_id)
    }

    /// Lists tasks matching the filters, ordered by creation time.
    pub fn tasks(&self, filters: &TaskFilters) -> Vec<Task> {
        self.store.list(filters)
    }

    pub fn get_task(&self, task_id: &str) -> EngineResult<Task> {
        self.store.get(task_id)
    }

    fn add_signal(&self, task_id: &str, tx: mpsc::Sender<()>) {
        self.lock_signals().insert(task_id.to_string(), tx);
    }

    fn delete_signal(&self, task_id: &str) {
        self.lock_signals().remove(task_id);
    }

    fn lock_signals(&self) -> std::sync::MutexGuard<'_, HashMap<String, mpsc::Sender<()>>> {
        self.signals
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn worker(self: Arc<Self>, n: usize) {
        info!(worker_id = n, "supervisor worker started");
        loop {
            let task_id = self.queue.pop().await;
            self.process(n, &task_id).await;
        }
    }

    async fn process(self: &Arc<Self>, worker_id: usize, task_id: &str) {
        let task = match self.store.get(task_id) {
            Ok(task) => task,
            Err(e) => {
                error!(task_id, err = %e, "could not load popped task");
                return;
            }
        };
        // A task canceled while still queued keeps its id in the queue;
        // drop it here instead of reviving it.
        if task.state().state.is_terminal() {
            debug!(task_id, "skipping task already in terminal state");
            return;
        }

        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel::<()>(1);
        self.add_signal(task_id, tx);

        // Watcher: bridges an external kill into the cancellation scope,
        // then deregisters the channel. Exits quietly once the task is done.
        {
            let engine = Arc::clone(self);
            let cancel = cancel.clone();
            let id = task_id.to_string();
            tokio::spawn(async move {
                tokio::select! {
                    _ = rx.recv() => {
                        engine.delete_signal(&id);
                        cancel.cancel();
                    }
                    _ = cancel.cancelled() => {}
                }
            });
        }

        // Deadline timer. Expiry cancels the same token a kill would, so
        // the two are indistinguishable from the task's perspective.
        {
            let cancel = cancel.clone();
            let timeout = self.env.task_timeout();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => cancel.cancel(),
                    _ = cancel.cancelled() => {}
                }
            });
        }

        if let Err(e) = self.store.append_task_state(task_id, State::Processing) {
            error!(task_id, err = %e, "could not update task status");
        }
        info!(worker_id, task_id, "worker processing task");

        let result = match OutputWriter::create(&self.env.daemon_dir(), task_id) {
            Ok(ow) => {
                let ow = Arc::new(ow);
                match &task.input {
                    TaskInput::Build(req) => {
                        self.do_build(&cancel, req, &ow).await.and_then(|outputs| {
                            serde_json::to_value(&outputs)
                                .map_err(|e| EngineError::Internal(e.to_string()))
                        })
                    }
                    TaskInput::Run(req) => self
                        .do_run(&cancel, task_id, req, &ow)
                        .await
                        .and_then(|report| {
                            serde_json::to_value(&report)
                                .map_err(|e| EngineError::Internal(e.to_string()))
                        }),
                }
            }
            Err(e) => {
                error!(task_id, err = %e, "could not create task output sink");
                Err(e)
            }
        };

        let (err, data) = match result {
            Ok(data) => (None, data),
            Err(e) => {
                if e.is_canceled() {
                    info!(task_id, "task canceled");
                }
                (Some(e.to_string()), Value::Null)
            }
        };
        if let Err(e) = self.store.mark_completed(task_id, err, data) {
            error!(task_id, err = %e, "could not update task status");
        }

        self.notifier.task_completed(task_id).await;

        self.delete_signal(task_id);
        cancel.cancel();
        info!(worker_id, task_id, "worker completed task");
    }
}
