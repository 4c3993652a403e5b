use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde_json::Value;
use tracing::{debug, warn};

use tpd_model::{State, Task, TaskFilters};

use crate::error::{EngineError, EngineResult};

/// Durable mapping of task id to task record.
///
/// Records are held in memory and written through to one JSON file per task
/// under the store directory, so a restarted daemon can reload them. Every
/// mutation rewrites the record via a temp file and rename, keeping each
/// record intact across a crash mid-write.
pub struct TaskStore {
    dir: PathBuf,
    tasks: Mutex<HashMap<String, Task>>,
}

impl TaskStore {
    /// Opens the store rooted at `dir`, loading any persisted records.
    /// Unreadable record files are skipped with a warning.
    pub fn open(dir: PathBuf) -> EngineResult<Self> {
        std::fs::create_dir_all(&dir)?;

        let mut tasks = HashMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|raw| serde_json::from_str::<Task>(&raw).map_err(|e| e.to_string()))
            {
                Ok(task) => {
                    tasks.insert(task.id.clone(), task);
                }
                Err(e) => warn!(path = %path.display(), err = %e, "skipping unreadable task record"),
            }
        }
        debug!(count = tasks.len(), dir = %dir.display(), "task store opened");

        Ok(Self {
            dir,
            tasks: Mutex::new(tasks),
        })
    }

    /// Persists a new task with its initial `Scheduled` state and returns
    /// its id.
    pub fn create(&self, task: Task) -> EngineResult<String> {
        let id = task.id.clone();
        let mut tasks = self.lock();
        if tasks.contains_key(&id) {
            return Err(EngineError::Store(format!("task {id} already exists")));
        }
        self.persist(&task)?;
        tasks.insert(id.clone(), task);
        Ok(id)
    }

    /// Atomically appends a state transition. Transitions out of a terminal
    /// state are rejected.
    pub fn append_task_state(&self, id: &str, state: State) -> EngineResult<()> {
        let mut tasks = self.lock();
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| EngineError::TaskNotFound(id.to_string()))?;
        task.append_state(state)
            .map_err(|e| EngineError::Store(e.to_string()))?;
        self.persist(task)
    }

    /// Records the result of a finished task and appends the `Complete`
    /// state. An error of `None` leaves the error field empty.
    pub fn mark_completed(
        &self,
        id: &str,
        error: Option<String>,
        result: Value,
    ) -> EngineResult<()> {
        let mut tasks = self.lock();
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| EngineError::TaskNotFound(id.to_string()))?;
        task.error = error.unwrap_or_default();
        task.result = result;
        task.append_state(State::Complete)
            .map_err(|e| EngineError::Store(e.to_string()))?;
        self.persist(task)
    }

    /// Cancels a task that has not started processing yet.
    pub fn cancel(&self, id: &str) -> EngineResult<()> {
        let mut tasks = self.lock();
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| EngineError::TaskNotFound(id.to_string()))?;
        if task.state().state != State::Scheduled {
            return Err(EngineError::Store(format!(
                "task {id} is not scheduled; cannot cancel directly"
            )));
        }
        task.append_state(State::Canceled)
            .map_err(|e| EngineError::Store(e.to_string()))?;
        self.persist(task)
    }

    /// Read-only fetch of a task record.
    pub fn get(&self, id: &str) -> EngineResult<Task> {
        self.lock()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::TaskNotFound(id.to_string()))
    }

    /// Lists tasks matching the filters, ordered by creation time.
    pub fn list(&self, filters: &TaskFilters) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .lock()
            .values()
            .filter(|t| t.matches(filters))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created());
        tasks
    }

    /// Reconciles records left over from a previous daemon run.
    ///
    /// Tasks found in `Processing` were interrupted mid-execution and are
    /// marked failed. `Scheduled` tasks are returned, oldest first, for the
    /// caller to re-enqueue.
    pub fn recover(&self) -> EngineResult<Vec<String>> {
        let mut requeue = Vec::new();
        let mut tasks = self.lock();

        let mut records: Vec<&mut Task> = tasks.values_mut().collect();
        records.sort_by_key(|t| t.created());

        for task in records {
            match task.state().state {
                State::Processing => {
                    warn!(task_id = %task.id, "marking task interrupted by daemon restart as failed");
                    task.error = "task interrupted by daemon restart".to_string();
                    task.append_state(State::Complete)
                        .map_err(|e| EngineError::Store(e.to_string()))?;
                    self.persist(task)?;
                }
                State::Scheduled => requeue.push(task.id.clone()),
                _ => {}
            }
        }
        Ok(requeue)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Task>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, task: &Task) -> EngineResult<()> {
        let raw = serde_json::to_vec_pretty(task)
            .map_err(|e| EngineError::Store(format!("could not encode task {}: {e}", task.id)))?;
        let path = self.dir.join(format!("{}.json", task.id));
        let tmp = self.dir.join(format!("{}.json.tmp", task.id));
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}
