//! Persisted unit of work passing through the scheduler: a build or run
//! request, its append-only state history, and the result recorded on
//! completion.

mod outcome;

pub use outcome::{Outcome, RunResult, TaskOutcome};

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::composition::Composition;
use crate::error::{ModelError, ModelResult};
use crate::manifest::TestPlanManifest;

/// Kind of work a task represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Build,
    Run,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskType::Build => f.write_str("build"),
            TaskType::Run => f.write_str("run"),
        }
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    Scheduled,
    Processing,
    Complete,
    Canceled,
}

impl State {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Complete | State::Canceled)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Scheduled => f.write_str("scheduled"),
            State::Processing => f.write_str("processing"),
            State::Complete => f.write_str("complete"),
            State::Canceled => f.write_str("canceled"),
        }
    }
}

/// A single entry in a task's state history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TaskState {
    pub state: State,
    pub created: DateTime<Utc>,
}

impl TaskState {
    pub fn now(state: State) -> Self {
        Self {
            state,
            created: Utc::now(),
        }
    }
}

/// Filesystem locations of the unpacked job sources, produced by the upload
/// layer before the task is enqueued.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UnpackedSources {
    /// Root of the unpacked tree.
    pub base_dir: PathBuf,

    /// Plan sources, under `base_dir`.
    pub plan_dir: PathBuf,

    /// Optional SDK sources, under `base_dir`.
    pub sdk_dir: Option<PathBuf>,

    /// Optional extra sources, under `base_dir`.
    pub extra_dir: Option<PathBuf>,
}

/// Payload of a build task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRequest {
    pub composition: Composition,
    pub manifest: TestPlanManifest,
    #[serde(default)]
    pub sources: UnpackedSources,
}

/// Payload of a run task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    /// Indices of the groups to build before the run. Empty means every
    /// group already names an artifact.
    #[serde(default)]
    pub build_groups: Vec<usize>,
    pub composition: Composition,
    pub manifest: TestPlanManifest,
    #[serde(default)]
    pub sources: UnpackedSources,
}

/// The typed input payload of a task. Decoding a submission into this enum
/// is what fixes the task type; there is no unknown variant to schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskInput {
    Build(BuildRequest),
    Run(RunRequest),
}

impl TaskInput {
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskInput::Build(_) => TaskType::Build,
            TaskInput::Run(_) => TaskType::Run,
        }
    }

    pub fn composition(&self) -> &Composition {
        match self {
            TaskInput::Build(req) => &req.composition,
            TaskInput::Run(req) => &req.composition,
        }
    }
}

/// A persisted task record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,

    #[serde(rename = "type")]
    pub task_type: TaskType,

    pub input: TaskInput,

    /// Stringified origin of the submission (user, API client, ...).
    pub created_by: String,

    /// Error string recorded on completion; empty on success.
    #[serde(default)]
    pub error: String,

    /// Result data recorded on completion.
    #[serde(default)]
    pub result: Value,

    /// Append-only state history. Never empty; the first entry is always
    /// `Scheduled`.
    states: Vec<TaskState>,
}

impl Task {
    /// Creates a task in the `Scheduled` state.
    pub fn new(id: impl Into<String>, input: TaskInput, created_by: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task_type: input.task_type(),
            input,
            created_by: created_by.into(),
            error: String::new(),
            result: Value::Null,
            states: vec![TaskState::now(State::Scheduled)],
        }
    }

    /// Current state: the last entry of the history.
    pub fn state(&self) -> &TaskState {
        self.states
            .last()
            .expect("task state history is never empty")
    }

    /// Creation time: the timestamp of the initial `Scheduled` entry.
    pub fn created(&self) -> DateTime<Utc> {
        self.states
            .first()
            .expect("task state history is never empty")
            .created
    }

    /// Full state history, oldest first.
    pub fn states(&self) -> &[TaskState] {
        &self.states
    }

    /// Human name of the task, derived from the composition.
    pub fn name(&self) -> String {
        let global = &self.input.composition().global;
        match self.task_type {
            TaskType::Build => global.plan.clone(),
            TaskType::Run => format!("{}:{}", global.plan, global.case),
        }
    }

    /// Wall time between entering `Processing` and reaching a terminal
    /// state. `None` while the task has not finished.
    pub fn took(&self) -> Option<chrono::Duration> {
        let processing = self
            .states
            .iter()
            .find(|s| s.state == State::Processing)?;
        let terminal = self.states.iter().find(|s| s.state.is_terminal())?;
        Some(terminal.created - processing.created)
    }

    /// Appends a state transition. Transitions out of a terminal state are
    /// rejected.
    pub fn append_state(&mut self, state: State) -> ModelResult<()> {
        let current = self.state().state;
        if current.is_terminal() {
            return Err(ModelError::TerminalState(current.to_string()));
        }
        self.states.push(TaskState::now(state));
        Ok(())
    }

    /// True iff this task passes the given filters.
    pub fn matches(&self, filters: &TaskFilters) -> bool {
        if !filters.types.is_empty() && !filters.types.contains(&self.task_type) {
            return false;
        }
        if !filters.states.is_empty() && !filters.states.contains(&self.state().state) {
            return false;
        }
        if let Some(before) = filters.before {
            if self.created() > before {
                return false;
            }
        }
        true
    }
}

/// Selection criteria for task listings. Empty sets match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskFilters {
    pub types: Vec<TaskType>,
    pub states: Vec<State>,

    /// Creation-time cutoff: only tasks created at or before this instant
    /// are returned.
    pub before: Option<DateTime<Utc>>,
}
