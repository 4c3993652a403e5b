//! HTTP surface of the daemon.
//!
//! Routes:
//! - `POST /tasks/build` — submit a build job
//! - `POST /tasks/run` — submit a run job
//! - `GET /tasks` — list tasks (filter by query params)
//! - `GET /tasks/{id}` — fetch one task
//! - `POST /tasks/{id}/cancel` — cancel a scheduled or processing task

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tpd_core::error::EngineError;
use tpd_core::supervisor::Engine;
use tpd_model::{
    BuildRequest, Composition, RunRequest, State as TaskLifecycle, Task, TaskFilters, TaskInput,
    TaskOutcome, TaskType, TestPlanManifest, UnpackedSources,
};

pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/tasks/build", post(submit_build))
        .route("/tasks/run", post(submit_run))
        .route("/tasks", get(list_tasks))
        .route("/tasks/{id}", get(get_task))
        .route("/tasks/{id}/cancel", post(cancel_task))
        .with_state(engine)
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Deserialize)]
struct SubmitBuildBody {
    composition: Composition,
    manifest: TestPlanManifest,
    #[serde(default)]
    sources: UnpackedSources,
    #[serde(default)]
    created_by: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmitRunBody {
    #[serde(default)]
    build_groups: Vec<usize>,
    composition: Composition,
    manifest: TestPlanManifest,
    #[serde(default)]
    sources: UnpackedSources,
    #[serde(default)]
    created_by: Option<String>,
}

#[derive(Debug, Serialize)]
struct SubmitTaskResponse {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct ListTasksQuery {
    /// Comma-separated task types, e.g. `build,run`.
    types: Option<String>,
    /// Comma-separated states, e.g. `scheduled,processing`.
    states: Option<String>,
    /// Only tasks created at or before this instant.
    before: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct TaskSummary {
    id: String,
    name: String,
    #[serde(rename = "type")]
    task_type: TaskType,
    state: TaskLifecycle,
    created: DateTime<Utc>,
    created_by: String,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<TaskOutcome>,
}

impl From<&Task> for TaskSummary {
    fn from(task: &Task) -> Self {
        let state = task.state().state;
        Self {
            id: task.id.clone(),
            name: task.name(),
            task_type: task.task_type,
            state,
            created: task.created(),
            created_by: task.created_by.clone(),
            error: task.error.clone(),
            outcome: (state == TaskLifecycle::Complete).then(|| task.outcome()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ListTasksResponse {
    tasks: Vec<TaskSummary>,
}

// ============================================================================
// Handlers
// ============================================================================

async fn submit_build(
    State(engine): State<Arc<Engine>>,
    Json(body): Json<SubmitBuildBody>,
) -> Result<impl IntoResponse, ApiError> {
    let input = TaskInput::Build(BuildRequest {
        composition: body.composition,
        manifest: body.manifest,
        sources: body.sources,
    });
    let task_id = engine.queue_task(input, body.created_by.as_deref().unwrap_or("api"))?;
    Ok(Json(SubmitTaskResponse { task_id }))
}

async fn submit_run(
    State(engine): State<Arc<Engine>>,
    Json(body): Json<SubmitRunBody>,
) -> Result<impl IntoResponse, ApiError> {
    let input = TaskInput::Run(RunRequest {
        build_groups: body.build_groups,
        composition: body.composition,
        manifest: body.manifest,
        sources: body.sources,
    });
    let task_id = engine.queue_task(input, body.created_by.as_deref().unwrap_or("api"))?;
    Ok(Json(SubmitTaskResponse { task_id }))
}

async fn list_tasks(
    State(engine): State<Arc<Engine>>,
    Query(query): Query<ListTasksQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filters = TaskFilters {
        types: query.types.as_deref().map(parse_types).transpose()?.unwrap_or_default(),
        states: query
            .states
            .as_deref()
            .map(parse_states)
            .transpose()?
            .unwrap_or_default(),
        before: query.before,
    };

    let tasks = engine.tasks(&filters);
    let response = ListTasksResponse {
        tasks: tasks.iter().map(TaskSummary::from).collect(),
    };
    Ok(Json(response))
}

async fn get_task(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let task = engine.get_task(&id)?;
    Ok(Json(TaskSummary::from(&task)))
}

async fn cancel_task(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if id.trim().is_empty() {
        return Err(ApiError::InvalidRequest("task id cannot be empty".into()));
    }
    engine.kill(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Parses a comma-separated list of task types.
fn parse_types(s: &str) -> Result<Vec<TaskType>, ApiError> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match part.to_lowercase().as_str() {
            "build" => Ok(TaskType::Build),
            "run" => Ok(TaskType::Run),
            other => Err(ApiError::InvalidRequest(format!(
                "invalid type: '{other}' (valid: build, run)"
            ))),
        })
        .collect()
}

/// Parses a comma-separated list of task states.
fn parse_states(s: &str) -> Result<Vec<TaskLifecycle>, ApiError> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match part.to_lowercase().as_str() {
            "scheduled" => Ok(TaskLifecycle::Scheduled),
            "processing" => Ok(TaskLifecycle::Processing),
            "complete" => Ok(TaskLifecycle::Complete),
            "canceled" => Ok(TaskLifecycle::Canceled),
            other => Err(ApiError::InvalidRequest(format!(
                "invalid state: '{other}' (valid: scheduled, processing, complete, canceled)"
            ))),
        })
        .collect()
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    InvalidRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::TaskNotFound(id) => ApiError::NotFound(format!("task not found: {id}")),
            EngineError::Composition(_) | EngineError::Config(_) => {
                ApiError::InvalidRequest(e.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
