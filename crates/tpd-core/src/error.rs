use thiserror::Error;

use tpd_config::ConfigError;
use tpd_model::ModelError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid composition: {0}")]
    Composition(#[from] ModelError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("unrecognized builder: {0}")]
    UnknownBuilder(String),

    #[error("unrecognized runner: {0}")]
    UnknownRunner(String),

    #[error("{0}")]
    HealthcheckFailed(String),

    #[error("builder {builder} failed: {reason}")]
    BuilderFailed { builder: String, reason: String },

    #[error("runner {runner} failed: {reason}")]
    RunnerFailed { runner: String, reason: String },

    #[error("task canceled")]
    Canceled,

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e.to_string())
    }
}

impl EngineError {
    /// True when the error represents cooperative cancellation, either from
    /// an external kill or the per-task deadline.
    pub fn is_canceled(&self) -> bool {
        matches!(self, EngineError::Canceled)
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
