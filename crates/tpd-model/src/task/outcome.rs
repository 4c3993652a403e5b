use std::fmt;

use serde::{Deserialize, Serialize};

use crate::task::{Task, TaskType};

/// Final verdict of a completed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
    Canceled,
    Unknown,
}

impl Default for Outcome {
    fn default() -> Self {
        Outcome::Unknown
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => f.write_str("success"),
            Outcome::Failure => f.write_str("failure"),
            Outcome::Canceled => f.write_str("canceled"),
            Outcome::Unknown => f.write_str("unknown"),
        }
    }
}

/// Structured result reported by a runner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunResult {
    pub outcome: Outcome,

    /// Free-form detail, e.g. a summary of failed instances.
    pub message: String,
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "outcome: {}", self.outcome)
        } else {
            write!(f, "outcome: {}; {}", self.outcome, self.message)
        }
    }
}

/// Decoded outcome of a completed task, as shown in listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub outcome: Outcome,
    pub content: String,
}

// Shape of the run report stored in `Task::result`, reduced to the part the
// outcome decoder cares about.
#[derive(Deserialize)]
struct ResultProbe {
    #[serde(default)]
    result: Option<RunResult>,
}

impl Task {
    /// Decodes the outcome of this task from its record.
    ///
    /// Build tasks succeed iff no error was recorded; the content summarises
    /// the produced artifacts. Run tasks carry a structured result from the
    /// runner, which is decoded here; an undecodable result reads as a
    /// failure.
    pub fn outcome(&self) -> TaskOutcome {
        match self.task_type {
            TaskType::Build => {
                if self.error.is_empty() {
                    TaskOutcome {
                        outcome: Outcome::Success,
                        content: format!("artifacts: {}", self.result),
                    }
                } else {
                    TaskOutcome {
                        outcome: Outcome::Failure,
                        content: String::new(),
                    }
                }
            }
            TaskType::Run => {
                match serde_json::from_value::<ResultProbe>(self.result.clone()) {
                    Ok(ResultProbe {
                        result: Some(result),
                    }) => TaskOutcome {
                        outcome: result.outcome,
                        content: result.to_string(),
                    },
                    _ => TaskOutcome {
                        outcome: Outcome::Failure,
                        content: String::new(),
                    },
                }
            }
        }
    }
}
