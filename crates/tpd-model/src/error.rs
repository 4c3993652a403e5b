use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("composition has no groups")]
    NoGroups,

    #[error("group ids not unique; found duplicate: {0}")]
    DuplicateGroupId(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("group {group}: exactly one of count or percentage must be set")]
    InvalidInstances { group: String },

    #[error("sum of calculated instances per group doesn't match total; total={total}, calculated={calculated}")]
    InstanceCountMismatch { total: u64, calculated: u64 },

    #[error("plan supports no builders; review the manifest")]
    NoBuildersSupported,

    #[error("plan does not support builder {builder}; supported: {supported:?}")]
    UnsupportedBuilder {
        builder: String,
        supported: Vec<String>,
    },

    #[error("plan supports no runners; review the manifest")]
    NoRunnersSupported,

    #[error("plan does not support runner {runner}; supported: {supported:?}")]
    UnsupportedRunner {
        runner: String,
        supported: Vec<String>,
    },

    #[error("test case {case} not found in plan {plan}")]
    TestCaseNotFound { case: String, plan: String },

    #[error("total instance count ({total}) outside of allowable range [{minimum}, {maximum}] for test case {case}")]
    InstanceCountOutOfRange {
        total: u64,
        minimum: u64,
        maximum: u64,
        case: String,
    },

    #[error("invalid group index {0}")]
    InvalidGroupIndex(usize),

    #[error("failed to encode default for test case parameter {name}: {reason}")]
    InvalidParameterDefault { name: String, reason: String },

    #[error("cannot append state: task is already in terminal state {0}")]
    TerminalState(String),
}

pub type ModelResult<T> = Result<T, ModelError>;
