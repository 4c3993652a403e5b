//! Pluggable builder and runner interfaces.
//!
//! Builders produce artifacts from unpacked sources; runners execute those
//! artifacts across the instances of a composition. Implementations are
//! registered by string id and queried at runtime; the optional healthcheck
//! capability is probed through [`Builder::healthchecker`] /
//! [`Runner::healthchecker`].

mod healthcheck;

pub use healthcheck::{HealthcheckItem, HealthcheckReport, Healthchecker};

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use tpd_config::{ConfigError, ConfigMap, EnvConfig};
use tpd_model::{Composition, Resources, RunResult, UnpackedSources};

use crate::error::EngineResult;
use crate::output::OutputWriter;

/// Runtime-typed plugin configuration.
///
/// Produced once per task by [`Builder::decode_config`] /
/// [`Runner::decode_config`] from the coalesced configuration layers, and
/// shared across all build fibers of the task. The concrete plugin downcasts
/// it back to the config type it declared.
pub type PluginConfig = Arc<dyn Any + Send + Sync>;

/// An upstream dependency override, keyed by module in
/// [`BuildInput::dependencies`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyTarget {
    pub target: String,
    pub version: String,
}

/// Input to a single build job, covering one group equivalence class.
#[derive(Clone)]
pub struct BuildInput {
    /// Fresh opaque id of this build job.
    pub build_id: String,

    /// Snapshot of the daemon environment configuration.
    pub env: EnvConfig,

    /// Canonical plan name.
    pub test_plan: String,

    /// Source selection strings for the representative group.
    pub selectors: Vec<String>,

    /// Dependency overrides, keyed by module.
    pub dependencies: BTreeMap<String, DependencyTarget>,

    /// Coalesced configuration in the shape this builder declared.
    pub build_config: PluginConfig,

    /// Source tree this build may freely work in. Concurrent builds of the
    /// same task never share a tree.
    pub sources: UnpackedSources,
}

/// Output of a single build job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildOutput {
    /// Id of the builder that produced the artifact. Stamped by the planner.
    #[serde(default)]
    pub builder_id: String,

    /// Handle of the produced artifact, in builder-specific form.
    pub artifact_path: String,
}

/// Input to a runner invocation.
#[derive(Clone)]
pub struct RunInput {
    /// Daemon-assigned run id; equals the task id.
    pub run_id: String,

    /// Snapshot of the daemon environment configuration.
    pub env: EnvConfig,

    /// Coalesced configuration in the shape this runner declared.
    pub runner_config: PluginConfig,

    pub test_plan: String,
    pub test_case: String,
    pub total_instances: u64,

    /// One entry per composition group, in composition order.
    pub groups: Vec<RunGroup>,
}

/// Per-group slice of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunGroup {
    pub id: String,
    pub instances: u64,
    pub artifact_path: String,
    pub parameters: BTreeMap<String, String>,
    pub resources: Resources,
}

/// Output of a runner invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    pub run_id: String,
    pub result: RunResult,
}

/// Result data persisted for a completed run task: enough to reproduce the
/// job and to decode its outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,

    /// The post-preparation composition, with all defaults folded in and
    /// prebuilt artifacts filled into the groups.
    pub composition: Composition,

    pub result: RunResult,
}

/// A pluggable artifact builder.
#[async_trait]
pub trait Builder: Send + Sync {
    /// Unique id of this builder, as referenced by `global.builder`.
    fn id(&self) -> &'static str;

    /// Deserializes the coalesced configuration into the shape this builder
    /// expects. Called by the planner before fan-out; ill-typed values are
    /// rejected here, not inside the build.
    fn decode_config(&self, merged: ConfigMap) -> Result<PluginConfig, ConfigError>;

    /// Produces an artifact from the given sources. Must observe `cancel`
    /// cooperatively.
    async fn build(
        &self,
        cancel: &CancellationToken,
        input: &BuildInput,
        ow: &OutputWriter,
    ) -> EngineResult<BuildOutput>;

    /// Optional healthcheck capability.
    fn healthchecker(&self) -> Option<&dyn Healthchecker> {
        None
    }
}

/// A pluggable artifact runner.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Unique id of this runner, as referenced by `global.runner`.
    fn id(&self) -> &'static str;

    /// Deserializes the coalesced configuration into the shape this runner
    /// expects.
    fn decode_config(&self, merged: ConfigMap) -> Result<PluginConfig, ConfigError>;

    /// Executes the composed groups. Must observe `cancel` cooperatively.
    async fn run(
        &self,
        cancel: &CancellationToken,
        input: &RunInput,
        ow: &OutputWriter,
    ) -> EngineResult<RunOutput>;

    /// Optional healthcheck capability.
    fn healthchecker(&self) -> Option<&dyn Healthchecker> {
        None
    }
}
