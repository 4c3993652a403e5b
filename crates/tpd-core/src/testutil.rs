//! Shared fixtures for the engine tests: mock plugins, a canned manifest
//! and small composition builders.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use tpd_config::{ConfigError, ConfigMap, EnvConfig};
use tpd_model::{
    Build, BuildRequest, Composition, Global, Group, Instances, Outcome, RunResult, Task,
    TaskInput, TestCase, TestPlanManifest, UnpackedSources,
};

use crate::error::{EngineError, EngineResult};
use crate::output::OutputWriter;
use crate::plugin::{
    BuildInput, BuildOutput, Builder, PluginConfig, RunGroup, RunInput, RunOutput, Runner,
};
use crate::registry::PluginRegistry;
use crate::supervisor::Engine;
use crate::task::TaskStore;

#[derive(Debug, Clone, Copy, PartialEq)]
enum MockMode {
    Normal,
    /// Parks until cancellation is observed, then reports `Canceled`.
    Park,
    Fail,
}

/// Builder double. Per-invocation behavior can also be driven through
/// selectors: `fail` fails the build, `park` parks it until cancellation.
pub(crate) struct MockBuilder {
    builds: AtomicUsize,
    mode: MockMode,
}

impl Default for MockBuilder {
    fn default() -> Self {
        Self {
            builds: AtomicUsize::new(0),
            mode: MockMode::Normal,
        }
    }
}

impl MockBuilder {
    pub(crate) fn parked() -> Self {
        Self {
            mode: MockMode::Park,
            ..Self::default()
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            mode: MockMode::Fail,
            ..Self::default()
        }
    }

    /// Number of successful builds performed.
    pub(crate) fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct MockBuilderConfig {
    #[allow(dead_code)]
    pub image: String,
}

#[async_trait]
impl Builder for MockBuilder {
    fn id(&self) -> &'static str {
        "mock:builder"
    }

    fn decode_config(&self, merged: ConfigMap) -> Result<PluginConfig, ConfigError> {
        let cfg: MockBuilderConfig =
            serde_json::from_value(serde_json::Value::Object(merged.into_iter().collect()))
                .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
        Ok(Arc::new(cfg))
    }

    async fn build(
        &self,
        cancel: &CancellationToken,
        input: &BuildInput,
        _ow: &OutputWriter,
    ) -> EngineResult<BuildOutput> {
        if self.mode == MockMode::Fail || input.selectors.iter().any(|s| s == "fail") {
            return Err(EngineError::BuilderFailed {
                builder: "mock:builder".into(),
                reason: "mock failure".into(),
            });
        }
        if self.mode == MockMode::Park || input.selectors.iter().any(|s| s == "park") {
            cancel.cancelled().await;
            return Err(EngineError::Canceled);
        }

        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(BuildOutput {
            builder_id: String::new(),
            artifact_path: format!(
                "{}/artifact-{}",
                input.sources.plan_dir.display(),
                input.build_id
            ),
        })
    }
}

/// Runner double that records the group inputs it was handed.
pub(crate) struct MockRunner {
    runs: AtomicUsize,
    seen_groups: Mutex<Vec<RunGroup>>,
    mode: MockMode,
}

impl Default for MockRunner {
    fn default() -> Self {
        Self {
            runs: AtomicUsize::new(0),
            seen_groups: Mutex::new(Vec::new()),
            mode: MockMode::Normal,
        }
    }
}

impl MockRunner {
    pub(crate) fn parked() -> Self {
        Self {
            mode: MockMode::Park,
            ..Self::default()
        }
    }

    pub(crate) fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub(crate) fn seen_groups(&self) -> Vec<RunGroup> {
        self.seen_groups
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct MockRunnerConfig {
    #[allow(dead_code)]
    pub keep_outputs: bool,
}

#[async_trait]
impl Runner for MockRunner {
    fn id(&self) -> &'static str {
        "mock:runner"
    }

    fn decode_config(&self, merged: ConfigMap) -> Result<PluginConfig, ConfigError> {
        let cfg: MockRunnerConfig =
            serde_json::from_value(serde_json::Value::Object(merged.into_iter().collect()))
                .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
        Ok(Arc::new(cfg))
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
        input: &RunInput,
        _ow: &OutputWriter,
    ) -> EngineResult<RunOutput> {
        if self.mode == MockMode::Fail {
            return Err(EngineError::RunnerFailed {
                runner: "mock:runner".into(),
                reason: "mock failure".into(),
            });
        }
        if self.mode == MockMode::Park {
            cancel.cancelled().await;
            return Err(EngineError::Canceled);
        }

        self.runs.fetch_add(1, Ordering::SeqCst);
        *self
            .seen_groups
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = input.groups.clone();

        Ok(RunOutput {
            run_id: input.run_id.clone(),
            result: RunResult {
                outcome: Outcome::Success,
                message: String::new(),
            },
        })
    }
}

pub(crate) fn mock_manifest() -> TestPlanManifest {
    TestPlanManifest {
        name: "mock_plan".into(),
        builders: [("mock:builder".to_string(), ConfigMap::new())]
            .into_iter()
            .collect(),
        runners: [("mock:runner".to_string(), ConfigMap::new())]
            .into_iter()
            .collect(),
        test_cases: vec![TestCase {
            name: "mock_case".into(),
            instances: tpd_model::InstanceConstraints {
                minimum: 1,
                maximum: 100,
            },
            parameters: Default::default(),
        }],
    }
}

pub(crate) fn group(id: &str, count: u64, selectors: &[&str], artifact: &str) -> Group {
    let mut g = Group::default();
    g.id = id.into();
    g.instances = Instances {
        count,
        percentage: 0.0,
    };
    g.build = Build {
        selectors: selectors.iter().map(|s| s.to_string()).collect(),
        dependencies: Vec::new(),
    };
    g.run = tpd_model::Run {
        artifact: artifact.into(),
        ..tpd_model::Run::default()
    };
    g
}

pub(crate) fn composition(groups: Vec<Group>) -> Composition {
    let total = groups.iter().map(|g| g.instances.count).sum();
    Composition {
        global: Global {
            plan: "mock_plan".into(),
            case: "mock_case".into(),
            total_instances: total,
            builder: "mock:builder".into(),
            runner: "mock:runner".into(),
            ..Global::default()
        },
        groups,
        ..Composition::default()
    }
}

/// Lays out a minimal unpacked source tree under `dir`.
pub(crate) fn sources_in(dir: &Path) -> UnpackedSources {
    let base = dir.join("sources");
    let plan = base.join("plan");
    std::fs::create_dir_all(&plan).expect("create source tree");
    std::fs::write(plan.join("main.sh"), "#!/bin/sh\nexit 0\n").expect("write plan file");
    UnpackedSources {
        base_dir: base,
        plan_dir: plan,
        sdk_dir: None,
        extra_dir: None,
    }
}

/// Build task input with `n` identically-configured groups.
pub(crate) fn build_input(manifest: &TestPlanManifest, n: usize) -> TaskInput {
    let groups = (0..n).map(|i| group(&format!("g{i}"), 1, &[], "")).collect();
    TaskInput::Build(BuildRequest {
        composition: composition(groups),
        manifest: manifest.clone(),
        sources: UnpackedSources::default(),
    })
}

/// Run task input. With `prebuild`, the first group carries no artifact and
/// is listed in `build_groups`.
pub(crate) fn run_input(manifest: &TestPlanManifest, prebuild: bool) -> TaskInput {
    let (first_artifact, build_groups) = if prebuild {
        ("", vec![0])
    } else {
        ("art://first", Vec::new())
    };
    TaskInput::Run(tpd_model::RunRequest {
        build_groups,
        composition: composition(vec![
            group("first", 1, &[], first_artifact),
            group("second", 2, &[], "art://second"),
        ]),
        manifest: manifest.clone(),
        sources: UnpackedSources::default(),
    })
}

pub(crate) fn mock_registry(builder: Arc<MockBuilder>, runner: Arc<MockRunner>) -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    registry.register_builder(builder);
    registry.register_runner(runner);
    registry
}

pub(crate) fn test_engine(dir: &Path, registry: PluginRegistry) -> Arc<Engine> {
    let env = EnvConfig::load(dir).expect("env config");
    Engine::new(env, registry).expect("engine")
}

/// Polls the store until the predicate holds, panicking after five seconds.
pub(crate) async fn wait_for_task(
    store: &TaskStore,
    id: &str,
    pred: impl Fn(&Task) -> bool,
) -> Task {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(task) = store.get(id) {
            if pred(&task) {
                return task;
            }
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for task {id}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
