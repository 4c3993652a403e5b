use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use tpd_config::{ConfigError, ConfigMap};
use tpd_core::error::{EngineError, EngineResult};
use tpd_core::output::OutputWriter;
use tpd_core::plugin::{
    HealthcheckItem, HealthcheckReport, Healthchecker, PluginConfig, RunInput, RunOutput, Runner,
};
use tpd_model::{Outcome, RunResult};

/// Configuration of the local exec runner.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExecRunnerConfig {
    /// Directory handed to instances for their outputs, via
    /// `TEST_OUTPUTS_PATH`. Unset leaves the variable out.
    pub outputs_dir: Option<PathBuf>,
}

/// Runner that executes every instance of a composition as a local
/// subprocess of the group's artifact.
///
/// Instances receive their parameters through the environment: `TEST_PLAN`,
/// `TEST_CASE`, `TEST_RUN`, `TEST_GROUP_ID`, `TEST_GROUP_INSTANCE_COUNT`,
/// `TEST_TOTAL_INSTANCES` and `TEST_INSTANCE_PARAMS` (`k=v` pairs joined
/// with `|`).
pub struct ExecRunner {
    work_dir: PathBuf,
}

impl ExecRunner {
    pub fn new(work_dir: PathBuf) -> Self {
        Self { work_dir }
    }
}

#[async_trait]
impl Runner for ExecRunner {
    fn id(&self) -> &'static str {
        "local:exec"
    }

    fn decode_config(&self, merged: ConfigMap) -> Result<PluginConfig, ConfigError> {
        let cfg: ExecRunnerConfig =
            serde_json::from_value(serde_json::Value::Object(merged.into_iter().collect()))
                .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
        Ok(Arc::new(cfg))
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
        input: &RunInput,
        ow: &OutputWriter,
    ) -> EngineResult<RunOutput> {
        let cfg = input
            .runner_config
            .downcast_ref::<ExecRunnerConfig>()
            .ok_or_else(|| {
                EngineError::Internal("unexpected config type for local:exec runner".into())
            })?;

        let mut children: Vec<(String, u64, Child)> = Vec::new();
        for group in &input.groups {
            let params: Vec<String> = group
                .parameters
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            let params = params.join("|");

            for instance in 0..group.instances {
                let mut cmd = Command::new(&group.artifact_path);
                cmd.env("TEST_PLAN", &input.test_plan)
                    .env("TEST_CASE", &input.test_case)
                    .env("TEST_RUN", &input.run_id)
                    .env("TEST_GROUP_ID", &group.id)
                    .env("TEST_GROUP_INSTANCE_COUNT", group.instances.to_string())
                    .env("TEST_TOTAL_INSTANCES", input.total_instances.to_string())
                    .env("TEST_INSTANCE_PARAMS", &params)
                    .stdin(Stdio::null())
                    .stdout(ow.stdio()?)
                    .stderr(ow.stdio()?);
                if let Some(outputs) = &cfg.outputs_dir {
                    let dir = outputs
                        .join(&input.run_id)
                        .join(&group.id)
                        .join(instance.to_string());
                    std::fs::create_dir_all(&dir)?;
                    cmd.env("TEST_OUTPUTS_PATH", &dir);
                }

                let child = cmd.spawn().map_err(|e| {
                    EngineError::RunnerFailed {
                        runner: self.id().to_string(),
                        reason: format!(
                            "could not spawn instance {instance} of group {}: {e}",
                            group.id
                        ),
                    }
                })?;
                children.push((group.id.clone(), instance, child));
            }
        }

        let total = children.len();
        ow.info(format!("started {total} test instances"));

        let mut failures = 0usize;
        while let Some((group_id, instance, mut child)) = children.pop() {
            tokio::select! {
                res = child.wait() => {
                    match res {
                        Ok(status) if status.success() => {}
                        Ok(status) => {
                            failures += 1;
                            ow.warn(format!(
                                "instance {instance} of group {group_id} exited with {status}"
                            ));
                        }
                        Err(e) => {
                            failures += 1;
                            ow.warn(format!(
                                "could not wait for instance {instance} of group {group_id}: {e}"
                            ));
                        }
                    }
                }
                _ = cancel.cancelled() => {
                    ow.info("cancellation requested; killing test instances");
                    if let Err(e) = child.kill().await {
                        debug!("failed to kill instance: {e}");
                    }
                    for (_, _, mut rest) in children.drain(..) {
                        if let Err(e) = rest.kill().await {
                            debug!("failed to kill instance: {e}");
                        }
                    }
                    return Err(EngineError::Canceled);
                }
            }
        }

        let result = if failures == 0 {
            RunResult {
                outcome: Outcome::Success,
                message: String::new(),
            }
        } else {
            RunResult {
                outcome: Outcome::Failure,
                message: format!("{failures}/{total} instances failed"),
            }
        };

        Ok(RunOutput {
            run_id: input.run_id.clone(),
            result,
        })
    }

    fn healthchecker(&self) -> Option<&dyn Healthchecker> {
        Some(self)
    }
}

#[async_trait]
impl Healthchecker for ExecRunner {
    async fn healthcheck(
        &self,
        _cancel: &CancellationToken,
        ow: &OutputWriter,
        fix: bool,
    ) -> EngineResult<HealthcheckReport> {
        let mut item = HealthcheckItem {
            name: "work-dir".into(),
            check_ok: self.work_dir.is_dir(),
            fix_ok: None,
        };
        if !item.check_ok && fix {
            item.fix_ok = Some(std::fs::create_dir_all(&self.work_dir).is_ok());
        }
        ow.info(format!(
            "work dir {}: {}",
            self.work_dir.display(),
            if item.check_ok { "present" } else { "missing" }
        ));
        Ok(HealthcheckReport { items: vec![item] })
    }
}
