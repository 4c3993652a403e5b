use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use tpd_config::{ConfigError, ConfigMap};
use tpd_core::error::{EngineError, EngineResult};
use tpd_core::output::OutputWriter;
use tpd_core::plugin::{BuildInput, BuildOutput, Builder, PluginConfig};

/// Configuration of the shell builder.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecBuilderConfig {
    /// Command run inside the plan directory, via `sh -c`.
    pub build_cmd: String,

    /// Artifact the command is expected to produce, relative to the plan
    /// directory.
    pub artifact: String,
}

impl Default for ExecBuilderConfig {
    fn default() -> Self {
        Self {
            build_cmd: "make".into(),
            artifact: "artifact.out".into(),
        }
    }
}

/// Builder that produces artifacts by running a shell command inside the
/// unpacked plan sources.
///
/// The command inherits the build parameters through the environment:
/// `TEST_PLAN`, `BUILD_ID`, `BUILD_SELECTORS` (comma-separated) and
/// `BUILD_DEPENDENCIES` (`module=version` or `module=target@version`,
/// pipe-separated).
pub struct ExecBuilder;

#[async_trait]
impl Builder for ExecBuilder {
    fn id(&self) -> &'static str {
        "exec:shell"
    }

    fn decode_config(&self, merged: ConfigMap) -> Result<PluginConfig, ConfigError> {
        let cfg: ExecBuilderConfig =
            serde_json::from_value(serde_json::Value::Object(merged.into_iter().collect()))
                .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
        if cfg.build_cmd.trim().is_empty() {
            return Err(ConfigError::InvalidConfig("build_cmd is empty".into()));
        }
        if cfg.artifact.trim().is_empty() {
            return Err(ConfigError::InvalidConfig("artifact is empty".into()));
        }
        Ok(Arc::new(cfg))
    }

    async fn build(
        &self,
        cancel: &CancellationToken,
        input: &BuildInput,
        ow: &OutputWriter,
    ) -> EngineResult<BuildOutput> {
        let cfg = input
            .build_config
            .downcast_ref::<ExecBuilderConfig>()
            .ok_or_else(|| {
                EngineError::Internal("unexpected config type for exec:shell builder".into())
            })?;

        let dependencies: Vec<String> = input
            .dependencies
            .iter()
            .map(|(module, dep)| {
                if dep.target.is_empty() {
                    format!("{module}={}", dep.version)
                } else {
                    format!("{module}={}@{}", dep.target, dep.version)
                }
            })
            .collect();

        ow.info(format!(
            "running build command `{}` in {}",
            cfg.build_cmd,
            input.sources.plan_dir.display()
        ));

        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(&cfg.build_cmd)
            .current_dir(&input.sources.plan_dir)
            .env("TEST_PLAN", &input.test_plan)
            .env("BUILD_ID", &input.build_id)
            .env("BUILD_SELECTORS", input.selectors.join(","))
            .env("BUILD_DEPENDENCIES", dependencies.join("|"))
            .stdin(Stdio::null())
            .stdout(ow.stdio()?)
            .stderr(ow.stdio()?);

        let mut child = cmd
            .spawn()
            .map_err(|e| EngineError::Io(format!("spawn failed: {e}")))?;

        let status = tokio::select! {
            res = child.wait() => {
                res.map_err(|e| EngineError::Io(format!("wait failed: {e}")))?
            }
            _ = cancel.cancelled() => {
                debug!(build_id = %input.build_id, "cancellation requested; killing build process");
                if let Err(e) = child.kill().await {
                    debug!("failed to kill build process: {e}");
                }
                return Err(EngineError::Canceled);
            }
        };

        if !status.success() {
            return Err(EngineError::BuilderFailed {
                builder: self.id().to_string(),
                reason: match status.code() {
                    Some(code) => format!("build command exited with code {code}"),
                    None => "build command terminated by signal".into(),
                },
            });
        }

        let artifact = input.sources.plan_dir.join(&cfg.artifact);
        if !artifact.exists() {
            return Err(EngineError::BuilderFailed {
                builder: self.id().to_string(),
                reason: format!("build command produced no artifact at {}", artifact.display()),
            });
        }

        Ok(BuildOutput {
            builder_id: String::new(),
            artifact_path: artifact.display().to_string(),
        })
    }
}
