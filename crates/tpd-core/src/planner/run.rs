use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use tpd_config::CoalescedConfig;
use tpd_model::{BuildRequest, RunRequest};

use crate::error::{EngineError, EngineResult};
use crate::output::OutputWriter;
use crate::plugin::{RunGroup, RunInput, RunReport};
use crate::supervisor::Engine;

impl Engine {
    /// Executes a run task: optionally prebuilds the selected groups, then
    /// invokes the composition's runner with the composed group inputs.
    pub(crate) async fn do_run(
        &self,
        cancel: &CancellationToken,
        run_id: &str,
        input: &RunRequest,
        ow: &Arc<OutputWriter>,
    ) -> EngineResult<RunReport> {
        let mut composition = input.composition.clone();

        if !input.build_groups.is_empty() {
            let bcomp = composition.pick_groups(&input.build_groups)?;
            let brequest = BuildRequest {
                composition: bcomp,
                manifest: input.manifest.clone(),
                sources: input.sources.clone(),
            };
            let bout = self.do_build(cancel, &brequest, ow).await?;

            // Write the artifacts back into the original group positions so
            // the persisted composition reproduces this job.
            for (i, &group_idx) in input.build_groups.iter().enumerate() {
                composition.groups[group_idx].run.artifact = bout[i].artifact_path.clone();
            }
        }

        let mut comp = composition.prepare_for_run(&input.manifest)?;
        comp.validate_for_run()?;

        let plan = comp.global.plan.clone();
        let case = comp.global.case.clone();
        let runner_id = comp.global.runner.clone();

        let runner = self
            .registry()
            .runner(&runner_id)
            .ok_or_else(|| EngineError::UnknownRunner(runner_id.clone()))?;

        if let Some(hc) = runner.healthchecker() {
            self.run_healthcheck(hc, cancel, ow, "runner").await?;
        }

        // Precedence mirrors the build side: runner defaults, env config
        // for this runner, composition global run config.
        let cfg = CoalescedConfig::new()
            .append(
                self.env()
                    .runners
                    .get(&runner_id)
                    .cloned()
                    .unwrap_or_default(),
            )
            .append(comp.global.run_config.clone());
        let config = runner.decode_config(cfg.coalesce())?;

        let run_input = RunInput {
            run_id: run_id.to_string(),
            env: self.env().clone(),
            runner_config: config,
            test_plan: plan.clone(),
            test_case: case.clone(),
            total_instances: comp.global.total_instances,
            groups: comp
                .groups
                .iter()
                .map(|g| RunGroup {
                    id: g.id.clone(),
                    instances: g.calculated_instance_count(),
                    artifact_path: g.run.artifact.clone(),
                    parameters: g.run.test_params.clone(),
                    resources: g.resources.clone(),
                })
                .collect(),
        };

        match runner.run(cancel, &run_input, ow).await {
            Ok(out) => {
                ow.info(format!(
                    "run finished successfully; run_id {run_id}; plan {plan}; case {case}; runner {runner_id}; instances {}",
                    run_input.total_instances
                ));
                Ok(RunReport {
                    run_id: out.run_id,
                    composition: comp,
                    result: out.result,
                })
            }
            Err(e) if e.is_canceled() => {
                ow.info(format!(
                    "run canceled; run_id {run_id}; plan {plan}; case {case}; runner {runner_id}"
                ));
                Err(e)
            }
            Err(e) => {
                ow.warn(format!(
                    "run finished in error; run_id {run_id}; plan {plan}; case {case}; runner {runner_id}; error {e}"
                ));
                Err(e)
            }
        }
    }
}
