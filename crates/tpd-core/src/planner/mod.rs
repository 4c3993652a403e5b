//! Build and run planning: turning a prepared composition into concrete
//! builder/runner invocations.

mod build;
mod run;

use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, EngineResult};
use crate::output::OutputWriter;
use crate::plugin::Healthchecker;
use crate::supervisor::Engine;

impl Engine {
    /// Runs a plugin's healthcheck with `fix` enabled.
    ///
    /// A check error or a failed fix aborts the task. Checks that failed but
    /// were fixed only produce a warning.
    pub(crate) async fn run_healthcheck(
        &self,
        hc: &dyn Healthchecker,
        cancel: &CancellationToken,
        ow: &OutputWriter,
        subject: &str,
    ) -> EngineResult<()> {
        ow.info(format!("performing healthcheck on {subject}"));

        let report = hc
            .healthcheck(cancel, ow, true)
            .await
            .map_err(|e| EngineError::HealthcheckFailed(format!("healthcheck and fix errored: {e}")))?;

        if !report.fixes_succeeded() {
            return Err(EngineError::HealthcheckFailed(format!(
                "healthcheck fixes failed; aborting:\n{report}"
            )));
        }
        if !report.checks_succeeded() {
            ow.warn("some healthchecks failed, but continuing");
        } else {
            ow.info("healthcheck: ok");
        }
        Ok(())
    }
}
