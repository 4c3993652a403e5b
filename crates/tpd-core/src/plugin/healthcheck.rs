use std::fmt;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::EngineResult;
use crate::output::OutputWriter;

/// Optional capability of builders and runners: verify (and optionally
/// repair) the environment they depend on before work starts.
#[async_trait]
pub trait Healthchecker: Send + Sync {
    /// Runs all checks. With `fix` set, failed checks attempt their repair
    /// action and record its result in the report.
    async fn healthcheck(
        &self,
        cancel: &CancellationToken,
        ow: &OutputWriter,
        fix: bool,
    ) -> EngineResult<HealthcheckReport>;
}

/// Aggregated result of a healthcheck pass.
#[derive(Debug, Clone, Default)]
pub struct HealthcheckReport {
    pub items: Vec<HealthcheckItem>,
}

/// A single check and, when attempted, its fix.
#[derive(Debug, Clone)]
pub struct HealthcheckItem {
    pub name: String,
    pub check_ok: bool,

    /// `None` when no fix was attempted (check passed, or fix disabled).
    pub fix_ok: Option<bool>,
}

impl HealthcheckReport {
    /// True iff every check passed outright.
    pub fn checks_succeeded(&self) -> bool {
        self.items.iter().all(|i| i.check_ok)
    }

    /// True iff every attempted fix succeeded. A report without fixes
    /// trivially succeeds.
    pub fn fixes_succeeded(&self) -> bool {
        self.items.iter().all(|i| i.fix_ok.unwrap_or(true))
    }
}

// Rendered one check per line, e.g. `check outputs-dir: failed (fix: applied)`.
impl fmt::Display for HealthcheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for item in &self.items {
            let status = if item.check_ok { "ok" } else { "failed" };
            match item.fix_ok {
                Some(true) => writeln!(f, "check {}: {} (fix: applied)", item.name, status)?,
                Some(false) => writeln!(f, "check {}: {} (fix: failed)", item.name, status)?,
                None => writeln!(f, "check {}: {}", item.name, status)?,
            }
        }
        Ok(())
    }
}
