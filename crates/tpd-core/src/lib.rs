pub mod error;
pub mod notify;
pub mod output;
pub mod planner;
pub mod plugin;
pub mod registry;
pub mod supervisor;
pub mod task;

#[cfg(test)]
mod testutil;

pub mod prelude {
    pub use crate::error::EngineError;
    pub use crate::output::OutputWriter;
    pub use crate::plugin::{
        BuildInput, BuildOutput, Builder, HealthcheckItem, HealthcheckReport, Healthchecker,
        PluginConfig, RunGroup, RunInput, RunOutput, Runner,
    };
    pub use crate::registry::PluginRegistry;
    pub use crate::supervisor::Engine;
}
