//! Local subprocess plugins: a shell builder and a per-instance exec
//! runner. Suited to single-host deployments and smoke tests; cluster
//! backends implement the same traits out of tree.

mod builder;
mod runner;

pub use builder::{ExecBuilder, ExecBuilderConfig};
pub use runner::{ExecRunner, ExecRunnerConfig};
