mod coalesce;
mod env;
mod error;

pub use coalesce::{CoalescedConfig, ConfigMap};
pub use env::{DaemonConfig, EnvConfig};
pub use error::{ConfigError, ConfigResult};
