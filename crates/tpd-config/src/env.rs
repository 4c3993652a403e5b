use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::coalesce::ConfigMap;
use crate::error::{ConfigError, ConfigResult};

/// Daemon environment configuration, loaded from `<root>/env.toml`.
///
/// A missing file yields the defaults; a malformed file is an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    pub daemon: DaemonConfig,

    /// Per-builder configuration layers, applied between builder defaults
    /// and the composition's `build_config`.
    pub builders: BTreeMap<String, ConfigMap>,

    /// Per-runner configuration layers, applied between runner defaults and
    /// the composition's `run_config`.
    pub runners: BTreeMap<String, ConfigMap>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Address the HTTP API binds to.
    pub listen_addr: String,

    /// Number of supervisor workers.
    pub workers: usize,

    /// Per-task deadline, in minutes, measured from the `Processing`
    /// transition.
    pub task_timeout_min: u64,

    /// Optional webhook notified after every task completion.
    pub webhook_url: Option<String>,

    /// Root directory of the daemon's on-disk state. Set from the load path,
    /// not from the file.
    #[serde(skip)]
    pub root_dir: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8042".into(),
            workers: 2,
            task_timeout_min: 30,
            webhook_url: None,
            root_dir: PathBuf::from(".tpd"),
        }
    }
}

impl EnvConfig {
    /// Loads the configuration from `<root>/env.toml`, falling back to
    /// defaults when the file does not exist.
    pub fn load(root: &Path) -> ConfigResult<Self> {
        let path = root.join("env.toml");
        let mut cfg = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            toml::from_str::<EnvConfig>(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?
        } else {
            EnvConfig::default()
        };
        cfg.daemon.root_dir = root.to_path_buf();
        Ok(cfg)
    }

    /// Directory holding per-task output logs.
    pub fn daemon_dir(&self) -> PathBuf {
        self.daemon.root_dir.join("daemon")
    }

    /// Directory holding persisted task records.
    pub fn tasks_dir(&self) -> PathBuf {
        self.daemon.root_dir.join("tasks")
    }

    /// Path of the persisted queue snapshot.
    pub fn queue_path(&self) -> PathBuf {
        self.daemon.root_dir.join("queue.json")
    }

    /// Per-task execution deadline.
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.daemon.task_timeout_min * 60)
    }
}
