use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::EngineResult;

/// Append-only per-task output sink.
///
/// Builders and runners stream progress through this writer; every line is
/// appended to `<daemon_dir>/<task_id>.out` and teed to the process log.
pub struct OutputWriter {
    task_id: String,
    path: PathBuf,
    file: Mutex<File>,
}

impl OutputWriter {
    /// Opens the sink for the given task, creating the directory and file as
    /// needed.
    pub fn create(dir: &Path, task_id: &str) -> EngineResult<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{task_id}.out"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            task_id: task_id.to_string(),
            path,
            file: Mutex::new(file),
        })
    }

    /// Location of the sink on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A process stdio handle appending to this sink, for wiring child
    /// process output straight into the task log.
    pub fn stdio(&self) -> EngineResult<std::process::Stdio> {
        let file = self
            .file
            .lock()
            .map_err(|_| crate::error::EngineError::Internal("output sink poisoned".into()))?;
        let clone = file.try_clone()?;
        Ok(std::process::Stdio::from(clone))
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        info!(task_id = %self.task_id, "{msg}");
        self.append("INFO", msg);
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        warn!(task_id = %self.task_id, "{msg}");
        self.append("WARN", msg);
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        warn!(task_id = %self.task_id, "{msg}");
        self.append("ERROR", msg);
    }

    fn append(&self, level: &str, msg: &str) {
        let Ok(mut file) = self.file.lock() else {
            return;
        };
        let ts = Utc::now().to_rfc3339();
        if let Err(e) = writeln!(file, "[{ts}] {level} {msg}") {
            debug!(task_id = %self.task_id, err = %e, "could not append to task output");
        }
    }
}
