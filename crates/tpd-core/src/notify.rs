use std::time::Duration;

use tracing::warn;

use crate::error::{EngineError, EngineResult};

/// Best-effort completion webhook.
///
/// When a URL is configured, every finished task triggers a single JSON
/// POST with a 10-second timeout and no retries. Delivery failures are
/// logged and never affect the task.
pub struct Notifier {
    url: Option<String>,
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(url: Option<String>) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| EngineError::Internal(format!("could not build http client: {e}")))?;
        Ok(Self { url, client })
    }

    pub async fn task_completed(&self, task_id: &str) {
        let Some(url) = &self.url else {
            return;
        };

        let body = serde_json::json!({
            "text": format!("task {task_id} completed; check the tasks list for the outcome"),
        });
        if let Err(e) = self.client.post(url).json(&body).send().await {
            warn!(task_id, err = %e, "could not deliver completion notification");
        }
    }
}
