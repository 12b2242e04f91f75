//! HTTP client for a ComfyUI-style render engine.

use std::time::Duration;

use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::engine::{EngineError, EngineResult, HistoryEntry, QueueEntry, QueueState, RenderEngine};
use crate::templates::RenderedGraph;

pub struct HttpRenderEngine {
    client: Client,
    base_url: String,
    client_id: String,
}

impl HttpRenderEngine {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> EngineResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client_id: Uuid::new_v4().to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json(&self, path: &str) -> EngineResult<Value> {
        let response = self.client.get(self.url(path)).send().await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn post_json(&self, path: &str, body: &Value) -> EngineResult<Response> {
        let response = self.client.post(self.url(path)).json(body).send().await?;
        check_status(response).await
    }
}

async fn check_status(response: Response) -> EngineResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    error!(status = %status, body = %body, "Render engine returned an error");
    if status.is_client_error() {
        Err(EngineError::Rejected(format!("{}: {}", status, body)))
    } else {
        Err(EngineError::Unavailable(format!("{}: {}", status, body)))
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    prompt_id: Option<String>,
    #[serde(default)]
    node_errors: Value,
}

#[async_trait::async_trait]
impl RenderEngine for HttpRenderEngine {
    fn name(&self) -> &str {
        "comfyui"
    }

    async fn submit(&self, graph: &RenderedGraph) -> EngineResult<String> {
        debug!(hash = graph.hash(), "Submitting graph");
        let body = json!({ "prompt": graph.graph(), "client_id": self.client_id });
        let response: SubmitResponse = self.post_json("/prompt", &body).await?.json().await?;

        if response.node_errors.as_object().map_or(false, |errs| !errs.is_empty()) {
            return Err(EngineError::Rejected(response.node_errors.to_string()));
        }
        response
            .prompt_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| EngineError::InvalidResponse("submit response carried no prompt_id".into()))
    }

    async fn queue_snapshot(&self) -> EngineResult<Vec<QueueEntry>> {
        Ok(parse_queue(&self.get_json("/queue").await?))
    }

    async fn history_snapshot(&self, job_id: &str) -> EngineResult<Option<HistoryEntry>> {
        let history = self
            .get_json(&format!("/history/{}", urlencoding::encode(job_id)))
            .await?;
        Ok(history.get(job_id).cloned().map(HistoryEntry::from_record))
    }

    /// Interrupts the job if it is executing, otherwise deletes it from the
    /// pending queue. `false` when the queue does not list it.
    async fn cancel(&self, job_id: &str) -> EngineResult<bool> {
        let queue = self.queue_snapshot().await?;
        let Some(entry) = queue.iter().find(|e| e.job_id == job_id) else {
            warn!(job_id, "Cancel requested for job not in queue");
            return Ok(false);
        };
        match entry.state {
            QueueState::Running => {
                self.post_json("/interrupt", &json!({ "prompt_id": job_id })).await?;
            }
            QueueState::Pending => {
                self.post_json("/queue", &json!({ "delete": [job_id] })).await?;
            }
        }
        Ok(true)
    }
}

/// Queue lists hold rows of `[number, prompt_id, graph, extra, outputs]`.
pub fn parse_queue(raw: &Value) -> Vec<QueueEntry> {
    let ids = |key: &str| -> Vec<String> {
        raw.get(key)
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| row.get(1).and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    };

    let running = ids("queue_running").into_iter().map(|job_id| QueueEntry {
        job_id,
        state: QueueState::Running,
        position: None,
    });
    let pending = ids("queue_pending")
        .into_iter()
        .enumerate()
        .map(|(i, job_id)| QueueEntry {
            job_id,
            state: QueueState::Pending,
            position: Some(i + 1),
        });
    running.chain(pending).collect()
}
