//! Job Status Machine
//!
//! `queued -> running -> {completed | error | cancelled}`, plus `not_found`.
//! Status is re-derived from the engine's queue and history on every poll;
//! nothing is stored here.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::engine::{HistoryEntry, QueueState, RenderEngine};
use crate::error::{FlowError, FlowResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Queued { position: Option<usize> },
    Running,
    Completed { outputs: Value, history: Value },
    Error { detail: String, history: Option<Value> },
    Cancelled,
    /// Not in either view. Either not visible yet or already purged.
    NotFound,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Error { .. } | Self::Cancelled)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Queued { .. } => "queued",
            Self::Running => "running",
            Self::Completed { .. } => "completed",
            Self::Error { .. } => "error",
            Self::Cancelled => "cancelled",
            Self::NotFound => "not_found",
        }
    }
}

pub struct JobStatusMachine {
    engine: Arc<dyn RenderEngine>,
}

impl JobStatusMachine {
    pub fn new(engine: Arc<dyn RenderEngine>) -> Self {
        Self { engine }
    }

    /// Reconcile the queue and history views into one status.
    pub async fn poll(&self, job_id: &str) -> FlowResult<JobStatus> {
        if job_id.trim().is_empty() {
            return Err(FlowError::JobNotFound(job_id.to_string()));
        }

        // The queue is authoritative while it lists the job.
        match self.engine.queue_snapshot().await {
            Ok(entries) => {
                if let Some(entry) = entries.iter().find(|e| e.job_id == job_id) {
                    return Ok(match entry.state {
                        QueueState::Running => JobStatus::Running,
                        QueueState::Pending => JobStatus::Queued { position: entry.position },
                    });
                }
            }
            Err(err) => warn!(job_id, error = %err, "Queue view unavailable, falling back to history"),
        }

        let status = match self.engine.history_snapshot(job_id).await? {
            Some(entry) => classify_history(entry),
            None => JobStatus::NotFound,
        };
        debug!(job_id, status = status.label(), "Polled job");
        Ok(status)
    }
}

fn classify_history(entry: HistoryEntry) -> JobStatus {
    let messages = entry.record.pointer("/status/messages");
    let status_str = entry
        .record
        .pointer("/status/status_str")
        .and_then(Value::as_str);

    if has_status_message(messages, "execution_interrupted") {
        return JobStatus::Cancelled;
    }
    if status_str == Some("error") || entry.record.get("error").is_some() {
        return JobStatus::Error {
            detail: extract_node_errors(&entry.record),
            history: Some(entry.record),
        };
    }
    if entry.has_outputs() || status_str == Some("success") {
        return JobStatus::Completed {
            outputs: entry.outputs,
            history: entry.record,
        };
    }
    // Recorded but outputs not flushed yet.
    JobStatus::Running
}

/// Messages arrive as `[[type, data], ...]`.
pub fn has_status_message(messages: Option<&Value>, kind: &str) -> bool {
    messages
        .and_then(Value::as_array)
        .map_or(false, |msgs| {
            msgs.iter()
                .any(|m| m.get(0).and_then(Value::as_str) == Some(kind))
        })
}

/// Human-readable diagnostics from a failed history record.
pub fn extract_node_errors(record: &Value) -> String {
    let mut parts = Vec::new();

    if let Some(msgs) = record.pointer("/status/messages").and_then(Value::as_array) {
        for msg in msgs {
            if msg.get(0).and_then(Value::as_str) != Some("execution_error") {
                continue;
            }
            let Some(data) = msg.get(1) else { continue };
            let field = |k: &str| data.get(k).and_then(Value::as_str).unwrap_or("?").to_string();
            let node_id = data
                .get("node_id")
                .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                .unwrap_or_else(|| "?".into());
            parts.push(format!(
                "Node {} ({}): {}: {}",
                node_id,
                field("node_type"),
                field("exception_type"),
                field("exception_message"),
            ));
        }
    }

    if parts.is_empty() {
        match record.get("error") {
            Some(Value::String(s)) => parts.push(s.clone()),
            Some(err) => parts.push(
                err.get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| err.to_string()),
            ),
            None => {}
        }
    }

    if parts.is_empty() {
        "No detailed error info in engine history".to_string()
    } else {
        parts.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_structured_execution_error() {
        let record = json!({
            "status": {
                "status_str": "error",
                "completed": false,
                "messages": [
                    ["execution_started", {"prompt_id": "abc"}],
                    ["execution_error", {
                        "node_id": "3",
                        "node_type": "KSampler",
                        "exception_type": "RuntimeError",
                        "exception_message": "mat1 and mat2 shapes cannot be multiplied"
                    }]
                ]
            }
        });
        let detail = extract_node_errors(&record);
        assert!(detail.contains("Node 3 (KSampler)"));
        assert!(detail.contains("RuntimeError"));
        assert!(detail.contains("mat1 and mat2"));
    }

    #[test]
    fn test_extract_top_level_error_and_fallback() {
        assert!(extract_node_errors(&json!({"error": {"message": "something broke"}})).contains("something broke"));
        assert!(extract_node_errors(&json!({"status": {}})).contains("No detailed error info"));
    }

    #[test]
    fn test_has_status_message() {
        let msgs = json!([["execution_started", {}], ["execution_error", {"node_id": "1"}]]);
        assert!(has_status_message(Some(&msgs), "execution_error"));
        assert!(!has_status_message(Some(&msgs), "execution_success"));
        assert!(!has_status_message(Some(&json!([])), "anything"));
        assert!(!has_status_message(None, "anything"));
    }

    #[test]
    fn test_classify_history() {
        let done = HistoryEntry::from_record(json!({
            "outputs": {"9": {"images": [{"filename": "a.png"}]}},
            "status": {"status_str": "success"}
        }));
        assert!(matches!(classify_history(done), JobStatus::Completed { .. }));

        let interrupted = HistoryEntry::from_record(json!({
            "status": {"status_str": "error", "messages": [["execution_interrupted", {}]]}
        }));
        assert_eq!(classify_history(interrupted), JobStatus::Cancelled);

        let failed = HistoryEntry::from_record(json!({"status": {"status_str": "error", "messages": []}}));
        assert!(matches!(classify_history(failed), JobStatus::Error { .. }));

        let flushing = HistoryEntry::from_record(json!({"prompt": []}));
        assert_eq!(classify_history(flushing), JobStatus::Running);
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::NotFound.is_terminal());
        assert!(!JobStatus::Queued { position: Some(1) }.is_terminal());
        assert_eq!(JobStatus::NotFound.label(), "not_found");
    }
}
