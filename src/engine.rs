//! Render Engine Contract
//!
//! The engine executes graphs and is the source of truth for job state.
//! It exposes two views that can disagree: a live queue and a history store.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::templates::RenderedGraph;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine unreachable: {0}")]
    Unavailable(String),

    #[error("engine rejected request: {0}")]
    Rejected(String),

    #[error("invalid engine response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            EngineError::InvalidResponse(err.to_string())
        } else {
            EngineError::Unavailable(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueState {
    Pending,
    Running,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub job_id: String,
    pub state: QueueState,
    /// 1-based position among pending jobs.
    #[serde(default)]
    pub position: Option<usize>,
}

/// One job's entry in the history store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// `{ node_id: { output_key: [ {filename, subfolder, type}, ... ] } }`
    pub outputs: Value,
    /// The full record as reported by the engine.
    pub record: Value,
}

impl HistoryEntry {
    /// Build from a raw history record, pulling `outputs` out of it.
    pub fn from_record(record: Value) -> Self {
        let outputs = record
            .get("outputs")
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()));
        Self { outputs, record }
    }

    pub fn has_outputs(&self) -> bool {
        self.outputs.as_object().map_or(false, |o| !o.is_empty())
    }
}

/// External render engine.
#[async_trait::async_trait]
pub trait RenderEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Submit a graph for execution; returns the engine-assigned job id.
    async fn submit(&self, graph: &RenderedGraph) -> EngineResult<String>;

    async fn queue_snapshot(&self) -> EngineResult<Vec<QueueEntry>>;

    /// `None` when the history store has no record of the job.
    async fn history_snapshot(&self, job_id: &str) -> EngineResult<Option<HistoryEntry>>;

    async fn cancel(&self, job_id: &str) -> EngineResult<bool>;
}
