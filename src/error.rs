//! Error Taxonomy - Failures Are Data
//!
//! Every component boundary returns `FlowError` as a structured value.
//! Nothing here is meant to abort the process.

use serde::Serialize;
use thiserror::Error;

use crate::engine::EngineError;
use crate::templates::ParameterType;

pub type FlowResult<T> = Result<T, FlowError>;

#[derive(Debug, Clone, Error, Serialize, PartialEq)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FlowError {
    #[error("Missing required parameter '{name}' for workflow {workflow_id}")]
    MissingRequiredParameter { workflow_id: String, name: String },

    #[error("Unknown parameter '{name}' for workflow {workflow_id}")]
    UnknownParameterOverride { workflow_id: String, name: String },

    #[error("Cannot coerce {value} to {expected} for parameter '{name}'")]
    TypeCoercionFailure {
        name: String,
        expected: ParameterType,
        value: String,
    },

    #[error("Constraint violation for parameter '{name}': {message}")]
    ConstraintViolation { name: String, message: String },

    #[error("Parameter '{name}' declared as {first} and {second} (at {pointer})")]
    DuplicateParameterDefinition {
        name: String,
        first: ParameterType,
        second: ParameterType,
        pointer: String,
    },

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Invalid workflow {workflow_id}: {reason}")]
    InvalidWorkflow { workflow_id: String, reason: String },

    #[error("Asset {0} not found or expired (registry is in-memory and resets on restart)")]
    AssetNotFoundOrExpired(String),

    #[error("Render engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Render engine rejected the graph: {0}")]
    EngineRejected(String),

    #[error("Job {0} not found in queue or history")]
    JobNotFound(String),

    #[error("Job {job_id} failed: {detail}")]
    JobError { job_id: String, detail: String },

    #[error("Job {0} was cancelled")]
    JobCancelled(String),

    #[error("Job {job_id} still pending after {attempts} polls; check it again later")]
    JobTimedOut { job_id: String, attempts: u32 },

    #[error("Defaults persistence error: {0}")]
    Persistence(String),
}

impl FlowError {
    /// Whether a later attempt with the same inputs may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            FlowError::EngineUnavailable(_) | FlowError::JobNotFound(_) | FlowError::JobTimedOut { .. }
        )
    }
}

impl From<EngineError> for FlowError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Rejected(msg) => FlowError::EngineRejected(msg),
            other => FlowError::EngineUnavailable(other.to_string()),
        }
    }
}
