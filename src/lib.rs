//! RenderFlow Core - Workflow Orchestrator
//!
//! # The Six Laws (Non-Negotiable)
//! 1. Placeholders Are The Schema
//! 2. Rendered Graphs Are Immutable
//! 3. Defaults Have One Precedence Order
//! 4. The Engine Owns Job State
//! 5. One Live Record Per Artifact
//! 6. Failures Are Data

pub mod catalog;
pub mod config;
pub mod defaults;
pub mod engine;
pub mod error;
pub mod hashing;
pub mod http_engine;
pub mod jobs;
pub mod locator;
pub mod orchestrator;
pub mod registry;
pub mod templates;
pub mod validation;

pub use catalog::WorkflowCatalog;
pub use config::RenderflowConfig;
pub use defaults::{DefaultSource, DefaultsResolver};
pub use engine::{EngineError, RenderEngine};
pub use error::{FlowError, FlowResult};
pub use hashing::{canonical_json, compute_graph_hash};
pub use http_engine::HttpRenderEngine;
pub use jobs::{JobStatus, JobStatusMachine};
pub use orchestrator::{ExecutionOrchestrator, OrchestratorSettings, QueueStatus, RunFailure, KEEP_ORIGINAL_SEED};
pub use registry::{AssetFilter, AssetRecord, AssetRegistry, StableIdentity};
pub use templates::{Namespace, ParamValues, ParameterSpec, ParameterType, RenderedGraph, WorkflowDefinition};
pub use validation::{ConstraintValidator, NumericConstraint, ValidationResult};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
