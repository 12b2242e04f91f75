//! Execution Orchestrator
//!
//! Composes the catalog, defaults, engine, status machine and registry:
//!
//! - One generic entry point runs any workflow by id
//! - A graph is submitted exactly once per `run`
//! - Failures after submission come back as data, with the job id attached
//! - Workflow definitions are swapped wholesale on reload; in-flight runs keep
//!   the definition they started with

use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::catalog::WorkflowCatalog;
use crate::config::RenderflowConfig;
use crate::defaults::{DefaultsResolver, EnvironmentTier, HardcodedTier, PersistedTier, RuntimeTier};
use crate::engine::{QueueEntry, QueueState, RenderEngine};
use crate::error::{FlowError, FlowResult};
use crate::http_engine::HttpRenderEngine;
use crate::jobs::{JobStatus, JobStatusMachine};
use crate::locator;
use crate::registry::{AssetFilter, AssetMetadata, AssetRecord, AssetRegistry, Provenance, StableIdentity};
use crate::templates::{
    apply_overrides, render, validate_overrides, Namespace, ParamValues, RenderedGraph, WorkflowDefinition,
};

/// Parameter that `regenerate` reseeds.
pub const SEED_PARAMETER: &str = "seed";

/// `regenerate` seed value that keeps the recorded seed.
pub const KEEP_ORIGINAL_SEED: i64 = -1;

/// A run that did not produce an asset.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error("{error}")]
pub struct RunFailure {
    /// Set once the graph was accepted by the engine.
    pub job_id: Option<String>,
    pub last_status: Option<JobStatus>,
    pub error: FlowError,
}

impl From<FlowError> for RunFailure {
    fn from(error: FlowError) -> Self {
        Self {
            job_id: None,
            last_status: None,
            error,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub running: Vec<QueueEntry>,
    pub pending: Vec<QueueEntry>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub engine_url: String,
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    pub lost_job_grace: u32,
}

impl From<&RenderflowConfig> for OrchestratorSettings {
    fn from(config: &RenderflowConfig) -> Self {
        Self {
            engine_url: config.engine_url.clone(),
            poll_interval: config.poll_interval,
            max_poll_attempts: config.max_poll_attempts,
            lost_job_grace: config.lost_job_grace,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&RenderflowConfig::default())
    }
}

pub struct ExecutionOrchestrator {
    catalog: RwLock<Arc<WorkflowCatalog>>,
    defaults: Arc<DefaultsResolver>,
    engine: Arc<dyn RenderEngine>,
    status: JobStatusMachine,
    registry: Arc<AssetRegistry>,
    settings: OrchestratorSettings,
    /// Jobs this orchestrator asked the engine to cancel.
    cancelled: Mutex<HashSet<String>>,
}

impl ExecutionOrchestrator {
    pub fn new(
        catalog: WorkflowCatalog,
        defaults: Arc<DefaultsResolver>,
        engine: Arc<dyn RenderEngine>,
        registry: Arc<AssetRegistry>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            catalog: RwLock::new(Arc::new(catalog)),
            defaults,
            status: JobStatusMachine::new(Arc::clone(&engine)),
            engine,
            registry,
            settings,
            cancelled: Mutex::new(HashSet::new()),
        }
    }

    /// Wire every component from configuration, talking HTTP to the engine.
    pub fn from_config(config: &RenderflowConfig) -> FlowResult<Self> {
        let engine = HttpRenderEngine::new(&config.engine_url, config.engine_timeout)?;
        let persisted = match &config.defaults_file {
            Some(path) => PersistedTier::load(path)?,
            None => PersistedTier::empty(),
        };
        let defaults = DefaultsResolver::new(
            RuntimeTier::new(),
            persisted,
            EnvironmentTier::from_env(),
            HardcodedTier::default(),
        );
        Ok(Self::new(
            WorkflowCatalog::load_from_dir(&config.workflow_dir)?,
            Arc::new(defaults),
            Arc::new(engine),
            Arc::new(AssetRegistry::new(config.asset_ttl)),
            OrchestratorSettings::from(config),
        ))
    }

    // -- workflows --

    pub fn list_workflows(&self) -> Vec<Arc<WorkflowDefinition>> {
        self.catalog().list()
    }

    pub fn workflow(&self, workflow_id: &str) -> FlowResult<Arc<WorkflowDefinition>> {
        self.catalog()
            .get(workflow_id)
            .ok_or_else(|| FlowError::WorkflowNotFound(workflow_id.to_string()))
    }

    /// Rescan the workflow directory and swap the catalog in one step.
    pub fn reload_workflows(&self) -> FlowResult<usize> {
        let fresh = self.catalog().reload()?;
        let count = fresh.len();
        *self.catalog.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(fresh);
        info!(workflows = count, "Reloaded workflows");
        Ok(count)
    }

    fn catalog(&self) -> Arc<WorkflowCatalog> {
        Arc::clone(&self.catalog.read().unwrap_or_else(|e| e.into_inner()))
    }

    // -- defaults --

    pub fn set_default(&self, namespace: Namespace, key: &str, value: Value) {
        self.defaults.runtime().set(namespace.as_str(), key, value);
    }

    /// Resolve every declared parameter of `definition`, caller values first.
    pub fn resolve_parameters(&self, definition: &WorkflowDefinition, params: &ParamValues) -> ParamValues {
        let mut resolved = ParamValues::new();
        for spec in &definition.parameters {
            if let Some(r) = self
                .defaults
                .resolve_for_workflow(definition, &spec.name, params.get(&spec.name))
            {
                debug!(workflow_id = %definition.id, name = %spec.name, source = ?r.source, "Resolved parameter");
                resolved.insert(spec.name.clone(), r.value);
            }
        }
        resolved
    }

    // -- execution --

    /// Render and run a workflow, returning the registered asset.
    pub async fn run(
        &self,
        workflow_id: &str,
        params: &ParamValues,
        session_id: Option<String>,
    ) -> Result<Arc<AssetRecord>, RunFailure> {
        let definition = self.workflow(workflow_id)?;
        validate_overrides(&definition, params)?;
        let resolved = self.resolve_parameters(&definition, params);
        let graph = render(&definition, &resolved)?;
        self.execute(&definition, resolved, graph, session_id).await
    }

    /// Re-run the workflow behind an existing asset, with overrides layered on
    /// the parameters it was produced from. The original session is kept
    /// unless a new one is given.
    ///
    /// `seed` applies to workflows declaring a `seed` parameter when the
    /// overrides leave it unset: `None` draws a fresh random seed,
    /// `Some(KEEP_ORIGINAL_SEED)` keeps the recorded one.
    pub async fn regenerate(
        &self,
        asset_id: &str,
        overrides: &ParamValues,
        seed: Option<i64>,
        session_id: Option<String>,
    ) -> Result<Arc<AssetRecord>, RunFailure> {
        let original = self.get_asset(asset_id)?;
        let definition = self.workflow(original.workflow_id())?;
        let base = &original.provenance.parameters;

        let mut overrides = overrides.clone();
        if definition.parameter(SEED_PARAMETER).is_some() && !overrides.contains_key(SEED_PARAMETER) {
            match seed {
                Some(KEEP_ORIGINAL_SEED) => {}
                Some(seed) => {
                    overrides.insert(SEED_PARAMETER.to_string(), Value::from(seed));
                }
                None => {
                    overrides.insert(SEED_PARAMETER.to_string(), Value::from(rand::random::<u64>()));
                }
            }
        }
        let graph = apply_overrides(&definition, base, &overrides)?;

        let mut parameters = base.clone();
        parameters.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        parameters.retain(|name, _| definition.parameter(name).is_some());

        info!(asset_id, workflow_id = %definition.id, overrides = overrides.len(), "Regenerating asset");
        let session_id = session_id.or_else(|| original.session_id.clone());
        self.execute(&definition, parameters, graph, session_id).await
    }

    async fn execute(
        &self,
        definition: &WorkflowDefinition,
        parameters: ParamValues,
        graph: RenderedGraph,
        session_id: Option<String>,
    ) -> Result<Arc<AssetRecord>, RunFailure> {
        let job_id = self
            .engine
            .submit(&graph)
            .await
            .map_err(|e| RunFailure::from(FlowError::from(e)))?;
        info!(job_id = %job_id, workflow_id = %definition.id, hash = graph.hash(), "Submitted job");

        let (outputs, history) = self.await_completion(&job_id).await?;

        let Some(identity) = extract_identity(&outputs, definition.namespace) else {
            return Err(RunFailure {
                job_id: Some(job_id.clone()),
                last_status: Some(JobStatus::Completed { outputs, history }),
                error: FlowError::JobError {
                    job_id,
                    detail: "completed without any artifact in its outputs".into(),
                },
            });
        };

        let metadata = AssetMetadata::from_identity(&identity);
        let provenance = Provenance {
            workflow_id: definition.id.clone(),
            job_id,
            parameters,
            graph,
            history,
        };
        Ok(self.registry.register(identity, metadata, provenance, session_id))
    }

    /// Poll until a terminal status or the attempt budget runs out.
    async fn await_completion(&self, job_id: &str) -> Result<(Value, Value), RunFailure> {
        let failure = |last_status: Option<JobStatus>, error: FlowError| RunFailure {
            job_id: Some(job_id.to_string()),
            last_status,
            error,
        };

        let mut last_status = None;
        let mut last_error = None;
        let mut seen = false;
        let mut missing = 0u32;

        for attempt in 1..=self.settings.max_poll_attempts {
            match self.status.poll(job_id).await {
                Ok(JobStatus::Completed { outputs, history }) => {
                    self.forget_cancel(job_id);
                    return Ok((outputs, history));
                }
                Ok(JobStatus::Error { detail, history }) => {
                    let error = FlowError::JobError {
                        job_id: job_id.to_string(),
                        detail: detail.clone(),
                    };
                    return Err(failure(Some(JobStatus::Error { detail, history }), error));
                }
                Ok(JobStatus::Cancelled) => {
                    self.forget_cancel(job_id);
                    return Err(failure(Some(JobStatus::Cancelled), FlowError::JobCancelled(job_id.to_string())));
                }
                Ok(JobStatus::NotFound) => {
                    if self.forget_cancel(job_id) {
                        return Err(failure(Some(JobStatus::Cancelled), FlowError::JobCancelled(job_id.to_string())));
                    }
                    if seen {
                        missing += 1;
                        if missing >= self.settings.lost_job_grace.max(1) {
                            let error = FlowError::JobError {
                                job_id: job_id.to_string(),
                                detail: format!("vanished from queue and history after {} polls", missing),
                            };
                            return Err(failure(Some(JobStatus::NotFound), error));
                        }
                    }
                    debug!(job_id, attempt, "Job not visible yet");
                    last_status = Some(JobStatus::NotFound);
                    last_error = None;
                }
                Ok(status) => {
                    seen = true;
                    missing = 0;
                    last_status = Some(status);
                    last_error = None;
                }
                Err(err) if err.is_retriable() => {
                    warn!(job_id, attempt, error = %err, "Poll failed, retrying");
                    last_error = Some(err);
                }
                Err(err) => return Err(failure(last_status, err)),
            }

            if attempt < self.settings.max_poll_attempts {
                tokio::time::sleep(self.settings.poll_interval).await;
            }
        }

        // An engine that stayed unreachable is reported as such, not as a slow job.
        let error = last_error.unwrap_or_else(|| FlowError::JobTimedOut {
            job_id: job_id.to_string(),
            attempts: self.settings.max_poll_attempts,
        });
        Err(failure(last_status, error))
    }

    // -- jobs --

    pub async fn job_status(&self, job_id: &str) -> FlowResult<JobStatus> {
        let status = self.status.poll(job_id).await?;
        if status == JobStatus::NotFound && self.forget_cancel(job_id) {
            return Ok(JobStatus::Cancelled);
        }
        if status.is_terminal() {
            self.forget_cancel(job_id);
        }
        Ok(status)
    }

    pub async fn queue_status(&self) -> FlowResult<QueueStatus> {
        let (running, pending): (Vec<_>, Vec<_>) = self
            .engine
            .queue_snapshot()
            .await?
            .into_iter()
            .partition(|e| e.state == QueueState::Running);
        Ok(QueueStatus { running, pending })
    }

    /// Ask the engine to drop a job. `false` if the engine no longer holds it.
    pub async fn cancel(&self, job_id: &str) -> FlowResult<bool> {
        self.lock_cancelled().insert(job_id.to_string());
        match self.engine.cancel(job_id).await {
            Ok(true) => {
                info!(job_id, "Cancelled job");
                Ok(true)
            }
            Ok(false) => {
                self.forget_cancel(job_id);
                Ok(false)
            }
            Err(err) => {
                self.forget_cancel(job_id);
                Err(err.into())
            }
        }
    }

    fn lock_cancelled(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.cancelled.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn forget_cancel(&self, job_id: &str) -> bool {
        self.lock_cancelled().remove(job_id)
    }

    // -- assets --

    pub fn get_asset(&self, asset_id: &str) -> FlowResult<Arc<AssetRecord>> {
        self.registry
            .get(asset_id)
            .ok_or_else(|| FlowError::AssetNotFoundOrExpired(asset_id.to_string()))
    }

    pub fn list_assets(&self, filter: &AssetFilter) -> Vec<Arc<AssetRecord>> {
        self.registry.list(filter)
    }

    pub fn asset_locator(&self, record: &AssetRecord) -> String {
        locator::compute(&self.settings.engine_url, &record.identity)
    }

    pub fn cleanup_expired(&self) -> usize {
        self.registry.cleanup_expired()
    }

    /// Sweep expired assets every `every` on the current tokio runtime.
    pub fn spawn_cleanup_task(&self, every: Duration) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let every = every.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = registry.cleanup_expired();
                debug!(removed, "Periodic asset sweep");
            }
        })
    }

    pub fn registry(&self) -> &Arc<AssetRegistry> {
        &self.registry
    }
}

/// The first artifact in `outputs`, trying the namespace's preferred output
/// keys before any other list of file entries.
pub fn extract_identity(outputs: &Value, namespace: Namespace) -> Option<StableIdentity> {
    let nodes = outputs.as_object()?;
    for key in namespace.output_keys() {
        if let Some(identity) = nodes.values().find_map(|node| node.get(*key).and_then(first_artifact)) {
            return Some(identity);
        }
    }
    nodes
        .values()
        .filter_map(Value::as_object)
        .flat_map(|node| node.values())
        .find_map(first_artifact)
}

fn first_artifact(list: &Value) -> Option<StableIdentity> {
    list.as_array()?.iter().find_map(|item| {
        let name = item.get("filename")?.as_str()?;
        let field = |k: &str| item.get(k).and_then(Value::as_str);
        Some(StableIdentity::new(
            name,
            field("subfolder").unwrap_or_default(),
            field("type").unwrap_or("output"),
        ))
    })
}
