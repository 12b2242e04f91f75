//! Defaults Authority - Tiered Parameter Resolution
//!
//! Defines where a parameter value comes from, to prevent conditional sprawl.
//! Precedence: explicit > runtime > persisted > environment > (workflow) > hardcoded.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::{FlowError, FlowResult};
use crate::templates::WorkflowDefinition;

pub const ENV_DEFAULT_PREFIX: &str = "RENDERFLOW_DEFAULT_";

/// DefaultSource records which tier produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultSource {
    /// Supplied by the caller
    Explicit,
    /// Session-mutable, in memory
    Runtime,
    /// Loaded from the defaults file
    Persisted,
    /// Environment variables
    Environment,
    /// The workflow's own sidecar defaults
    Workflow,
    /// Built into the engine
    Hardcoded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolved {
    pub value: Value,
    pub source: DefaultSource,
}

type NamespaceMap = BTreeMap<String, BTreeMap<String, Value>>;

fn lookup(map: &NamespaceMap, namespace: &str, key: &str) -> Option<Value> {
    map.get(namespace).and_then(|keys| keys.get(key)).cloned()
}

/// In-memory tier, mutable for the life of the process.
///
/// Writers replace whole values under the write lock, so readers observe
/// either the old or the new value.
#[derive(Debug, Default)]
pub struct RuntimeTier {
    values: RwLock<NamespaceMap>,
}

impl RuntimeTier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, namespace: &str, key: &str) -> Option<Value> {
        let guard = self.values.read().unwrap_or_else(|e| e.into_inner());
        lookup(&guard, namespace, key)
    }

    pub fn set(&self, namespace: &str, key: &str, value: Value) {
        let mut guard = self.values.write().unwrap_or_else(|e| e.into_inner());
        guard
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    pub fn clear(&self, namespace: &str, key: &str) -> Option<Value> {
        let mut guard = self.values.write().unwrap_or_else(|e| e.into_inner());
        guard.get_mut(namespace).and_then(|keys| keys.remove(key))
    }

    pub fn snapshot(&self) -> NamespaceMap {
        self.values.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// File-backed tier: `{ "<namespace>": { "<key>": value } }`.
#[derive(Debug, Default)]
pub struct PersistedTier {
    path: Option<PathBuf>,
    values: RwLock<NamespaceMap>,
}

impl PersistedTier {
    /// A tier with no backing file.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load from `path`. A missing file is an empty tier, not an error.
    pub fn load(path: impl Into<PathBuf>) -> FlowResult<Self> {
        let path = path.into();
        let values = if path.exists() {
            let content = fs::read_to_string(&path)
                .map_err(|e| FlowError::Persistence(format!("{}: {}", path.display(), e)))?;
            serde_json::from_str(&content)
                .map_err(|e| FlowError::Persistence(format!("{}: {}", path.display(), e)))?
        } else {
            NamespaceMap::new()
        };
        debug!(path = %path.display(), namespaces = values.len(), "Loaded persisted defaults");
        Ok(Self { path: Some(path), values: RwLock::new(values) })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, namespace: &str, key: &str) -> Option<Value> {
        let guard = self.values.read().unwrap_or_else(|e| e.into_inner());
        lookup(&guard, namespace, key)
    }

    /// Update the in-memory copy; call `save` to write it back.
    pub fn set(&self, namespace: &str, key: &str, value: Value) {
        let mut guard = self.values.write().unwrap_or_else(|e| e.into_inner());
        guard
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    pub fn save(&self) -> FlowResult<()> {
        let Some(path) = &self.path else {
            return Err(FlowError::Persistence("persisted defaults have no backing file".into()));
        };
        let content = {
            let guard = self.values.read().unwrap_or_else(|e| e.into_inner());
            serde_json::to_string_pretty(&*guard).map_err(|e| FlowError::Persistence(e.to_string()))?
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| FlowError::Persistence(e.to_string()))?;
        }
        fs::write(path, content).map_err(|e| FlowError::Persistence(format!("{}: {}", path.display(), e)))?;
        info!(path = %path.display(), "Saved persisted defaults");
        Ok(())
    }
}

/// Snapshot of `RENDERFLOW_DEFAULT_<NAMESPACE>_<KEY>` variables.
///
/// Values are parsed as JSON when possible (`20`, `7.5`, `true`), otherwise
/// kept as strings.
#[derive(Debug, Default, Clone)]
pub struct EnvironmentTier {
    values: HashMap<String, Value>,
}

impl EnvironmentTier {
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let values = vars
            .into_iter()
            .filter_map(|(k, v)| {
                let suffix = k.as_ref().strip_prefix(ENV_DEFAULT_PREFIX)?;
                let raw = v.as_ref();
                let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
                Some((suffix.to_uppercase(), value))
            })
            .collect();
        Self { values }
    }

    pub fn get(&self, namespace: &str, key: &str) -> Option<Value> {
        let var = format!("{}_{}", namespace, key).to_uppercase();
        self.values.get(&var).cloned()
    }
}

/// Built-in per-namespace defaults.
#[derive(Debug, Clone)]
pub struct HardcodedTier {
    values: NamespaceMap,
}

impl HardcodedTier {
    pub fn get(&self, namespace: &str, key: &str) -> Option<Value> {
        lookup(&self.values, namespace, key)
    }
}

impl Default for HardcodedTier {
    fn default() -> Self {
        let mut values = NamespaceMap::new();
        let mut insert = |ns: &str, entries: Value| {
            if let Value::Object(map) = entries {
                values.insert(ns.to_string(), map.into_iter().collect());
            }
        };
        insert("image", json!({
            "width": 512,
            "height": 512,
            "steps": 20,
            "cfg": 8.0,
            "sampler_name": "euler",
            "scheduler": "normal",
            "denoise": 1.0,
            "negative_prompt": "text, watermark"
        }));
        insert("audio", json!({
            "steps": 50,
            "cfg": 5.0,
            "seconds": 60,
            "lyrics_strength": 0.99,
            "sampler_name": "euler",
            "scheduler": "simple",
            "denoise": 1.0
        }));
        insert("video", json!({
            "width": 1280,
            "height": 720,
            "steps": 20,
            "cfg": 8.0,
            "duration": 5,
            "fps": 16,
            "sampler_name": "euler",
            "scheduler": "normal",
            "denoise": 1.0
        }));
        Self { values }
    }
}

/// Resolves parameter values across tiers. Holds no state of its own beyond
/// the tiers it was handed.
#[derive(Debug, Default)]
pub struct DefaultsResolver {
    runtime: RuntimeTier,
    persisted: PersistedTier,
    environment: EnvironmentTier,
    hardcoded: HardcodedTier,
}

impl DefaultsResolver {
    pub fn new(
        runtime: RuntimeTier,
        persisted: PersistedTier,
        environment: EnvironmentTier,
        hardcoded: HardcodedTier,
    ) -> Self {
        Self { runtime, persisted, environment, hardcoded }
    }

    /// First defined value in precedence order, or `None`.
    pub fn resolve(&self, namespace: &str, key: &str, explicit: Option<&Value>) -> Option<Value> {
        self.resolve_with_source(namespace, key, explicit).map(|r| r.value)
    }

    pub fn resolve_with_source(&self, namespace: &str, key: &str, explicit: Option<&Value>) -> Option<Resolved> {
        self.resolve_tiers(namespace, key, explicit, None)
    }

    /// Like `resolve_with_source`, with the workflow's sidecar defaults
    /// consulted just before the hardcoded tier.
    pub fn resolve_for_workflow(
        &self,
        definition: &WorkflowDefinition,
        key: &str,
        explicit: Option<&Value>,
    ) -> Option<Resolved> {
        self.resolve_tiers(definition.namespace.as_str(), key, explicit, definition.defaults.get(key))
    }

    fn resolve_tiers(
        &self,
        namespace: &str,
        key: &str,
        explicit: Option<&Value>,
        workflow: Option<&Value>,
    ) -> Option<Resolved> {
        let found = |value: Value, source| Some(Resolved { value, source });

        if let Some(v) = explicit.filter(|v| !v.is_null()) {
            return found(v.clone(), DefaultSource::Explicit);
        }
        if let Some(v) = self.runtime.get(namespace, key) {
            return found(v, DefaultSource::Runtime);
        }
        if let Some(v) = self.persisted.get(namespace, key) {
            return found(v, DefaultSource::Persisted);
        }
        if let Some(v) = self.environment.get(namespace, key) {
            return found(v, DefaultSource::Environment);
        }
        if let Some(v) = workflow.filter(|v| !v.is_null()) {
            return found(v.clone(), DefaultSource::Workflow);
        }
        self.hardcoded
            .get(namespace, key)
            .and_then(|v| found(v, DefaultSource::Hardcoded))
    }

    pub fn runtime(&self) -> &RuntimeTier {
        &self.runtime
    }

    pub fn persisted(&self) -> &PersistedTier {
        &self.persisted
    }
}
