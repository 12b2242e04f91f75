//! Workflow Catalog - loads and caches workflow definitions
//!
//! `<dir>/<id>.json` holds the template; an optional `<dir>/<id>.meta.json`
//! sidecar carries description, namespace, defaults and constraints.
//! Definitions are immutable; `reload` builds a fresh catalog.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::error::{FlowError, FlowResult};
use crate::templates::{WorkflowDefinition, WorkflowId, WorkflowMeta, PLACEHOLDER_PREFIX};

const META_SUFFIX: &str = ".meta.json";

#[derive(Debug, Default, Clone)]
pub struct WorkflowCatalog {
    dir: Option<PathBuf>,
    workflows: BTreeMap<WorkflowId, Arc<WorkflowDefinition>>,
}

impl WorkflowCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `dir` for workflow templates. Files that fail to parse or analyse
    /// are logged and skipped so one broken template does not hide the rest.
    pub fn load_from_dir(dir: &Path) -> FlowResult<Self> {
        let mut catalog = Self {
            dir: Some(dir.to_path_buf()),
            workflows: BTreeMap::new(),
        };
        if !dir.exists() {
            warn!(dir = %dir.display(), "Workflow directory does not exist");
            return Ok(catalog);
        }

        let entries = fs::read_dir(dir).map_err(|e| FlowError::InvalidWorkflow {
            workflow_id: dir.display().to_string(),
            reason: e.to_string(),
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !file_name.ends_with(".json") || file_name.ends_with(META_SUFFIX) {
                continue;
            }
            let id = file_name.trim_end_matches(".json").to_string();
            match load_definition(dir, &id) {
                Ok(definition) => {
                    catalog.workflows.insert(id, Arc::new(definition));
                }
                Err(err) => warn!(workflow_id = %id, error = %err, "Skipping workflow"),
            }
        }

        let with_params = catalog.workflows.values().filter(|w| !w.parameters.is_empty()).count();
        if with_params == 0 {
            info!(
                dir = %dir.display(),
                "No {} placeholders found; add them to templates to expose parameters",
                PLACEHOLDER_PREFIX
            );
        }
        info!(dir = %dir.display(), workflows = catalog.workflows.len(), "Loaded workflow catalog");
        Ok(catalog)
    }

    /// Rescan the same directory. A catalog built in memory reloads to itself.
    pub fn reload(&self) -> FlowResult<Self> {
        match &self.dir {
            Some(dir) => Self::load_from_dir(dir),
            None => Ok(self.clone()),
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<WorkflowDefinition>> {
        self.workflows.get(id).cloned()
    }

    pub fn list(&self) -> Vec<Arc<WorkflowDefinition>> {
        self.workflows.values().cloned().collect()
    }

    pub fn register(&mut self, definition: WorkflowDefinition) {
        self.workflows.insert(definition.id.clone(), Arc::new(definition));
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }
}

fn load_definition(dir: &Path, id: &str) -> FlowResult<WorkflowDefinition> {
    let invalid = |reason: String| FlowError::InvalidWorkflow {
        workflow_id: id.to_string(),
        reason,
    };

    let content = fs::read_to_string(dir.join(format!("{}.json", id))).map_err(|e| invalid(e.to_string()))?;
    let template: Value = serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?;

    let meta_path = dir.join(format!("{}{}", id, META_SUFFIX));
    let meta = if meta_path.exists() {
        let raw = fs::read_to_string(&meta_path).map_err(|e| invalid(e.to_string()))?;
        serde_json::from_str::<WorkflowMeta>(&raw).map_err(|e| invalid(format!("sidecar: {}", e)))?
    } else {
        WorkflowMeta::default()
    };

    WorkflowDefinition::build(id, template, meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::Namespace;
    use serde_json::json;

    fn write(dir: &Path, name: &str, value: &Value) {
        fs::write(dir.join(name), serde_json::to_string(value).unwrap()).unwrap();
    }

    #[test]
    fn test_load_with_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "generate_song.json", &json!({
            "1": {"class_type": "TextEncodeAceStepAudio", "inputs": {"tags": "PARAM_TAGS", "seconds": "PARAM_INT_SECONDS"}}
        }));
        write(dir.path(), "generate_song.meta.json", &json!({
            "description": "Make a song",
            "defaults": {"seconds": 30},
            "constraints": {"seconds": {"min": 1, "max": 240}},
            "required": ["tags"]
        }));

        let catalog = WorkflowCatalog::load_from_dir(dir.path()).unwrap();
        assert_eq!(catalog.len(), 1);
        let wf = catalog.get("generate_song").unwrap();
        assert_eq!(wf.namespace, Namespace::Audio);
        assert_eq!(wf.description, "Make a song");
        assert!(wf.parameter("tags").unwrap().required);
        assert_eq!(wf.defaults["seconds"], json!(30));
        assert_eq!(wf.constraints["seconds"].max, Some(240.0));
    }

    #[test]
    fn test_broken_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        write(dir.path(), "conflict.json", &json!({
            "1": {"inputs": {"a": "PARAM_INT_X", "b": "PARAM_BOOL_X"}}
        }));
        write(dir.path(), "ok.json", &json!({"1": {"inputs": {"text": "PARAM_PROMPT"}}}));
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let catalog = WorkflowCatalog::load_from_dir(dir.path()).unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(catalog.get("ok").is_some());
    }

    #[test]
    fn test_reload_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "wf.json", &json!({"1": {"class_type": "A", "inputs": {"text": "PARAM_PROMPT"}}}));
        let catalog = WorkflowCatalog::load_from_dir(dir.path()).unwrap();
        let before = catalog.get("wf").unwrap();

        write(dir.path(), "wf.json", &json!({"1": {"class_type": "B", "inputs": {"text": "PARAM_PROMPT"}}}));
        assert_eq!(catalog.get("wf").unwrap().template["1"]["class_type"], "A");

        let reloaded = catalog.reload().unwrap();
        assert_eq!(reloaded.get("wf").unwrap().template["1"]["class_type"], "B");
        assert_eq!(before.template["1"]["class_type"], "A");
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = WorkflowCatalog::load_from_dir(&dir.path().join("nope")).unwrap();
        assert!(catalog.is_empty());
    }
}
