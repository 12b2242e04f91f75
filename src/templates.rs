//! Template System - Placeholder Contracts
//!
//! Any string leaf of a workflow graph may carry a `PARAM_[TYPE_]NAME` token.
//! Extraction turns the tokens into a typed schema with recorded bindings;
//! rendering substitutes coerced values at those bindings and nowhere else.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FlowError, FlowResult};
use crate::hashing::compute_graph_hash;
use crate::validation::{ConstraintValidator, NumericConstraint};

pub type WorkflowId = String;

/// Parameter name → value, as supplied by callers or resolved from defaults.
pub type ParamValues = Map<String, Value>;

pub const PLACEHOLDER_PREFIX: &str = "PARAM_";

/// Parameters a workflow cannot run without, whatever its sidecar says.
pub const REQUIRED_BY_CONVENTION: &[&str] = &["prompt"];

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bPARAM_(?:(STR|STRING|TEXT|INT|FLOAT|BOOL)_)?([A-Z0-9]+(?:_[A-Z0-9]+)*)")
        .expect("placeholder token pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Int,
    Float,
    Bool,
}

impl ParameterType {
    fn from_hint(hint: Option<&str>) -> Self {
        match hint {
            Some("INT") => Self::Int,
            Some("FLOAT") => Self::Float,
            Some("BOOL") => Self::Bool,
            _ => Self::String,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int | Self::Float)
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
        })
    }
}

/// Media family of a workflow. Picks the defaults namespace and which output
/// keys identify the produced artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    #[default]
    Image,
    Audio,
    Video,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }

    /// Guess from the workflow id, then from the output node types.
    pub fn infer(workflow_id: &str, template: &Value) -> Self {
        let id = workflow_id.to_lowercase();
        if id.contains("video") {
            return Self::Video;
        }
        if ["audio", "song", "music", "sfx"].iter().any(|k| id.contains(k)) {
            return Self::Audio;
        }

        let class_types: Vec<&str> = template
            .as_object()
            .map(|nodes| {
                nodes
                    .values()
                    .filter_map(|n| n.get("class_type").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default();
        if class_types.iter().any(|c| c.contains("SaveVideo") || c.contains("VideoCombine")) {
            Self::Video
        } else if class_types.iter().any(|c| c.contains("SaveAudio")) {
            Self::Audio
        } else {
            Self::Image
        }
    }

    /// Output keys checked, in order, when locating the produced artifact.
    pub fn output_keys(&self) -> &'static [&'static str] {
        match self {
            Self::Image => &["images", "gifs"],
            Self::Audio => &["audio", "audios", "files"],
            Self::Video => &["videos", "gifs", "images"],
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One placeholder occurrence inside the template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Binding {
    /// RFC 6901 pointer to the string leaf.
    pub pointer: String,
    /// The raw token, e.g. `PARAM_INT_STEPS`.
    pub token: String,
    /// The token is the entire leaf, so the typed value replaces it.
    pub whole_leaf: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParameterSpec {
    pub name: String,
    pub param_type: ParameterType,
    pub required: bool,
    pub bindings: Vec<Binding>,
}

/// Optional sidecar metadata shipped next to a template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowMeta {
    pub description: Option<String>,
    pub namespace: Option<Namespace>,
    pub defaults: ParamValues,
    pub constraints: BTreeMap<String, NumericConstraint>,
    pub required: Vec<String>,
}

/// An immutable, fully analysed workflow.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowDefinition {
    pub id: WorkflowId,
    pub namespace: Namespace,
    pub description: String,
    pub template: Value,
    pub parameters: Vec<ParameterSpec>,
    pub defaults: ParamValues,
    pub constraints: BTreeMap<String, NumericConstraint>,
}

impl WorkflowDefinition {
    pub fn build(id: impl Into<WorkflowId>, template: Value, meta: WorkflowMeta) -> FlowResult<Self> {
        let id = id.into();
        let invalid = |reason: String| FlowError::InvalidWorkflow { workflow_id: id.clone(), reason };

        if !template.is_object() {
            return Err(invalid("template root must be a JSON object of nodes".into()));
        }

        let mut parameters = extract_parameters(&template)?;
        for name in &meta.required {
            let spec = parameters
                .iter_mut()
                .find(|p| &p.name == name)
                .ok_or_else(|| invalid(format!("required parameter '{}' has no placeholder", name)))?;
            spec.required = true;
        }
        for name in meta.defaults.keys() {
            if !parameters.iter().any(|p| &p.name == name) {
                return Err(invalid(format!("default for undeclared parameter '{}'", name)));
            }
        }
        for name in meta.constraints.keys() {
            match parameters.iter().find(|p| &p.name == name) {
                Some(p) if p.param_type.is_numeric() => {}
                Some(p) => return Err(invalid(format!("constraint on {} parameter '{}'", p.param_type, name))),
                None => return Err(invalid(format!("constraint for undeclared parameter '{}'", name))),
            }
        }

        Ok(Self {
            namespace: meta.namespace.unwrap_or_else(|| Namespace::infer(&id, &template)),
            description: meta
                .description
                .unwrap_or_else(|| format!("Run the '{}' workflow", id)),
            id,
            template,
            parameters,
            defaults: meta.defaults,
            constraints: meta.constraints,
        })
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// A concrete graph ready for submission. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenderedGraph {
    graph: Value,
    hash: String,
}

impl RenderedGraph {
    pub fn new(graph: Value) -> Self {
        // Hashing a Value cannot fail: its keys are already strings.
        let hash = compute_graph_hash(&graph).unwrap_or_default();
        Self { graph, hash }
    }

    pub fn graph(&self) -> &Value {
        &self.graph
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.graph).unwrap_or_default()
    }
}

/// Scan every string leaf for placeholder tokens.
///
/// Parameters come back in order of first appearance. Object keys are visited
/// in sorted order, so the order is stable for a given template.
pub fn extract_parameters(template: &Value) -> FlowResult<Vec<ParameterSpec>> {
    let mut specs = Vec::new();
    let mut index = HashMap::new();
    let mut pointer = String::new();
    walk(template, &mut pointer, &mut specs, &mut index)?;
    Ok(specs)
}

fn walk(
    value: &Value,
    pointer: &mut String,
    specs: &mut Vec<ParameterSpec>,
    index: &mut HashMap<String, usize>,
) -> FlowResult<()> {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let len = pointer.len();
                pointer.push('/');
                pointer.push_str(&escape_pointer_token(key));
                walk(child, pointer, specs, index)?;
                pointer.truncate(len);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                let len = pointer.len();
                pointer.push('/');
                pointer.push_str(&i.to_string());
                walk(child, pointer, specs, index)?;
                pointer.truncate(len);
            }
        }
        Value::String(text) => scan_leaf(text, pointer, specs, index)?,
        _ => {}
    }
    Ok(())
}

fn scan_leaf(
    text: &str,
    pointer: &str,
    specs: &mut Vec<ParameterSpec>,
    index: &mut HashMap<String, usize>,
) -> FlowResult<()> {
    let matches: Vec<Captures> = TOKEN_RE.captures_iter(text).collect();
    let whole_leaf = matches.len() == 1 && matches[0].get(0).map(|m| m.as_str()) == Some(text);

    for caps in &matches {
        let token = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        let name = caps.get(2).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
        let param_type = ParameterType::from_hint(caps.get(1).map(|m| m.as_str()));
        let binding = Binding {
            pointer: pointer.to_string(),
            token: token.to_string(),
            whole_leaf,
        };

        match index.get(&name) {
            Some(&i) => {
                let spec = &mut specs[i];
                if spec.param_type != param_type {
                    return Err(FlowError::DuplicateParameterDefinition {
                        name,
                        first: spec.param_type,
                        second: param_type,
                        pointer: pointer.to_string(),
                    });
                }
                if !spec.bindings.iter().any(|b| b.pointer == binding.pointer) {
                    spec.bindings.push(binding);
                }
            }
            None => {
                index.insert(name.clone(), specs.len());
                specs.push(ParameterSpec {
                    required: REQUIRED_BY_CONVENTION.contains(&name.as_str()),
                    name,
                    param_type,
                    bindings: vec![binding],
                });
            }
        }
    }
    Ok(())
}

/// Coerce a caller value to the declared type.
///
/// JSON-RPC style callers often send numbers and booleans as strings.
pub fn coerce_value(name: &str, expected: ParameterType, value: &Value) -> FlowResult<Value> {
    let fail = || FlowError::TypeCoercionFailure {
        name: name.to_string(),
        expected,
        value: value.to_string(),
    };

    match (expected, value) {
        (ParameterType::String, Value::String(_)) => Ok(value.clone()),
        (ParameterType::String, Value::Number(n)) => Ok(Value::String(n.to_string())),
        (ParameterType::String, Value::Bool(b)) => Ok(Value::String(b.to_string())),

        (ParameterType::Int, Value::Number(n)) => {
            if n.is_i64() || n.is_u64() {
                return Ok(value.clone());
            }
            n.as_f64().and_then(whole_number).map(Value::from).ok_or_else(fail)
        }
        (ParameterType::Int, Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>()
                .map(Value::from)
                .or_else(|_| s.parse::<u64>().map(Value::from))
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(whole_number).map(Value::from))
                .ok_or_else(fail)
        }

        (ParameterType::Float, Value::Number(n)) => n.as_f64().map(Value::from).ok_or_else(fail),
        (ParameterType::Float, Value::String(s)) => match s.trim().parse::<f64>() {
            Ok(f) if f.is_finite() => Ok(Value::from(f)),
            _ => Err(fail()),
        },

        (ParameterType::Bool, Value::Bool(_)) => Ok(value.clone()),
        (ParameterType::Bool, Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(Value::Bool(true)),
            "false" | "no" | "off" | "0" => Ok(Value::Bool(false)),
            _ => Err(fail()),
        },
        (ParameterType::Bool, Value::Number(n)) => match n.as_i64() {
            Some(0) => Ok(Value::Bool(false)),
            Some(1) => Ok(Value::Bool(true)),
            _ => Err(fail()),
        },

        _ => Err(fail()),
    }
}

fn whole_number(f: f64) -> Option<i64> {
    (f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64).then_some(f as i64)
}

/// Substitute resolved values into the definition's template.
pub fn render(definition: &WorkflowDefinition, values: &ParamValues) -> FlowResult<RenderedGraph> {
    let mut coerced: HashMap<&str, Option<Value>> = HashMap::new();
    for spec in &definition.parameters {
        let value = match values.get(&spec.name).filter(|v| !v.is_null()) {
            Some(raw) => Some(coerce_value(&spec.name, spec.param_type, raw)?),
            None if spec.required => {
                return Err(FlowError::MissingRequiredParameter {
                    workflow_id: definition.id.clone(),
                    name: spec.name.clone(),
                })
            }
            None => None,
        };
        coerced.insert(spec.name.as_str(), value);
    }

    let mut graph = definition.template.clone();
    let mut embedded_done: HashSet<&str> = HashSet::new();

    for spec in &definition.parameters {
        let value = coerced.get(spec.name.as_str()).cloned().flatten();
        for binding in &spec.bindings {
            if binding.whole_leaf {
                match value.clone() {
                    Some(v) => {
                        if let Some(slot) = graph.pointer_mut(&binding.pointer) {
                            *slot = v;
                        }
                    }
                    None => remove_leaf(&mut graph, &binding.pointer),
                }
            } else if embedded_done.insert(binding.pointer.as_str()) {
                let original = definition
                    .template
                    .pointer(&binding.pointer)
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let replaced = TOKEN_RE.replace_all(original, |caps: &Captures| {
                    let name = caps.get(2).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
                    match coerced.get(name.as_str()).cloned().flatten() {
                        Some(Value::String(s)) => s,
                        Some(other) => other.to_string(),
                        None => String::new(),
                    }
                });
                if let Some(slot) = graph.pointer_mut(&binding.pointer) {
                    *slot = Value::String(replaced.into_owned());
                }
            }
        }
    }

    Ok(RenderedGraph::new(graph))
}

/// Check caller-supplied values against declared parameters and constraints.
pub fn validate_overrides(definition: &WorkflowDefinition, overrides: &ParamValues) -> FlowResult<()> {
    let validator = ConstraintValidator::new();
    for (name, value) in overrides {
        let spec = definition
            .parameter(name)
            .ok_or_else(|| FlowError::UnknownParameterOverride {
                workflow_id: definition.id.clone(),
                name: name.clone(),
            })?;
        if value.is_null() || !spec.param_type.is_numeric() {
            continue;
        }
        let Some(constraint) = definition.constraints.get(name) else {
            continue;
        };
        let numeric = coerce_value(name, spec.param_type, value)?
            .as_f64()
            .unwrap_or_default();
        let result = validator.validate(name, numeric, constraint);
        if !result.valid {
            return Err(FlowError::ConstraintViolation {
                name: name.clone(),
                message: result.summary(),
            });
        }
    }
    Ok(())
}

/// Re-render an existing workflow with constrained overrides.
///
/// Precedence: workflow defaults < `base` (e.g. the values of a previous run)
/// < `overrides`.
pub fn apply_overrides(
    definition: &WorkflowDefinition,
    base: &ParamValues,
    overrides: &ParamValues,
) -> FlowResult<RenderedGraph> {
    validate_overrides(definition, overrides)?;

    let mut merged = definition.defaults.clone();
    merged.extend(base.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged.retain(|name, _| definition.parameter(name).is_some());

    render(definition, &merged)
}

fn remove_leaf(graph: &mut Value, pointer: &str) {
    let Some((parent, last)) = pointer.rsplit_once('/') else {
        return;
    };
    match graph.pointer_mut(parent) {
        Some(Value::Object(map)) => {
            map.remove(&unescape_pointer_token(last));
        }
        Some(Value::Array(items)) => {
            if let Some(slot) = last.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                *slot = Value::Null;
            }
        }
        _ => {}
    }
}

fn escape_pointer_token(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

fn unescape_pointer_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sdxl_template() -> Value {
        json!({
            "3": {
                "class_type": "KSampler",
                "inputs": {
                    "seed": "PARAM_INT_SEED",
                    "steps": "PARAM_INT_STEPS",
                    "cfg": "PARAM_FLOAT_CFG",
                    "denoise": 1.0
                }
            },
            "6": {
                "class_type": "CLIPTextEncode",
                "inputs": {"text": "PARAM_PROMPT"}
            },
            "7": {
                "class_type": "CLIPTextEncode",
                "inputs": {"text": "PARAM_NEGATIVE_PROMPT"}
            },
            "9": {
                "class_type": "SaveImage",
                "inputs": {"filename_prefix": "PARAM_STR_PREFIX_run", "tags": ["PARAM_PROMPT", "fixed"]}
            }
        })
    }

    fn definition() -> WorkflowDefinition {
        WorkflowDefinition::build("generate_image", sdxl_template(), WorkflowMeta::default()).unwrap()
    }

    fn values(v: Value) -> ParamValues {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_extract_types_and_bindings() {
        let specs = extract_parameters(&sdxl_template()).unwrap();
        let names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["cfg", "seed", "steps", "prompt", "negative_prompt", "prefix"]);

        let prompt = specs.iter().find(|s| s.name == "prompt").unwrap();
        assert_eq!(prompt.param_type, ParameterType::String);
        assert!(prompt.required);
        assert_eq!(prompt.bindings.len(), 2);
        assert_eq!(prompt.bindings[0].pointer, "/6/inputs/text");
        assert_eq!(prompt.bindings[1].pointer, "/9/inputs/tags/0");

        let cfg = specs.iter().find(|s| s.name == "cfg").unwrap();
        assert_eq!(cfg.param_type, ParameterType::Float);
        assert!(!cfg.required);
    }

    #[test]
    fn test_conflicting_types_rejected() {
        let template = json!({
            "1": {"inputs": {"a": "PARAM_INT_SIZE"}},
            "2": {"inputs": {"b": "PARAM_FLOAT_SIZE"}}
        });
        let err = extract_parameters(&template).unwrap_err();
        assert!(matches!(err, FlowError::DuplicateParameterDefinition { ref name, .. } if name == "size"));
    }

    #[test]
    fn test_embedded_tokens_are_not_whole_leaf() {
        let template = json!({"1": {"inputs": {"text": "a photo of PARAM_SUBJECT, PARAM_INT_COUNT times"}}});
        let specs = extract_parameters(&template).unwrap();
        assert_eq!(specs.len(), 2);
        assert!(specs.iter().all(|s| !s.bindings[0].whole_leaf));
    }

    #[test]
    fn test_render_coerces_string_inputs() {
        let graph = render(
            &definition(),
            &values(json!({
                "prompt": "a red fox",
                "seed": "42",
                "steps": 20.0,
                "cfg": "7.5",
                "negative_prompt": "blurry",
                "prefix": 7
            })),
        )
        .unwrap();
        let g = graph.graph();
        assert_eq!(g["3"]["inputs"]["seed"], json!(42));
        assert_eq!(g["3"]["inputs"]["steps"], json!(20));
        assert_eq!(g["3"]["inputs"]["cfg"], json!(7.5));
        assert_eq!(g["6"]["inputs"]["text"], json!("a red fox"));
        assert_eq!(g["9"]["inputs"]["tags"], json!(["a red fox", "fixed"]));
        assert_eq!(g["9"]["inputs"]["filename_prefix"], json!("7_run"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let v = values(json!({"prompt": "x", "seed": 1, "steps": 2, "cfg": 3.0}));
        let a = render(&definition(), &v).unwrap();
        let b = render(&definition(), &v).unwrap();
        assert_eq!(a.to_bytes(), b.to_bytes());
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn test_missing_required_fails() {
        let err = render(&definition(), &values(json!({"seed": 1}))).unwrap_err();
        assert_eq!(
            err,
            FlowError::MissingRequiredParameter { workflow_id: "generate_image".into(), name: "prompt".into() }
        );
    }

    #[test]
    fn test_missing_optional_drops_input() {
        let graph = render(&definition(), &values(json!({"prompt": "x"}))).unwrap();
        let inputs = &graph.graph()["3"]["inputs"];
        assert!(inputs.get("steps").is_none());
        assert_eq!(inputs["denoise"], json!(1.0));
    }

    #[test]
    fn test_bad_coercion_fails() {
        let err = render(&definition(), &values(json!({"prompt": "x", "steps": "many"}))).unwrap_err();
        assert!(matches!(err, FlowError::TypeCoercionFailure { expected: ParameterType::Int, .. }));
    }

    #[test]
    fn test_bool_coercion() {
        assert_eq!(coerce_value("b", ParameterType::Bool, &json!("Yes")).unwrap(), json!(true));
        assert_eq!(coerce_value("b", ParameterType::Bool, &json!(0)).unwrap(), json!(false));
        assert!(coerce_value("b", ParameterType::Bool, &json!(2)).is_err());
        assert!(coerce_value("i", ParameterType::Int, &json!(2.5)).is_err());
        assert!(coerce_value("f", ParameterType::Float, &json!("NaN")).is_err());
    }

    #[test]
    fn test_int_accepts_whole_decimal_strings() {
        assert_eq!(coerce_value("i", ParameterType::Int, &json!("20.0")).unwrap(), json!(20));
        assert_eq!(coerce_value("i", ParameterType::Int, &json!(" -3.0 ")).unwrap(), json!(-3));
        assert_eq!(coerce_value("i", ParameterType::Int, &json!("1e3")).unwrap(), json!(1000));
        assert!(coerce_value("i", ParameterType::Int, &json!("20.5")).is_err());
        assert!(coerce_value("i", ParameterType::Int, &json!("inf")).is_err());

        let graph = render(&definition(), &values(json!({"prompt": "x", "steps": "20.0"}))).unwrap();
        assert_eq!(graph.graph()["3"]["inputs"]["steps"], json!(20));
    }

    #[test]
    fn test_apply_overrides_checks_names_and_constraints() {
        let mut meta = WorkflowMeta::default();
        meta.constraints.insert(
            "steps".into(),
            NumericConstraint { min: Some(1.0), max: Some(50.0), step: Some(1.0) },
        );
        meta.defaults.insert("steps".into(), json!(20));
        let def = WorkflowDefinition::build("generate_image", sdxl_template(), meta).unwrap();
        let base = values(json!({"prompt": "a cat", "seed": 5}));

        let err = apply_overrides(&def, &base, &values(json!({"sampler": "euler"}))).unwrap_err();
        assert!(matches!(err, FlowError::UnknownParameterOverride { .. }));

        let err = apply_overrides(&def, &base, &values(json!({"steps": "80"}))).unwrap_err();
        assert!(matches!(err, FlowError::ConstraintViolation { ref name, .. } if name == "steps"));

        let ok = apply_overrides(&def, &base, &values(json!({"steps": 30}))).unwrap();
        assert_eq!(ok.graph()["3"]["inputs"]["steps"], json!(30));
        assert_eq!(ok.graph()["3"]["inputs"]["seed"], json!(5));

        let kept_default = apply_overrides(&def, &base, &ParamValues::new()).unwrap();
        assert_eq!(kept_default.graph()["3"]["inputs"]["steps"], json!(20));
    }

    #[test]
    fn test_meta_rejects_undeclared_names() {
        let mut meta = WorkflowMeta::default();
        meta.required.push("width".into());
        let err = WorkflowDefinition::build("wf", sdxl_template(), meta).unwrap_err();
        assert!(matches!(err, FlowError::InvalidWorkflow { .. }));

        let mut meta = WorkflowMeta::default();
        meta.constraints.insert("prompt".into(), NumericConstraint::default());
        assert!(WorkflowDefinition::build("wf", sdxl_template(), meta).is_err());
    }

    #[test]
    fn test_namespace_inference() {
        assert_eq!(Namespace::infer("generate_song", &json!({})), Namespace::Audio);
        assert_eq!(Namespace::infer("my_video_wf", &json!({})), Namespace::Video);
        let sfx = json!({"1": {"class_type": "SaveAudioMP3", "inputs": {}}});
        assert_eq!(Namespace::infer("custom", &sfx), Namespace::Audio);
        assert_eq!(Namespace::infer("generate_image", &sdxl_template()), Namespace::Image);
    }

    #[test]
    fn test_pointer_escaping_round_trips_odd_keys() {
        let template = json!({"a/b": {"c~d": "PARAM_BOOL_FLAG"}});
        let def = WorkflowDefinition::build("wf", template, WorkflowMeta::default()).unwrap();
        assert_eq!(def.parameters[0].bindings[0].pointer, "/a~1b/c~0d");
        let g = render(&def, &values(json!({"flag": "off"}))).unwrap();
        assert_eq!(g.graph()["a/b"]["c~d"], json!(false));
        let g = render(&def, &ParamValues::new()).unwrap();
        assert!(g.graph()["a/b"].get("c~d").is_none());
    }
}
