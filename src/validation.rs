//! Validation System - Numeric Parameter Constraints
//!
//! Rules produce structured violations.
//! The template engine maps violations to `ConstraintViolation` errors.

use serde::{Deserialize, Serialize};

/// Tolerance when checking that a value lies on a step grid.
const STEP_EPSILON: f64 = 1e-9;

/// Declared bounds for one numeric parameter.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NumericConstraint {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub step: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConstraintViolationDetail {
    pub rule: String,
    pub parameter: String,
    pub message: String,
    pub expected: Option<String>,
    pub actual: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub violations: Vec<ConstraintViolationDetail>,
}

impl ValidationResult {
    pub fn summary(&self) -> String {
        self.violations
            .iter()
            .map(|v| match &v.expected {
                Some(expected) => format!("{}: {} (expected {}, got {})", v.rule, v.message, expected, v.actual),
                None => format!("{}: {}", v.rule, v.message),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Constraint rule trait - produces violations
pub trait ConstraintRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, parameter: &str, value: f64, constraint: &NumericConstraint) -> Option<ConstraintViolationDetail>;
}

// --- Concrete Rules ---

pub struct MinRule;

impl ConstraintRule for MinRule {
    fn name(&self) -> &'static str { "min" }

    fn check(&self, parameter: &str, value: f64, constraint: &NumericConstraint) -> Option<ConstraintViolationDetail> {
        let min = constraint.min?;
        (value < min).then(|| ConstraintViolationDetail {
            rule: self.name().to_string(),
            parameter: parameter.to_string(),
            message: "Value below minimum".to_string(),
            expected: Some(format!(">= {}", min)),
            actual: value.to_string(),
        })
    }
}

pub struct MaxRule;

impl ConstraintRule for MaxRule {
    fn name(&self) -> &'static str { "max" }

    fn check(&self, parameter: &str, value: f64, constraint: &NumericConstraint) -> Option<ConstraintViolationDetail> {
        let max = constraint.max?;
        (value > max).then(|| ConstraintViolationDetail {
            rule: self.name().to_string(),
            parameter: parameter.to_string(),
            message: "Value above maximum".to_string(),
            expected: Some(format!("<= {}", max)),
            actual: value.to_string(),
        })
    }
}

/// Values must sit on the grid `min + k * step` (grid origin 0 without a min).
pub struct StepRule;

impl ConstraintRule for StepRule {
    fn name(&self) -> &'static str { "step" }

    fn check(&self, parameter: &str, value: f64, constraint: &NumericConstraint) -> Option<ConstraintViolationDetail> {
        let step = constraint.step.filter(|s| *s > 0.0)?;
        let origin = constraint.min.unwrap_or(0.0);
        let k = (value - origin) / step;
        let off_grid = (k - k.round()).abs() > STEP_EPSILON * k.abs().max(1.0);
        off_grid.then(|| ConstraintViolationDetail {
            rule: self.name().to_string(),
            parameter: parameter.to_string(),
            message: "Value not on step grid".to_string(),
            expected: Some(format!("{} + k * {}", origin, step)),
            actual: value.to_string(),
        })
    }
}

/// Validator runs every rule against a value
pub struct ConstraintValidator {
    rules: Vec<Box<dyn ConstraintRule>>,
}

impl ConstraintValidator {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(MinRule),
                Box::new(MaxRule),
                Box::new(StepRule),
            ],
        }
    }

    pub fn validate(&self, parameter: &str, value: f64, constraint: &NumericConstraint) -> ValidationResult {
        let violations: Vec<_> = self.rules
            .iter()
            .filter_map(|rule| rule.check(parameter, value, constraint))
            .collect();
        ValidationResult {
            valid: violations.is_empty(),
            violations,
        }
    }
}

impl Default for ConstraintValidator {
    fn default() -> Self {
        Self::new()
    }
}
