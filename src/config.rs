//! Orchestrator configuration resolved from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::registry::DEFAULT_TTL_HOURS;

pub const DEFAULT_ENGINE_URL: &str = "http://localhost:8188";

/// Longest asset lifetime accepted from configuration: ten years.
pub const MAX_ASSET_TTL_HOURS: i64 = 24 * 365 * 10;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

#[derive(Debug, Clone)]
pub struct RenderflowConfig {
    /// Base address of the render engine.
    pub engine_url: String,
    /// Directory holding `<id>.json` templates and `<id>.meta.json` sidecars.
    pub workflow_dir: PathBuf,
    /// JSON file backing the persisted defaults tier.
    pub defaults_file: Option<PathBuf>,
    pub asset_ttl: chrono::Duration,
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    /// Consecutive `not_found` polls tolerated after a job was seen in the
    /// queue before it is declared failed.
    pub lost_job_grace: u32,
    pub engine_timeout: Duration,
}

impl Default for RenderflowConfig {
    fn default() -> Self {
        Self {
            engine_url: DEFAULT_ENGINE_URL.to_string(),
            workflow_dir: PathBuf::from("workflows"),
            defaults_file: None,
            asset_ttl: chrono::Duration::hours(DEFAULT_TTL_HOURS),
            poll_interval: Duration::from_secs(1),
            max_poll_attempts: 300,
            lost_job_grace: 3,
            engine_timeout: Duration::from_secs(30),
        }
    }
}

impl RenderflowConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve against an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let ttl_hours: i64 = parse_optional(&optional, "RENDERFLOW_ASSET_TTL_HOURS", DEFAULT_TTL_HOURS)?;
        let asset_ttl = chrono::Duration::try_hours(ttl_hours)
            .filter(|_| (1..=MAX_ASSET_TTL_HOURS).contains(&ttl_hours))
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "RENDERFLOW_ASSET_TTL_HOURS".into(),
                message: format!("must be between 1 and {} hours", MAX_ASSET_TTL_HOURS),
            })?;
        let poll_ms: u64 = parse_optional(&optional, "RENDERFLOW_POLL_INTERVAL_MS", 1000)?;
        let max_poll_attempts: u32 =
            parse_optional(&optional, "RENDERFLOW_MAX_POLL_ATTEMPTS", defaults.max_poll_attempts)?;
        if max_poll_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "RENDERFLOW_MAX_POLL_ATTEMPTS".into(),
                message: "must be at least 1".into(),
            });
        }
        let timeout_secs: u64 = parse_optional(&optional, "RENDERFLOW_ENGINE_TIMEOUT_SECS", 30)?;

        Ok(Self {
            engine_url: optional("RENDERFLOW_ENGINE_URL").unwrap_or(defaults.engine_url),
            workflow_dir: optional("RENDERFLOW_WORKFLOW_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.workflow_dir),
            defaults_file: optional("RENDERFLOW_DEFAULTS_FILE").map(PathBuf::from),
            asset_ttl,
            poll_interval: Duration::from_millis(poll_ms),
            max_poll_attempts,
            lost_job_grace: parse_optional(&optional, "RENDERFLOW_LOST_JOB_GRACE", defaults.lost_job_grace)?,
            engine_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

fn parse_optional<T, F>(optional: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match optional(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}
