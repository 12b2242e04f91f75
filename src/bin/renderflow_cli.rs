//! RenderFlow CLI
//!
//! Commands: workflows, render, run, regenerate, status, queue, cancel
//! Outputs JSON to stdout, logs to stderr
//! Returns 2 when a job fails, 1 on usage or setup errors

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use renderflow_core::{ExecutionOrchestrator, ParamValues, RenderflowConfig};

#[derive(Parser)]
#[command(name = "renderflow-cli")]
#[command(about = "RenderFlow CLI - Workflow Orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Render engine address (overrides RENDERFLOW_ENGINE_URL)
    #[arg(short, long, global = true)]
    engine_url: Option<String>,

    /// Workflow directory (overrides RENDERFLOW_WORKFLOW_DIR)
    #[arg(short, long, global = true)]
    workflows_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List available workflows and their parameters
    Workflows,

    /// Resolve defaults and print the rendered graph without submitting it
    Render {
        workflow: String,

        /// JSON object of parameter values
        #[arg(short, long, default_value = "{}")]
        params: String,
    },

    /// Run a workflow to completion and register the produced asset
    Run {
        workflow: String,

        /// JSON object of parameter values
        #[arg(short, long, default_value = "{}")]
        params: String,

        #[arg(short, long)]
        session: Option<String>,
    },

    /// Re-run the workflow behind an asset with parameter overrides
    Regenerate {
        asset_id: String,

        /// JSON object of parameter overrides
        #[arg(short, long, default_value = "{}")]
        params: String,

        /// New seed; omit for a random one, -1 keeps the original
        #[arg(long, allow_hyphen_values = true)]
        seed: Option<i64>,

        #[arg(short, long)]
        session: Option<String>,
    },

    /// Current status of a job
    Status { job_id: String },

    /// Running and pending jobs
    Queue,

    /// Cancel a queued or running job
    Cancel { job_id: String },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "renderflow_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => println!(r#"{{"error": "Failed to serialize output: {}"}}"#, e),
    }
}

fn parse_params(raw: &str) -> Result<ParamValues, String> {
    serde_json::from_str(raw).map_err(|e| format!("Invalid params: {}", e))
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let mut config = match RenderflowConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            print_json(&json!({"error": e.to_string()}));
            return ExitCode::FAILURE;
        }
    };
    if let Some(url) = cli.engine_url {
        config.engine_url = url;
    }
    if let Some(dir) = cli.workflows_dir {
        config.workflow_dir = dir;
    }

    let orchestrator = match ExecutionOrchestrator::from_config(&config) {
        Ok(o) => o,
        Err(e) => {
            print_json(&json!({"error": e}));
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Workflows => {
            let workflows: Vec<_> = orchestrator
                .list_workflows()
                .iter()
                .map(|w| {
                    json!({
                        "id": w.id,
                        "namespace": w.namespace,
                        "description": w.description,
                        "parameters": w.parameters.iter().map(|p| json!({
                            "name": p.name,
                            "type": p.param_type,
                            "required": p.required,
                        })).collect::<Vec<_>>(),
                    })
                })
                .collect();
            print_json(&workflows);
            ExitCode::SUCCESS
        }

        Commands::Render { workflow, params } => {
            let params = match parse_params(&params) {
                Ok(p) => p,
                Err(e) => {
                    print_json(&json!({"error": e}));
                    return ExitCode::FAILURE;
                }
            };
            let rendered = orchestrator.workflow(&workflow).and_then(|definition| {
                renderflow_core::templates::validate_overrides(&definition, &params)?;
                let resolved = orchestrator.resolve_parameters(&definition, &params);
                renderflow_core::templates::render(&definition, &resolved).map(|g| (resolved, g))
            });
            match rendered {
                Ok((resolved, graph)) => {
                    print_json(&json!({
                        "parameters": resolved,
                        "hash": graph.hash(),
                        "graph": graph.graph(),
                    }));
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    print_json(&json!({"error": e}));
                    ExitCode::from(2)
                }
            }
        }

        Commands::Run { workflow, params, session } => {
            let params = match parse_params(&params) {
                Ok(p) => p,
                Err(e) => {
                    print_json(&json!({"success": false, "error": e}));
                    return ExitCode::FAILURE;
                }
            };
            match orchestrator.run(&workflow, &params, session).await {
                Ok(record) => {
                    print_json(&json!({
                        "success": true,
                        "asset_url": orchestrator.asset_locator(&record),
                        "asset": &*record,
                    }));
                    ExitCode::SUCCESS
                }
                Err(failure) => {
                    print_json(&json!({"success": false, "failure": failure}));
                    ExitCode::from(2)
                }
            }
        }

        Commands::Regenerate { asset_id, params, seed, session } => {
            let overrides = match parse_params(&params) {
                Ok(p) => p,
                Err(e) => {
                    print_json(&json!({"success": false, "error": e}));
                    return ExitCode::FAILURE;
                }
            };
            match orchestrator.regenerate(&asset_id, &overrides, seed, session).await {
                Ok(record) => {
                    print_json(&json!({
                        "success": true,
                        "original_asset_id": asset_id,
                        "asset_url": orchestrator.asset_locator(&record),
                        "asset": &*record,
                    }));
                    ExitCode::SUCCESS
                }
                Err(failure) => {
                    print_json(&json!({"success": false, "original_asset_id": asset_id, "failure": failure}));
                    ExitCode::from(2)
                }
            }
        }

        Commands::Status { job_id } => match orchestrator.job_status(&job_id).await {
            Ok(status) => {
                print_json(&json!({"job_id": job_id, "job": status}));
                ExitCode::SUCCESS
            }
            Err(e) => {
                print_json(&json!({"job_id": job_id, "error": e}));
                ExitCode::FAILURE
            }
        },

        Commands::Queue => match orchestrator.queue_status().await {
            Ok(queue) => {
                print_json(&json!({
                    "running_count": queue.running.len(),
                    "pending_count": queue.pending.len(),
                    "queue": queue,
                }));
                ExitCode::SUCCESS
            }
            Err(e) => {
                print_json(&json!({"error": e}));
                ExitCode::FAILURE
            }
        },

        Commands::Cancel { job_id } => match orchestrator.cancel(&job_id).await {
            Ok(cancelled) => {
                print_json(&json!({"job_id": job_id, "cancelled": cancelled}));
                if cancelled {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::from(2)
                }
            }
            Err(e) => {
                print_json(&json!({"job_id": job_id, "error": e}));
                ExitCode::FAILURE
            }
        },
    }
}
