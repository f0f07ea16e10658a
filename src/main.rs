mod scheduler;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use certflow_core::config::AppConfig;
use certflow_core::registry::Registries;
use certflow_core::traits::{AccessRepository, WorkflowRepository, WorkflowRunRepository};
use certflow_core::types::{Access, Workflow, WorkflowRun, WorkflowRunStatus, WorkflowTriggerType};
use certflow_core::WorkflowGraph;
use certflow_engine::{EngineServices, WorkflowEngine};
use certflow_providers::{
    AcmeClient, AcmeSettings, HttpSettings, TlsProbe, X509Inspector,
};
use certflow_store::SqliteStore;

use crate::scheduler::WorkflowScheduler;

#[derive(Parser)]
#[command(name = "certflow", version, about = "Certificate lifecycle workflow engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "certflow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a workflow definition (JSON) and publish its graph
    Import {
        /// Workflow file
        file: PathBuf,
    },
    /// Run a workflow now and print its logs
    Run {
        /// Workflow ID
        workflow_id: String,
    },
    /// List recent runs of a workflow
    Runs {
        /// Workflow ID
        workflow_id: String,
        /// Maximum number of runs to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Print the logs of a run
    Logs {
        /// Run ID
        run_id: String,
    },
    /// List registered provider types
    Providers,
    /// Trigger scheduled workflows until interrupted
    Daemon,
    /// Show current configuration
    Config,
}

/// On-disk workflow definition accepted by `certflow import`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkflowFile {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_trigger")]
    trigger: WorkflowTriggerType,
    #[serde(default)]
    trigger_cron: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
    /// Credentials referenced by the graph's `providerAccessId` fields.
    #[serde(default)]
    accesses: Vec<Access>,
    graph: WorkflowGraph,
}

fn default_trigger() -> WorkflowTriggerType {
    WorkflowTriggerType::Manual
}

fn default_enabled() -> bool {
    true
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("certflow=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    if let Commands::Config = cli.command {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    // Set up components
    let db_path = config.database_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(SqliteStore::open(&db_path)?);

    let http = HttpSettings::from(&config.http);
    let mut registries = Registries::default();
    certflow_providers::register_builtins(&mut registries, &http)?;

    let services = EngineServices::new(
        store.clone(),
        Arc::new(registries),
        Arc::new(X509Inspector),
        Arc::new(TlsProbe::new(http.clone())),
    )
    .with_issuer(Arc::new(AcmeClient::new(AcmeSettings::from(&config))))
    .with_http_client(http.client(None, false)?);
    let run_log = config
        .log
        .enabled
        .then(|| (config.log_dir(), config.log.level));
    let max_runs = config.engine.max_concurrent_runs;
    let engine = WorkflowEngine::with_limits(Arc::new(services), max_runs, run_log);

    match cli.command {
        Commands::Import { file } => {
            let workflow = import(&*store, &file).await?;
            println!("{}", workflow.id);
        }
        Commands::Run { workflow_id } => {
            let handle = engine
                .spawn_workflow(&workflow_id, WorkflowTriggerType::Manual)
                .await?;
            let run_id = handle.id().to_string();
            let wait = handle.wait();
            tokio::pin!(wait);

            let run = tokio::select! {
                run = &mut wait => run?,
                _ = tokio::signal::ctrl_c() => {
                    info!(%run_id, "Interrupted, cancelling run");
                    engine.cancel(&run_id);
                    wait.await?
                }
            };

            print_logs(&*store, &run.id).await?;
            print_run(&run);
            if run.status != WorkflowRunStatus::Succeeded {
                anyhow::bail!("run {} ended {}", run.id, run.status);
            }
        }
        Commands::Runs { workflow_id, limit } => {
            WorkflowRepository::get(&*store, &workflow_id).await?;
            for run in store.list_by_workflow(&workflow_id, limit).await? {
                print_run(&run);
            }
        }
        Commands::Logs { run_id } => {
            WorkflowRunRepository::get(&*store, &run_id).await?;
            print_logs(&*store, &run_id).await?;
        }
        Commands::Providers => {
            let registries = &engine.services().registries;
            let solvers = registries.challenge_solvers.provider_types().join(", ");
            println!("challenge solvers: {solvers}");
            println!("deployers:         {}", registries.deployers.provider_types().join(", "));
            println!("notifiers:         {}", registries.notifiers.provider_types().join(", "));
        }
        Commands::Daemon => {
            info!("Starting daemon");
            let cancel = tokio_util::sync::CancellationToken::new();
            let cancel_clone = cancel.clone();

            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutting down daemon...");
                cancel_clone.cancel();
            });

            if config.scheduler.enabled {
                let scheduler = WorkflowScheduler::new(
                    engine.clone(),
                    engine.services().workflows.clone(),
                    Duration::from_secs(config.scheduler.tick_secs),
                    cancel.clone(),
                );
                scheduler.run().await;
            } else {
                warn!("Scheduler disabled in config, daemon idle");
                cancel.cancelled().await;
            }

            for run_id in engine.live_runs() {
                engine.cancel(&run_id);
            }
        }
        Commands::Config => unreachable!("handled before store setup"),
    }

    Ok(())
}

/// Load the config file, falling back to `~/.certflow/config.toml` and then to defaults.
fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }
    let home_config = std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".certflow").join("config.toml"));
    match home_config {
        Some(path) if path.exists() => {
            info!(path = %path.display(), "Loading config from home directory");
            Ok(AppConfig::load(&path)?)
        }
        _ => {
            warn!("No config file found, using defaults");
            Ok(AppConfig::default())
        }
    }
}

async fn import<S>(store: &S, file: &Path) -> anyhow::Result<Workflow>
where
    S: WorkflowRepository + AccessRepository,
{
    let text = std::fs::read_to_string(file)?;
    let definition: WorkflowFile = serde_json::from_str(&text)?;

    for access in &definition.accesses {
        AccessRepository::save(store, access).await?;
    }

    let mut workflow = Workflow::new(definition.name, definition.trigger);
    workflow.description = definition.description;
    workflow.trigger_cron = definition.trigger_cron;
    workflow.enabled = definition.enabled;
    workflow.set_draft(definition.graph);
    workflow.publish()?;
    WorkflowRepository::save(store, &workflow).await?;

    info!(workflow_id = %workflow.id, name = %workflow.name, "Workflow imported");
    Ok(workflow)
}

fn print_run(run: &WorkflowRun) {
    let ended = run
        .ended_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{}  {:<10} {:<9} started {}  ended {}",
        run.id,
        run.status.to_string(),
        run.trigger.to_string(),
        run.started_at.format("%Y-%m-%d %H:%M:%S"),
        ended
    );
    if let Some(error) = &run.error {
        match &error.node_id {
            Some(node_id) => println!("    error at {node_id}: {}", error.message),
            None => println!("    error: {}", error.message),
        }
    }
}

async fn print_logs<S: WorkflowRunRepository>(store: &S, run_id: &str) -> anyhow::Result<()> {
    for log in store.list_logs(run_id).await? {
        let origin = if log.node_name.is_empty() {
            "workflow".to_string()
        } else {
            log.node_name.clone()
        };
        println!(
            "[{}] {:<5} {}: {}",
            log.created_at.format("%H:%M:%S"),
            log.level.as_str().to_uppercase(),
            origin,
            log.message
        );
    }
    Ok(())
}
