use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use certflow_core::error::{CertflowError, Result};
use certflow_core::event::RunEvent;
use certflow_core::types::*;

use crate::context::{EngineServices, RunContext, SequenceRunner};
use crate::processor::WorkflowProcessor;
use crate::run_log::RunLogger;

struct EngineInner {
    services: Arc<EngineServices>,
    live: Mutex<HashMap<String, CancellationToken>>,
    limiter: Semaphore,
    run_log: Option<(PathBuf, u8)>,
}

/// Creates runs from published workflows and drives them to a terminal state.
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

/// A run executing in the background.
pub struct RunHandle {
    id: String,
    cancel: CancellationToken,
    join: JoinHandle<Result<WorkflowRun>>,
}

impl RunHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the terminal run.
    pub async fn wait(self) -> Result<WorkflowRun> {
        self.join
            .await
            .map_err(|e| CertflowError::Internal(format!("run task failed: {e}")))?
    }
}

impl WorkflowEngine {
    pub fn new(services: Arc<EngineServices>) -> Self {
        Self::with_limits(services, 4, None)
    }

    /// `max_concurrent_runs` bounds runs in `processing` (0 = unlimited);
    /// extra runs wait in `pending`. `run_log` enables JSONL run logs as
    /// `(dir, level)`.
    pub fn with_limits(
        services: Arc<EngineServices>,
        max_concurrent_runs: usize,
        run_log: Option<(PathBuf, u8)>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                services,
                live: Mutex::new(HashMap::new()),
                limiter: Semaphore::new(match max_concurrent_runs {
                    0 => Semaphore::MAX_PERMITS,
                    n => n,
                }),
                run_log,
            }),
        }
    }

    pub fn services(&self) -> &Arc<EngineServices> {
        &self.inner.services
    }

    /// Run a workflow's published graph and wait for the terminal run.
    pub async fn run_workflow(
        &self,
        workflow_id: &str,
        trigger: WorkflowTriggerType,
    ) -> Result<WorkflowRun> {
        let (run, cancel) = self.create_run(workflow_id, trigger).await?;
        drive(self.inner.clone(), run, cancel).await
    }

    /// Start a run in the background.
    pub async fn spawn_workflow(
        &self,
        workflow_id: &str,
        trigger: WorkflowTriggerType,
    ) -> Result<RunHandle> {
        let (run, cancel) = self.create_run(workflow_id, trigger).await?;
        let id = run.id.clone();
        let join = tokio::spawn(drive(self.inner.clone(), run, cancel.clone()));
        Ok(RunHandle { id, cancel, join })
    }

    /// Withdraw a live run. Returns false when the run is not live.
    pub fn cancel(&self, run_id: &str) -> bool {
        let live = match self.inner.live.lock() {
            Ok(live) => live,
            Err(_) => return false,
        };
        match live.get(run_id) {
            Some(token) => {
                info!(run_id, "Cancelling run");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn live_runs(&self) -> Vec<String> {
        self.inner
            .live
            .lock()
            .map(|live| live.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Persist a pending run bound to a frozen copy of the published graph.
    async fn create_run(
        &self,
        workflow_id: &str,
        trigger: WorkflowTriggerType,
    ) -> Result<(WorkflowRun, CancellationToken)> {
        let services = &self.inner.services;
        let workflow = services.workflows.get(workflow_id).await?;
        let graph = workflow.graph_content.clone().filter(|_| workflow.has_content).ok_or_else(|| {
            CertflowError::Config(format!("workflow '{workflow_id}' has no published content"))
        })?;

        let run = WorkflowRun::new(&workflow.id, trigger, graph);
        services.runs.save(&run).await?;

        let cancel = CancellationToken::new();
        self.inner
            .live
            .lock()
            .map_err(|e| CertflowError::Internal(e.to_string()))?
            .insert(run.id.clone(), cancel.clone());
        info!(run_id = %run.id, workflow_id, trigger = %trigger, "Run created");
        Ok((run, cancel))
    }
}

async fn drive(
    inner: Arc<EngineInner>,
    mut run: WorkflowRun,
    cancel: CancellationToken,
) -> Result<WorkflowRun> {
    let services = inner.services.clone();
    let logger = inner.run_log.as_ref().map(|(dir, level)| {
        RunLogger::new(dir.clone(), *level).spawn(
            &services.event_bus,
            run.id.clone(),
            CancellationToken::new(),
        )
    });

    services.event_bus.publish(RunEvent::RunStarted {
        run_id: run.id.clone(),
        workflow_id: run.workflow_id.clone(),
        trigger: run.trigger,
    });

    let result = execute(&inner, &mut run, &cancel).await;

    if let Ok(mut live) = inner.live.lock() {
        live.remove(&run.id);
    }
    if let Err(e) = &result {
        error!(run_id = %run.id, error = %e, "Run could not be committed");
        if !run.status.is_terminal() {
            if let Err(te) = run.fail(e) {
                warn!(run_id = %run.id, error = %te, "Cannot mark run failed");
            }
        }
        if let Err(save_err) = services.runs.save(&run).await {
            error!(run_id = %run.id, error = %save_err, "Failed to record terminal run state");
        }
    }

    services.event_bus.publish(RunEvent::RunFinished {
        run_id: run.id.clone(),
        workflow_id: run.workflow_id.clone(),
        status: run.status,
        error: run.error.as_ref().map(|e| e.message.clone()),
    });
    if let Some(handle) = logger {
        handle.await.ok();
    }

    result.map(|()| run)
}

async fn execute(
    inner: &EngineInner,
    run: &mut WorkflowRun,
    cancel: &CancellationToken,
) -> Result<()> {
    let services = &inner.services;
    let ctx = RunContext::new(&run.workflow_id, &run.id, services.clone(), cancel.clone());

    let _permit = tokio::select! {
        permit = inner.limiter.acquire() => {
            permit.map_err(|e| CertflowError::Internal(e.to_string()))?
        }
        _ = cancel.cancelled() => {
            ctx.log(None, LogLevel::Warn, "run cancelled before it started").await;
            return commit(services, run, WorkflowRunStatus::Canceled, None).await;
        }
    };

    if let Err(e) = run.graph.verify() {
        warn!(run_id = %run.id, error = %e, "Refusing to execute malformed graph");
        ctx.log(None, LogLevel::Error, e.to_string()).await;
        return commit(services, run, WorkflowRunStatus::Failed, Some(e)).await;
    }

    run.transition(WorkflowRunStatus::Processing)?;
    services.runs.save(run).await?;
    info!(run_id = %run.id, workflow_id = %run.workflow_id, "Run processing");

    let graph = run.graph.clone();
    let outcome = WorkflowProcessor.run_sequence(&graph.nodes, &ctx).await;

    match outcome {
        Ok(()) => {
            ctx.log(None, LogLevel::Info, "workflow completed").await;
            commit(services, run, WorkflowRunStatus::Succeeded, None).await
        }
        Err(e) if e.is_cancelled() => {
            ctx.log(None, LogLevel::Warn, "workflow cancelled").await;
            commit(services, run, WorkflowRunStatus::Canceled, None).await
        }
        Err(e) => {
            ctx.log(None, LogLevel::Error, format!("workflow failed: {e}")).await;
            commit(services, run, WorkflowRunStatus::Failed, Some(e)).await
        }
    }
}

/// Commit the terminal state, then refresh the workflow's last-run summary.
async fn commit(
    services: &EngineServices,
    run: &mut WorkflowRun,
    status: WorkflowRunStatus,
    err: Option<CertflowError>,
) -> Result<()> {
    match &err {
        Some(e) => run.fail(e)?,
        None => run.transition(status)?,
    }
    services.runs.save(run).await?;
    info!(run_id = %run.id, status = %run.status, "Run finished");

    match services.workflows.get(&run.workflow_id).await {
        Ok(mut workflow) => {
            workflow.record_last_run(run);
            if let Err(e) = services.workflows.save(&workflow).await {
                warn!(workflow_id = %run.workflow_id, error = %e, "Failed to update last run");
            }
        }
        Err(e) => warn!(workflow_id = %run.workflow_id, error = %e, "Failed to load workflow"),
    }
    Ok(())
}
