use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use certflow_core::error::{CertflowError, Result};
use certflow_core::event::{EventBus, RunEvent};
use certflow_core::node::{NodeType, WorkflowNode};
use certflow_core::registry::Registries;
use certflow_core::traits::*;
use certflow_core::types::*;

use crate::expr::JsonExprEvaluator;

/// Collaborators shared by every run of an engine.
pub struct EngineServices {
    pub workflows: Arc<dyn WorkflowRepository>,
    pub runs: Arc<dyn WorkflowRunRepository>,
    pub outputs: Arc<dyn WorkflowOutputRepository>,
    pub certificates: Arc<dyn CertificateRepository>,
    pub accesses: Arc<dyn AccessRepository>,
    pub registries: Arc<Registries>,
    /// Without an issuer, bizApply nodes fail with a configuration error.
    pub issuer: Option<Arc<dyn AcmeIssuer>>,
    pub inspector: Arc<dyn CertificateInspector>,
    pub probe: Arc<dyn MonitorProbe>,
    pub evaluator: Arc<dyn ExpressionEvaluator>,
    pub event_bus: Arc<EventBus>,
    /// Used by bizUpload nodes reading from a URL.
    pub http: reqwest::Client,
}

impl EngineServices {
    /// Wire every repository to one store implementing all of them.
    pub fn new<S>(
        store: Arc<S>,
        registries: Arc<Registries>,
        inspector: Arc<dyn CertificateInspector>,
        probe: Arc<dyn MonitorProbe>,
    ) -> Self
    where
        S: WorkflowRepository
            + WorkflowRunRepository
            + WorkflowOutputRepository
            + CertificateRepository
            + AccessRepository,
    {
        Self {
            workflows: store.clone(),
            runs: store.clone(),
            outputs: store.clone(),
            certificates: store.clone(),
            accesses: store,
            registries,
            issuer: None,
            inspector,
            probe,
            evaluator: Arc::new(JsonExprEvaluator),
            event_bus: Arc::new(EventBus::default()),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_issuer(mut self, issuer: Arc<dyn AcmeIssuer>) -> Self {
        self.issuer = Some(issuer);
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Config of the access record `access_id`; an empty id means no credentials.
    pub async fn access_config(&self, access_id: &str) -> Result<ConfigMap> {
        if access_id.is_empty() {
            return Ok(ConfigMap::new());
        }
        Ok(self.accesses.get(access_id).await?.config)
    }
}

#[derive(Debug, Clone)]
struct BizRecord {
    node_type: NodeType,
    skipped: bool,
}

/// State of one executing run.
pub struct RunContext {
    pub workflow_id: String,
    pub run_id: String,
    pub cancel: CancellationToken,
    pub services: Arc<EngineServices>,
    variables: Mutex<Variables>,
    biz_records: Mutex<Vec<BizRecord>>,
}

impl RunContext {
    pub fn new(
        workflow_id: impl Into<String>,
        run_id: impl Into<String>,
        services: Arc<EngineServices>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
            cancel,
            services,
            variables: Mutex::new(Variables::new()),
            biz_records: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of the outputs published so far, keyed `<node id>.<output name>`.
    pub fn variables(&self) -> Variables {
        self.variables.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn publish_outputs(&self, node_id: &str, outputs: &[OutputEntry]) {
        if let Ok(mut vars) = self.variables.lock() {
            for entry in outputs {
                vars.insert(format!("{node_id}.{}", entry.name), entry.value.clone());
            }
        }
    }

    pub(crate) fn record_biz(&self, node_type: NodeType, skipped: bool) {
        if let Ok(mut records) = self.biz_records.lock() {
            records.push(BizRecord { node_type, skipped });
        }
    }

    /// True when at least one business node other than a notifier ran
    /// before now and every one of them was skipped.
    pub fn all_prior_biz_skipped(&self) -> bool {
        let Ok(records) = self.biz_records.lock() else {
            return false;
        };
        let mut prior = records.iter().filter(|r| r.node_type != NodeType::BizNotify).peekable();
        prior.peek().is_some() && prior.all(|r| r.skipped)
    }

    /// Race `fut` against the run's cancellation.
    pub async fn cancellable<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CertflowError::Cancelled),
            result = fut => result,
        }
    }

    /// Append a line to the run log and broadcast it.
    pub async fn log(
        &self,
        node: Option<&WorkflowNode>,
        level: LogLevel,
        message: impl Into<String>,
    ) {
        self.log_with_detail(node, level, message, None).await
    }

    pub async fn log_with_detail(
        &self,
        node: Option<&WorkflowNode>,
        level: LogLevel,
        message: impl Into<String>,
        detail: Option<serde_json::Value>,
    ) {
        let entry = WorkflowLog {
            run_id: self.run_id.clone(),
            node_id: node.map(|n| n.id.clone()).unwrap_or_default(),
            node_name: node.map(|n| n.name.clone()).unwrap_or_default(),
            level,
            message: message.into(),
            detail,
            created_at: Utc::now(),
        };
        if let Err(e) = self.services.runs.append_log(&entry).await {
            warn!(run_id = %self.run_id, error = %e, "Failed to persist run log");
        }
        self.services.event_bus.publish(RunEvent::Log(entry));
    }
}

/// Drives nested sequences on behalf of control-flow executors.
pub trait SequenceRunner: Send + Sync {
    /// Run one node, including disabled-node handling and output persistence.
    fn run_node<'a>(
        &'a self,
        node: &'a WorkflowNode,
        run: &'a RunContext,
    ) -> BoxFuture<'a, Result<()>>;

    /// Run `nodes` in declaration order, stopping at the first failure.
    fn run_sequence<'a>(
        &'a self,
        nodes: &'a [WorkflowNode],
        run: &'a RunContext,
    ) -> BoxFuture<'a, Result<()>>;
}

/// Everything an executor sees.
#[derive(Clone, Copy)]
pub struct NodeExecutionContext<'a> {
    pub node: &'a WorkflowNode,
    pub run: &'a RunContext,
    pub runner: &'a dyn SequenceRunner,
}

impl NodeExecutionContext<'_> {
    pub fn services(&self) -> &EngineServices {
        &self.run.services
    }
}

/// What an executor produced.
#[derive(Debug, Clone, Default)]
pub struct NodeExecutionResult {
    pub outputs: Vec<OutputEntry>,
    /// New certificate to persist together with the outputs.
    pub certificate: Option<Certificate>,
    pub skipped: bool,
    pub message: Option<String>,
}

impl NodeExecutionResult {
    pub fn completed() -> Self {
        Self::default()
    }

    pub fn skipped(reason: impl Into<String>, outputs: Vec<OutputEntry>) -> Self {
        Self {
            outputs,
            skipped: true,
            message: Some(reason.into()),
            ..Self::default()
        }
    }
}
