use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CertflowError, Result};
use crate::graph::WorkflowGraph;

/// Flat string-keyed configuration map, as persisted by the graph editor and
/// in access credentials.
pub type ConfigMap = serde_json::Map<String, serde_json::Value>;

/// Values visible to branch guard expressions, keyed `<node id>.<output name>`.
pub type Variables = HashMap<String, serde_json::Value>;

/// Generate a fresh record id.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowTriggerType {
    Scheduled,
    Manual,
}

impl std::fmt::Display for WorkflowTriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// A user-authored workflow and its draft/published graphs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub trigger: WorkflowTriggerType,
    #[serde(default)]
    pub trigger_cron: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub graph_draft: Option<WorkflowGraph>,
    #[serde(default)]
    pub graph_content: Option<WorkflowGraph>,
    #[serde(default)]
    pub has_draft: bool,
    #[serde(default)]
    pub has_content: bool,
    #[serde(default)]
    pub last_run_id: Option<String>,
    #[serde(default)]
    pub last_run_status: Option<WorkflowRunStatus>,
    #[serde(default)]
    pub last_run_time: Option<DateTime<Utc>>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, trigger: WorkflowTriggerType) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            description: String::new(),
            trigger,
            trigger_cron: String::new(),
            enabled: true,
            graph_draft: None,
            graph_content: None,
            has_draft: false,
            has_content: false,
            last_run_id: None,
            last_run_status: None,
            last_run_time: None,
        }
    }

    /// Replace the draft graph with unpublished edits.
    pub fn set_draft(&mut self, graph: WorkflowGraph) {
        self.graph_draft = Some(graph);
        self.has_draft = true;
    }

    /// Publish the draft: verify it, then make it the executed content.
    pub fn publish(&mut self) -> Result<()> {
        let draft = self
            .graph_draft
            .take()
            .ok_or_else(|| CertflowError::Config(format!("workflow '{}' has no draft", self.id)))?;
        if let Err(e) = draft.verify() {
            self.graph_draft = Some(draft);
            return Err(e);
        }
        self.graph_content = Some(draft);
        self.has_content = true;
        self.has_draft = false;
        Ok(())
    }

    /// Record the summary of a finished run.
    pub fn record_last_run(&mut self, run: &WorkflowRun) {
        self.last_run_id = Some(run.id.clone());
        self.last_run_status = Some(run.status);
        self.last_run_time = Some(run.ended_at.unwrap_or(run.started_at));
    }
}

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowRunStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

impl WorkflowRunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Processing | Self::Failed | Self::Canceled),
            Self::Processing => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for WorkflowRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The first unhandled failure of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunError {
    #[serde(default)]
    pub node_id: Option<String>,
    pub message: String,
}

/// One execution of a published graph snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    pub id: String,
    pub workflow_id: String,
    pub status: WorkflowRunStatus,
    pub trigger: WorkflowTriggerType,
    /// Frozen copy of the graph this run executes.
    pub graph: WorkflowGraph,
    /// Creation time while pending, then the moment processing began.
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<RunError>,
}

impl WorkflowRun {
    pub fn new(
        workflow_id: impl Into<String>,
        trigger: WorkflowTriggerType,
        graph: WorkflowGraph,
    ) -> Self {
        Self {
            id: new_id(),
            workflow_id: workflow_id.into(),
            status: WorkflowRunStatus::Pending,
            trigger,
            graph,
            started_at: Utc::now(),
            ended_at: None,
            error: None,
        }
    }

    /// Move to `next`, refusing any change once a terminal state is committed.
    pub fn transition(&mut self, next: WorkflowRunStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(CertflowError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        if next == WorkflowRunStatus::Processing {
            self.started_at = Utc::now();
        }
        if next.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Commit the `failed` state with the error that escaped traversal.
    pub fn fail(&mut self, err: &CertflowError) -> Result<()> {
        self.transition(WorkflowRunStatus::Failed)?;
        self.error = Some(RunError {
            node_id: err.node_id().map(str::to_string),
            message: err.to_string(),
        });
        Ok(())
    }
}

/// Severity of a run log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A per-node log line of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowLog {
    pub run_id: String,
    pub node_id: String,
    pub node_name: String,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Type tag of an output value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputValueType {
    Ref,
    String,
    Number,
    Boolean,
}

/// One named output of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: OutputValueType,
    pub value: serde_json::Value,
}

pub const CERTIFICATE_REF_PREFIX: &str = "certificate#";

pub const OUTPUT_CERTIFICATE: &str = "certificate";
pub const OUTPUT_CERTIFICATE_VALIDITY: &str = "certificate.validity";
pub const OUTPUT_CERTIFICATE_DAYS_LEFT: &str = "certificate.daysLeft";

impl OutputEntry {
    pub fn certificate_ref(certificate_id: &str) -> Self {
        Self {
            name: OUTPUT_CERTIFICATE.to_string(),
            value_type: OutputValueType::Ref,
            value: serde_json::Value::String(format!("{CERTIFICATE_REF_PREFIX}{certificate_id}")),
        }
    }

    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value_type: OutputValueType::String,
            value: serde_json::Value::String(value.into()),
        }
    }

    pub fn number(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            value_type: OutputValueType::Number,
            value: serde_json::Value::from(value),
        }
    }

    pub fn boolean(name: impl Into<String>, value: bool) -> Self {
        Self {
            name: name.into(),
            value_type: OutputValueType::Boolean,
            value: serde_json::Value::Bool(value),
        }
    }

    /// Validity outputs for a certificate whose window is known.
    pub fn validity_of(
        certificate_valid_to: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Vec<Self> {
        match certificate_valid_to {
            Some(valid_to) => vec![
                Self::boolean(OUTPUT_CERTIFICATE_VALIDITY, valid_to > now),
                Self::number(OUTPUT_CERTIFICATE_DAYS_LEFT, (valid_to - now).num_days()),
            ],
            None => vec![],
        }
    }
}

/// A node's externally consumable result, scoped to one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowOutput {
    pub id: String,
    pub workflow_id: String,
    pub run_id: String,
    pub node_id: String,
    /// Snapshot of the producing node's configuration.
    pub node_config: serde_json::Value,
    pub outputs: Vec<OutputEntry>,
    pub succeeded: bool,
    #[serde(default)]
    pub skipped: bool,
    pub created_at: DateTime<Utc>,
}

impl WorkflowOutput {
    pub fn new(
        workflow_id: impl Into<String>,
        run_id: impl Into<String>,
        node_id: impl Into<String>,
        node_config: serde_json::Value,
    ) -> Self {
        Self {
            id: new_id(),
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
            node_id: node_id.into(),
            node_config,
            outputs: vec![],
            succeeded: true,
            skipped: false,
            created_at: Utc::now(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&OutputEntry> {
        self.outputs.iter().find(|o| o.name == name)
    }

    /// The certificate id referenced by the `certificate` ref output.
    pub fn certificate_id(&self) -> Option<&str> {
        self.get(OUTPUT_CERTIFICATE)
            .filter(|o| o.value_type == OutputValueType::Ref)
            .and_then(|o| o.value.as_str())
            .and_then(|v| v.strip_prefix(CERTIFICATE_REF_PREFIX))
    }
}

/// Where a certificate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateSource {
    Request,
    Upload,
}

impl CertificateSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Upload => "upload",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "request" => Some(Self::Request),
            "upload" => Some(Self::Upload),
            _ => None,
        }
    }
}

/// Issued or uploaded certificate material.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub id: String,
    pub source: CertificateSource,
    #[serde(default)]
    pub subject_alt_names: Vec<String>,
    pub certificate: String,
    #[serde(default)]
    pub issuer_certificate: String,
    pub private_key: String,
    #[serde(default)]
    pub key_algorithm: String,
    #[serde(default)]
    pub serial_number: String,
    #[serde(default)]
    pub issuer_org: String,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub acme_account_url: String,
    #[serde(default)]
    pub acme_certificate_url: String,
    /// The certificate this one renewed, if any.
    #[serde(default)]
    pub renewed_from_id: Option<String>,
    pub workflow_id: String,
    pub workflow_run_id: String,
    pub workflow_node_id: String,
    pub created_at: DateTime<Utc>,
}

impl Certificate {
    /// Whole days until expiry, if the validity window is known.
    pub fn days_left(&self, now: DateTime<Utc>) -> Option<i64> {
        self.valid_to.map(|to| (to - now).num_days())
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        let started = self.valid_from.map_or(true, |from| from <= now);
        let not_expired = self.valid_to.map_or(false, |to| to > now);
        started && not_expired
    }

    pub fn reference(&self) -> String {
        format!("{CERTIFICATE_REF_PREFIX}{}", self.id)
    }
}

/// A stored provider credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Access {
    pub id: String,
    pub name: String,
    pub provider: String,
    #[serde(default)]
    pub config: ConfigMap,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn minimal_graph() -> WorkflowGraph {
        serde_json::from_value(serde_json::json!({
            "nodes": [
                {"id": "s", "type": "start", "data": {"name": "Start"}},
                {"id": "e", "type": "end", "data": {"name": "End"}}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_run_lifecycle() {
        let mut run = WorkflowRun::new("wf", WorkflowTriggerType::Manual, minimal_graph());
        assert_eq!(run.status, WorkflowRunStatus::Pending);
        run.transition(WorkflowRunStatus::Processing).unwrap();
        run.transition(WorkflowRunStatus::Succeeded).unwrap();
        assert!(run.ended_at.is_some());
    }

    #[test]
    fn test_started_at_marks_processing_not_creation() {
        let mut run = WorkflowRun::new("wf", WorkflowTriggerType::Manual, minimal_graph());
        let created = Utc::now() - Duration::minutes(5);
        run.started_at = created;
        run.transition(WorkflowRunStatus::Processing).unwrap();
        assert!(run.started_at > created);
        run.transition(WorkflowRunStatus::Succeeded).unwrap();
        assert!(run.ended_at.unwrap() >= run.started_at);
    }

    #[test]
    fn test_terminal_state_is_immutable() {
        let mut run = WorkflowRun::new("wf", WorkflowTriggerType::Manual, minimal_graph());
        run.transition(WorkflowRunStatus::Processing).unwrap();
        run.transition(WorkflowRunStatus::Canceled).unwrap();
        assert!(run.transition(WorkflowRunStatus::Succeeded).is_err());
        assert!(run.transition(WorkflowRunStatus::Processing).is_err());
        assert_eq!(run.status, WorkflowRunStatus::Canceled);
    }

    #[test]
    fn test_pending_cannot_jump_to_succeeded() {
        let mut run = WorkflowRun::new("wf", WorkflowTriggerType::Manual, minimal_graph());
        assert!(run.transition(WorkflowRunStatus::Succeeded).is_err());
    }

    #[test]
    fn test_fail_records_node() {
        let mut run = WorkflowRun::new("wf", WorkflowTriggerType::Scheduled, minimal_graph());
        run.transition(WorkflowRunStatus::Processing).unwrap();
        let err = CertflowError::provider("webhook", "timeout").in_node("n1", "Deploy");
        run.fail(&err).unwrap();
        let recorded = run.error.unwrap();
        assert_eq!(recorded.node_id.as_deref(), Some("n1"));
        assert!(recorded.message.contains("timeout"));
    }

    #[test]
    fn test_output_certificate_ref() {
        let mut out = WorkflowOutput::new("wf", "run", "apply", serde_json::json!({}));
        out.outputs.push(OutputEntry::certificate_ref("abc"));
        assert_eq!(out.certificate_id(), Some("abc"));
        assert_eq!(
            serde_json::to_value(&out.outputs[0]).unwrap(),
            serde_json::json!({"name": "certificate", "type": "ref", "value": "certificate#abc"})
        );
    }

    #[test]
    fn test_validity_outputs() {
        let now = Utc::now();
        let valid_to = now + Duration::days(10) + Duration::hours(1);
        let entries = OutputEntry::validity_of(Some(valid_to), now);
        assert_eq!(entries[0].value, serde_json::json!(true));
        assert_eq!(entries[1].value, serde_json::json!(10));
        assert!(OutputEntry::validity_of(None, now).is_empty());
    }

    #[test]
    fn test_publish_requires_valid_draft() {
        let mut wf = Workflow::new("renew", WorkflowTriggerType::Manual);
        assert!(wf.publish().is_err());

        let bad: WorkflowGraph = serde_json::from_value(serde_json::json!({
            "nodes": [{"id": "s", "type": "start", "data": {"name": "Start"}}]
        }))
        .unwrap();
        wf.set_draft(bad);
        assert!(wf.publish().is_err());
        assert!(wf.has_draft);

        wf.set_draft(minimal_graph());
        wf.publish().unwrap();
        assert!(wf.has_content && !wf.has_draft);
        assert!(wf.graph_draft.is_none());
    }
}
