use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::*;

// ── Capability payloads ─────────────────────────────────────────

/// One DNS-01 TXT record to publish for a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dns01Challenge {
    pub domain: String,
    /// Fully qualified record name, e.g. `_acme-challenge.example.com.`.
    pub fqdn: String,
    /// Record value (key authorization digest).
    pub value: String,
}

impl Dns01Challenge {
    pub fn new(domain: impl Into<String>, value: impl Into<String>) -> Self {
        let domain = domain.into();
        let bare = domain.trim_start_matches("*.").trim_end_matches('.');
        Self {
            fqdn: format!("_acme-challenge.{bare}."),
            domain,
            value: value.into(),
        }
    }
}

/// Certificate material handed to a deployer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateMaterial {
    pub certificate_id: String,
    pub subject_alt_names: Vec<String>,
    /// Leaf certificate PEM, optionally followed by its chain.
    pub certificate: String,
    pub issuer_certificate: String,
    pub private_key: String,
    pub valid_to: Option<DateTime<Utc>>,
}

impl From<&Certificate> for CertificateMaterial {
    fn from(c: &Certificate) -> Self {
        Self {
            certificate_id: c.id.clone(),
            subject_alt_names: c.subject_alt_names.clone(),
            certificate: c.certificate.clone(),
            issuer_certificate: c.issuer_certificate.clone(),
            private_key: c.private_key.clone(),
            valid_to: c.valid_to,
        }
    }
}

/// What a deployer reports back on success.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployReceipt {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

/// Parameters for one ACME order.
#[derive(Debug, Clone, Default)]
pub struct IssuanceRequest {
    pub domains: Vec<String>,
    pub contact_email: String,
    pub challenge_type: String,
    pub key_algorithm: String,
    pub ca_provider: String,
    pub ca_access_config: ConfigMap,
    pub ca_provider_config: ConfigMap,
    pub validity_lifetime: String,
    pub acme_profile: String,
    pub nameservers: Vec<String>,
    /// Seconds to wait after presenting records before asking for validation.
    pub dns_propagation_wait: i64,
    /// Upper bound in seconds on waiting for the CA to validate (0 = solver default).
    pub dns_propagation_timeout: i64,
    /// TTL of the TXT records (0 = solver default).
    pub dns_ttl: i64,
    pub http_delay_wait: i64,
    pub disable_follow_cname: bool,
    pub disable_ari: bool,
    /// ACME certificate URL of the certificate being renewed, for ARI.
    pub replaces_certificate_url: Option<String>,
}

/// Result of a completed ACME order.
#[derive(Debug, Clone, Default)]
pub struct IssuedCertificate {
    pub certificate: String,
    pub issuer_certificate: String,
    pub private_key: String,
    pub acme_account_url: String,
    pub acme_certificate_url: String,
}

/// Fields read out of a PEM certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateInfo {
    pub subject_alt_names: Vec<String>,
    pub serial_number: String,
    pub issuer_org: String,
    pub key_algorithm: String,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
}

/// Endpoint probed by a bizMonitor node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorTarget {
    pub host: String,
    pub port: u16,
    /// Server name sent during the handshake.
    pub domain: String,
    pub path: String,
}

/// What a probe saw on the wire.
#[derive(Debug, Clone, Default)]
pub struct ProbeObservation {
    /// Leaf certificate presented by the server, if any.
    pub certificate: Option<CertificateInfo>,
}

// ── Capabilities ────────────────────────────────────────────────

/// DNS-01 challenge solver.
///
/// TTL and propagation timeout are fixed when the solver is constructed.
pub trait ChallengeSolver: Send + Sync + 'static {
    /// Publish the TXT record.
    fn present<'a>(&'a self, challenge: &'a Dns01Challenge) -> BoxFuture<'a, Result<()>>;

    /// Remove the TXT record.
    fn cleanup<'a>(&'a self, challenge: &'a Dns01Challenge) -> BoxFuture<'a, Result<()>>;

    /// How long records may take to become visible to the CA.
    fn propagation_timeout(&self) -> Option<Duration> {
        None
    }
}

/// Deployment target.
pub trait Deployer: Send + Sync + 'static {
    fn deploy<'a>(
        &'a self,
        material: &'a CertificateMaterial,
    ) -> BoxFuture<'a, Result<DeployReceipt>>;
}

/// Notification channel.
pub trait Notifier: Send + Sync + 'static {
    fn notify<'a>(&'a self, subject: &'a str, message: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// ACME client driving one order to completion.
pub trait AcmeIssuer: Send + Sync + 'static {
    fn obtain<'a>(
        &'a self,
        request: &'a IssuanceRequest,
        solver: &'a dyn ChallengeSolver,
    ) -> BoxFuture<'a, Result<IssuedCertificate>>;
}

/// PEM/X.509 reader.
pub trait CertificateInspector: Send + Sync + 'static {
    fn inspect(&self, pem: &str) -> Result<CertificateInfo>;

    /// Reject text that holds no usable private key.
    fn validate_private_key(&self, pem: &str) -> Result<()>;
}

/// Live TLS endpoint probe.
pub trait MonitorProbe: Send + Sync + 'static {
    fn probe<'a>(&'a self, target: &'a MonitorTarget) -> BoxFuture<'a, Result<ProbeObservation>>;
}

/// Boolean guard evaluator for branch blocks.
pub trait ExpressionEvaluator: Send + Sync + 'static {
    /// Evaluate `expression` against the run's variables. A malformed
    /// expression yields `CertflowError::Expression`.
    fn evaluate(&self, expression: &serde_json::Value, variables: &Variables) -> Result<bool>;
}

// ── Repositories ────────────────────────────────────────────────

pub trait WorkflowRepository: Send + Sync + 'static {
    fn get(&self, id: &str) -> BoxFuture<'_, Result<Workflow>>;

    fn save(&self, workflow: &Workflow) -> BoxFuture<'_, Result<()>>;

    fn list(&self) -> BoxFuture<'_, Result<Vec<Workflow>>>;

    /// Enabled workflows with a scheduled trigger and published content.
    fn list_scheduled(&self) -> BoxFuture<'_, Result<Vec<Workflow>>>;
}

pub trait WorkflowRunRepository: Send + Sync + 'static {
    fn get(&self, id: &str) -> BoxFuture<'_, Result<WorkflowRun>>;

    fn save(&self, run: &WorkflowRun) -> BoxFuture<'_, Result<()>>;

    fn append_log(&self, log: &WorkflowLog) -> BoxFuture<'_, Result<()>>;

    /// Logs of a run in insertion order.
    fn list_logs(&self, run_id: &str) -> BoxFuture<'_, Result<Vec<WorkflowLog>>>;

    /// Most recent runs of a workflow, newest first.
    fn list_by_workflow(
        &self,
        workflow_id: &str,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<WorkflowRun>>>;
}

pub trait WorkflowOutputRepository: Send + Sync + 'static {
    fn get(&self, run_id: &str, node_id: &str) -> BoxFuture<'_, Result<Option<WorkflowOutput>>>;

    /// Most recent non-skipped output of a node across all runs of a workflow.
    fn get_latest_terminal(
        &self,
        workflow_id: &str,
        node_id: &str,
    ) -> BoxFuture<'_, Result<Option<WorkflowOutput>>>;

    fn save(&self, output: &WorkflowOutput) -> BoxFuture<'_, Result<()>>;

    /// Persist the certificate and the output referencing it atomically.
    fn save_with_certificate(
        &self,
        output: &WorkflowOutput,
        certificate: &Certificate,
    ) -> BoxFuture<'_, Result<()>>;
}

pub trait CertificateRepository: Send + Sync + 'static {
    fn get(&self, id: &str) -> BoxFuture<'_, Result<Certificate>>;

    /// Newest certificate produced by a node of a workflow.
    fn get_latest_by_workflow_node(
        &self,
        workflow_id: &str,
        node_id: &str,
    ) -> BoxFuture<'_, Result<Option<Certificate>>>;

    fn save(&self, certificate: &Certificate) -> BoxFuture<'_, Result<()>>;
}

pub trait AccessRepository: Send + Sync + 'static {
    fn get(&self, id: &str) -> BoxFuture<'_, Result<Access>>;

    fn save(&self, access: &Access) -> BoxFuture<'_, Result<()>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dns01_fqdn() {
        assert_eq!(Dns01Challenge::new("example.com", "v").fqdn, "_acme-challenge.example.com.");
        assert_eq!(Dns01Challenge::new("*.example.com", "v").fqdn, "_acme-challenge.example.com.");
    }
}
