use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use futures::future::BoxFuture;

use certflow_core::error::{CertflowError, Result};
use certflow_core::registry::{
    ChallengeProviderType, ChallengeSolverRegistry, DeployerRegistry, DeploymentProviderType,
    NotificationProviderType, NotifierRegistry,
};
use certflow_core::traits::*;
use certflow_core::types::Variables;

// ── Deployer ────────────────────────────────────────────────────

/// Records every deployment made through deployers it creates.
#[derive(Clone, Default)]
pub struct DeployRecorder {
    calls: Arc<Mutex<Vec<CertificateMaterial>>>,
    failure: Arc<Mutex<Option<String>>>,
}

impl DeployRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent deployments fail with a provider error.
    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn calls(&self) -> Vec<CertificateMaterial> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Register a factory under `provider_type` producing recording deployers.
    pub fn register(&self, registry: &mut DeployerRegistry, provider_type: &str) {
        let recorder = self.clone();
        let name = provider_type.to_string();
        registry
            .register(DeploymentProviderType::new(provider_type), move |_| {
                Ok(Box::new(MockDeployer {
                    recorder: recorder.clone(),
                    name: name.clone(),
                }) as Box<dyn Deployer>)
            })
            .unwrap();
    }
}

pub struct MockDeployer {
    recorder: DeployRecorder,
    name: String,
}

impl Deployer for MockDeployer {
    fn deploy<'a>(
        &'a self,
        material: &'a CertificateMaterial,
    ) -> BoxFuture<'a, Result<DeployReceipt>> {
        Box::pin(async move {
            self.recorder.calls.lock().unwrap().push(material.clone());
            if let Some(message) = self.recorder.failure.lock().unwrap().clone() {
                return Err(CertflowError::provider(&self.name, message));
            }
            Ok(DeployReceipt {
                summary: format!("deployed {}", material.certificate_id),
                detail: None,
            })
        })
    }
}

// ── Notifier ────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct NotifyRecorder {
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl NotifyRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn register(&self, registry: &mut NotifierRegistry, provider_type: &str) {
        let recorder = self.clone();
        registry
            .register(NotificationProviderType::new(provider_type), move |_| {
                Ok(Box::new(MockNotifier {
                    recorder: recorder.clone(),
                }) as Box<dyn Notifier>)
            })
            .unwrap();
    }
}

pub struct MockNotifier {
    recorder: NotifyRecorder,
}

impl Notifier for MockNotifier {
    fn notify<'a>(&'a self, subject: &'a str, message: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.recorder
                .calls
                .lock()
                .unwrap()
                .push((subject.to_string(), message.to_string()));
            Ok(())
        })
    }
}

// ── Challenge solver ────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct SolverRecorder {
    factory_calls: Arc<AtomicUsize>,
    presented: Arc<Mutex<Vec<Dns01Challenge>>>,
    cleaned: Arc<Mutex<Vec<Dns01Challenge>>>,
}

impl SolverRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many solvers were constructed.
    pub fn factory_calls(&self) -> usize {
        self.factory_calls.load(Ordering::SeqCst)
    }

    pub fn presented(&self) -> Vec<Dns01Challenge> {
        self.presented.lock().unwrap().clone()
    }

    pub fn cleaned(&self) -> Vec<Dns01Challenge> {
        self.cleaned.lock().unwrap().clone()
    }

    pub fn register(&self, registry: &mut ChallengeSolverRegistry, provider_type: &str) {
        let recorder = self.clone();
        registry
            .register(ChallengeProviderType::new(provider_type), move |_| {
                recorder.factory_calls.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(MockSolver {
                    recorder: recorder.clone(),
                }) as Box<dyn ChallengeSolver>)
            })
            .unwrap();
    }
}

pub struct MockSolver {
    recorder: SolverRecorder,
}

impl ChallengeSolver for MockSolver {
    fn present<'a>(&'a self, challenge: &'a Dns01Challenge) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.recorder.presented.lock().unwrap().push(challenge.clone());
            Ok(())
        })
    }

    fn cleanup<'a>(&'a self, challenge: &'a Dns01Challenge) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.recorder.cleaned.lock().unwrap().push(challenge.clone());
            Ok(())
        })
    }
}

// ── ACME issuer ─────────────────────────────────────────────────

/// Issuer that presents one challenge per domain and returns fixed PEMs.
pub struct MockIssuer {
    calls: AtomicUsize,
    requests: Mutex<Vec<IssuanceRequest>>,
    certificate: String,
    private_key: String,
}

impl MockIssuer {
    pub fn new(certificate: &str, private_key: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            requests: Mutex::default(),
            certificate: certificate.to_string(),
            private_key: private_key.to_string(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<IssuanceRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl AcmeIssuer for MockIssuer {
    fn obtain<'a>(
        &'a self,
        request: &'a IssuanceRequest,
        solver: &'a dyn ChallengeSolver,
    ) -> BoxFuture<'a, Result<IssuedCertificate>> {
        Box::pin(async move {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.requests.lock().unwrap().push(request.clone());
            for domain in &request.domains {
                let challenge = Dns01Challenge::new(domain.as_str(), format!("digest-{n}"));
                solver.present(&challenge).await?;
                solver.cleanup(&challenge).await?;
            }
            Ok(IssuedCertificate {
                certificate: self.certificate.clone(),
                issuer_certificate: String::new(),
                private_key: self.private_key.clone(),
                acme_account_url: "https://acme.test/acct/1".into(),
                acme_certificate_url: format!("https://acme.test/cert/{n}"),
            })
        })
    }
}

// ── Inspector / probe / evaluator ───────────────────────────────

/// Inspector returning fixed facts for any non-empty input. Private keys
/// must start with `KEY`.
pub struct StaticInspector {
    pub info: CertificateInfo,
}

impl StaticInspector {
    /// Facts for a certificate valid for another `days_left` days.
    pub fn valid_for(days_left: i64, sans: &[&str]) -> Self {
        let now = Utc::now();
        Self {
            info: CertificateInfo {
                subject_alt_names: sans.iter().map(|s| s.to_string()).collect(),
                serial_number: "01".into(),
                issuer_org: "Mock CA".into(),
                key_algorithm: "RSA2048".into(),
                valid_from: Some(now - Duration::days(1)),
                valid_to: Some(now + Duration::days(days_left) + Duration::hours(1)),
            },
        }
    }
}

impl CertificateInspector for StaticInspector {
    fn inspect(&self, pem: &str) -> Result<CertificateInfo> {
        if pem.trim().is_empty() {
            return Err(CertflowError::Config("empty certificate".into()));
        }
        Ok(self.info.clone())
    }

    fn validate_private_key(&self, pem: &str) -> Result<()> {
        if pem.starts_with("KEY") {
            Ok(())
        } else {
            Err(CertflowError::Config("no PRIVATE KEY block in PEM".into()))
        }
    }
}

/// Probe returning a fixed observation.
pub struct StaticProbe {
    pub certificate: Option<CertificateInfo>,
    calls: Arc<Mutex<Vec<MonitorTarget>>>,
}

impl StaticProbe {
    pub fn new(certificate: Option<CertificateInfo>) -> Self {
        Self {
            certificate,
            calls: Arc::default(),
        }
    }

    pub fn targets(&self) -> Vec<MonitorTarget> {
        self.calls.lock().unwrap().clone()
    }
}

impl MonitorProbe for StaticProbe {
    fn probe<'a>(&'a self, target: &'a MonitorTarget) -> BoxFuture<'a, Result<ProbeObservation>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(target.clone());
            Ok(ProbeObservation {
                certificate: self.certificate.clone(),
            })
        })
    }
}

/// Evaluator that treats the expression as a literal boolean.
pub struct LiteralEvaluator;

impl ExpressionEvaluator for LiteralEvaluator {
    fn evaluate(&self, expression: &serde_json::Value, _variables: &Variables) -> Result<bool> {
        expression
            .as_bool()
            .ok_or_else(|| {
                CertflowError::Expression(format!("not a boolean literal: {expression}"))
            })
    }
}
