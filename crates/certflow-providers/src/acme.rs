//! ACME issuance over `instant-acme`.
//!
//! Drives one DNS-01 order per request:
//! - load or register the account for the (directory, contact) pair
//! - present every pending challenge through the node's solver
//! - wait for the CA to validate, then finalize with a locally generated key
//! - remove the TXT records whatever the outcome

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::future::BoxFuture;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, NewAccount,
    NewOrder, Order, OrderStatus,
};
use rcgen::{CertificateParams, KeyPair, RsaKeySize};
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use certflow_core::config::AppConfig;
use certflow_core::error::{CertflowError, Result};
use certflow_core::node::config_str;
use certflow_core::traits::{
    AcmeIssuer, ChallengeSolver, Dns01Challenge, IssuanceRequest, IssuedCertificate,
};

pub const LETSENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
pub const LETSENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Used when neither the request nor the solver bounds validation.
const DEFAULT_VALIDATION_TIMEOUT: Duration = Duration::from_secs(120);
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(60);
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Defaults applied when a bizApply node leaves CA details empty.
#[derive(Debug, Clone)]
pub struct AcmeSettings {
    pub directory_url: String,
    pub contact_email: Option<String>,
    /// Account credentials are cached here as JSON when set.
    pub accounts_dir: Option<PathBuf>,
}

impl From<&AppConfig> for AcmeSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            directory_url: config.acme.directory_url.clone(),
            contact_email: config.acme.contact_email.clone(),
            accounts_dir: Some(config.acme_accounts_dir()),
        }
    }
}

/// `AcmeIssuer` backed by `instant-acme`, generating certificate keys with `rcgen`.
pub struct AcmeClient {
    settings: AcmeSettings,
    accounts: Mutex<HashMap<String, Account>>,
}

impl AcmeClient {
    pub fn new(settings: AcmeSettings) -> Self {
        Self {
            settings,
            accounts: Mutex::new(HashMap::new()),
        }
    }

    /// Directory URL for the request's CA provider.
    ///
    /// Empty means the configured default; `custom` reads `endpoint` from the
    /// CA access config, then from the CA provider config.
    pub fn directory_for(&self, request: &IssuanceRequest) -> Result<String> {
        match request.ca_provider.to_ascii_lowercase().as_str() {
            "" => Ok(self.settings.directory_url.clone()),
            "letsencrypt" => Ok(LETSENCRYPT_PRODUCTION.to_string()),
            "letsencryptstaging" | "letsencrypt_staging" => Ok(LETSENCRYPT_STAGING.to_string()),
            "custom" => {
                let endpoint = match config_str(&request.ca_access_config, "endpoint") {
                    e if e.is_empty() => config_str(&request.ca_provider_config, "endpoint"),
                    e => e,
                };
                if endpoint.is_empty() {
                    Err(CertflowError::Config("custom CA: 'endpoint' is required".into()))
                } else {
                    Ok(endpoint)
                }
            }
            other => Err(CertflowError::Config(format!("unsupported CA provider '{other}'"))),
        }
    }

    fn contact_for(&self, request: &IssuanceRequest) -> String {
        if request.contact_email.is_empty() {
            self.settings.contact_email.clone().unwrap_or_default()
        } else {
            request.contact_email.clone()
        }
    }

    async fn account(&self, directory: &str, email: &str) -> Result<Account> {
        let key = format!("{directory}|{email}");
        let mut accounts = self.accounts.lock().await;
        if let Some(account) = accounts.get(&key) {
            return Ok(account.clone());
        }

        let path = self.settings.accounts_dir.as_deref().map(|dir| credentials_path(dir, &key));
        let stored = match &path {
            Some(path) => load_credentials(path).await?,
            None => None,
        };

        let account = match stored {
            Some(credentials) => {
                debug!(directory, "Loading ACME account from storage");
                Account::builder()
                    .map_err(acme_error)?
                    .from_credentials(credentials)
                    .await
                    .map_err(acme_error)?
            }
            None => {
                info!(directory, email, "Creating ACME account");
                let contact = format!("mailto:{email}");
                let contacts: Vec<&str> = if email.is_empty() {
                    Vec::new()
                } else {
                    vec![contact.as_str()]
                };
                let (account, credentials) = Account::builder()
                    .map_err(acme_error)?
                    .create(
                        &NewAccount {
                            contact: &contacts,
                            terms_of_service_agreed: true,
                            only_return_existing: false,
                        },
                        directory.to_owned(),
                        None,
                    )
                    .await
                    .map_err(acme_error)?;
                if let Some(path) = &path {
                    store_credentials(path, &credentials).await?;
                }
                account
            }
        };

        accounts.insert(key, account.clone());
        Ok(account)
    }

    async fn issue(
        &self,
        request: &IssuanceRequest,
        solver: &dyn ChallengeSolver,
    ) -> Result<IssuedCertificate> {
        let challenge_type = request.challenge_type.as_str();
        if !challenge_type.is_empty() && !challenge_type.eq_ignore_ascii_case("dns-01") {
            return Err(CertflowError::Config(format!(
                "unsupported challenge type '{}'",
                request.challenge_type
            )));
        }
        if request.domains.is_empty() {
            return Err(CertflowError::Config("domains is required".into()));
        }
        if !config_str(&request.ca_access_config, "eabKid").is_empty() {
            return Err(CertflowError::Config(
                "external account binding is not supported".into(),
            ));
        }
        let key_pair = generate_key(&request.key_algorithm)?;
        let directory = self.directory_for(request)?;
        if !request.acme_profile.is_empty() || !request.validity_lifetime.is_empty() {
            debug!(
                profile = %request.acme_profile,
                lifetime = %request.validity_lifetime,
                "Order hints not sent"
            );
        }

        let account = self.account(&directory, &self.contact_for(request)).await?;
        let identifiers: Vec<Identifier> = request
            .domains
            .iter()
            .map(|d| Identifier::Dns(d.clone()))
            .collect();
        info!(domains = ?request.domains, directory = %directory, "Creating ACME order");
        let mut order = account
            .new_order(&NewOrder::new(&identifiers))
            .await
            .map_err(acme_error)?;

        let mut presented = Vec::new();
        let validated = validate(&mut order, request, solver, &mut presented).await;
        for record in &presented {
            if let Err(e) = solver.cleanup(record).await {
                warn!(fqdn = %record.fqdn, error = %e, "Failed to remove challenge record");
            }
        }
        validated?;

        let chain = finalize(&mut order, &request.domains, &key_pair).await?;
        let (_, issuer_certificate) = split_chain(&chain);
        info!(domains = ?request.domains, "Certificate issued");

        Ok(IssuedCertificate {
            issuer_certificate,
            certificate: chain,
            private_key: key_pair.serialize_pem(),
            acme_account_url: account.id().to_string(),
            acme_certificate_url: order.state().certificate.clone().unwrap_or_default(),
        })
    }
}

impl AcmeIssuer for AcmeClient {
    fn obtain<'a>(
        &'a self,
        request: &'a IssuanceRequest,
        solver: &'a dyn ChallengeSolver,
    ) -> BoxFuture<'a, Result<IssuedCertificate>> {
        Box::pin(self.issue(request, solver))
    }
}

/// Present every pending DNS-01 challenge, wait for propagation, then ask the
/// CA to validate and poll until the order is ready.
async fn validate(
    order: &mut Order,
    request: &IssuanceRequest,
    solver: &dyn ChallengeSolver,
    presented: &mut Vec<Dns01Challenge>,
) -> Result<()> {
    {
        let mut authorizations = order.authorizations();
        while let Some(result) = authorizations.next().await {
            let mut authz = result.map_err(acme_error)?;
            let domain = match &authz.identifier().identifier {
                Identifier::Dns(domain) => domain.clone(),
                _ => continue,
            };
            if authz.status == AuthorizationStatus::Valid {
                debug!(domain = %domain, "Authorization already valid");
                continue;
            }
            let challenge = authz.challenge(ChallengeType::Dns01).ok_or_else(|| {
                CertflowError::provider("acme", format!("no dns-01 challenge offered for {domain}"))
            })?;
            let record = Dns01Challenge::new(domain, challenge.key_authorization().dns_value());
            debug!(fqdn = %record.fqdn, ttl = request.dns_ttl, "Presenting challenge record");
            solver.present(&record).await?;
            presented.push(record);
        }
    }
    if presented.is_empty() {
        return Ok(());
    }

    if request.dns_propagation_wait > 0 {
        debug!(secs = request.dns_propagation_wait, "Waiting for DNS propagation");
        tokio::time::sleep(Duration::from_secs(request.dns_propagation_wait as u64)).await;
    }

    {
        let mut authorizations = order.authorizations();
        while let Some(result) = authorizations.next().await {
            let mut authz = result.map_err(acme_error)?;
            if authz.status != AuthorizationStatus::Pending {
                continue;
            }
            if let Some(mut challenge) = authz.challenge(ChallengeType::Dns01) {
                challenge.set_ready().await.map_err(acme_error)?;
            }
        }
    }

    let timeout = validation_timeout(request, solver);
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let state = order.refresh().await.map_err(acme_error)?;
        match state.status {
            OrderStatus::Ready | OrderStatus::Valid => return Ok(()),
            OrderStatus::Invalid => {
                let message = "order became invalid during validation";
                return Err(CertflowError::provider("acme", message));
            }
            _ => {
                if tokio::time::Instant::now() > deadline {
                    return Err(CertflowError::provider(
                        "acme",
                        format!("validation did not finish within {}s", timeout.as_secs()),
                    ));
                }
                trace!(status = ?state.status, "Order not ready yet");
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }
}

/// Submit the CSR and wait for the certificate chain.
async fn finalize(order: &mut Order, domains: &[String], key_pair: &KeyPair) -> Result<String> {
    let params = CertificateParams::new(domains.to_vec())
        .map_err(|e| CertflowError::provider("acme", format!("invalid CSR parameters: {e}")))?;
    let csr = params
        .serialize_request(key_pair)
        .map_err(|e| CertflowError::provider("acme", format!("failed to build CSR: {e}")))?;
    order.finalize_csr(csr.der()).await.map_err(acme_error)?;

    let deadline = tokio::time::Instant::now() + FINALIZE_TIMEOUT;
    loop {
        let state = order.refresh().await.map_err(acme_error)?;
        match state.status {
            OrderStatus::Valid => {
                return order
                    .certificate()
                    .await
                    .map_err(acme_error)?
                    .ok_or_else(|| CertflowError::provider("acme", "no certificate in response"));
            }
            OrderStatus::Invalid => {
                let message = "order became invalid during finalization";
                return Err(CertflowError::provider("acme", message));
            }
            _ => {
                if tokio::time::Instant::now() > deadline {
                    let message = "timed out waiting for certificate";
                    return Err(CertflowError::provider("acme", message));
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

fn validation_timeout(request: &IssuanceRequest, solver: &dyn ChallengeSolver) -> Duration {
    if request.dns_propagation_timeout > 0 {
        return Duration::from_secs(request.dns_propagation_timeout as u64);
    }
    solver.propagation_timeout().unwrap_or(DEFAULT_VALIDATION_TIMEOUT)
}

/// Key pair for the certificate, named the way bizApply nodes name algorithms.
fn generate_key(algorithm: &str) -> Result<KeyPair> {
    let generated = match algorithm.to_ascii_uppercase().as_str() {
        "EC256" => KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256),
        "EC384" => KeyPair::generate_for(&rcgen::PKCS_ECDSA_P384_SHA384),
        "" | "RSA2048" => KeyPair::generate_rsa_for(&rcgen::PKCS_RSA_SHA256, RsaKeySize::_2048),
        "RSA3072" => KeyPair::generate_rsa_for(&rcgen::PKCS_RSA_SHA256, RsaKeySize::_3072),
        "RSA4096" => KeyPair::generate_rsa_for(&rcgen::PKCS_RSA_SHA256, RsaKeySize::_4096),
        other => return Err(CertflowError::Config(format!("unsupported key algorithm '{other}'"))),
    };
    generated.map_err(|e| CertflowError::provider("acme", format!("key generation failed: {e}")))
}

/// Leaf block and the rest of a PEM chain.
fn split_chain(chain: &str) -> (String, String) {
    const END: &str = "-----END CERTIFICATE-----";
    match chain.find(END) {
        Some(idx) => {
            let split = idx + END.len();
            (chain[..split].trim().to_string(), chain[split..].trim().to_string())
        }
        None => (chain.trim().to_string(), String::new()),
    }
}

fn credentials_path(dir: &Path, key: &str) -> PathBuf {
    let name: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    dir.join(format!("{name}.json"))
}

async fn load_credentials(path: &Path) -> Result<Option<AccountCredentials>> {
    match tokio::fs::read_to_string(path).await {
        Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn store_credentials(path: &Path, credentials: &AccountCredentials) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, serde_json::to_string_pretty(credentials)?).await?;
    Ok(())
}

fn acme_error(e: instant_acme::Error) -> CertflowError {
    CertflowError::provider("acme", e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> AcmeClient {
        AcmeClient::new(AcmeSettings {
            directory_url: "https://ca.internal/directory".into(),
            contact_email: Some("certs@example.org".into()),
            accounts_dir: None,
        })
    }

    #[test]
    fn test_directory_resolution() {
        let client = client();
        let mut request = IssuanceRequest::default();
        assert_eq!(client.directory_for(&request).unwrap(), "https://ca.internal/directory");

        request.ca_provider = "letsencryptstaging".into();
        assert_eq!(client.directory_for(&request).unwrap(), LETSENCRYPT_STAGING);

        request.ca_provider = "custom".into();
        assert!(matches!(client.directory_for(&request), Err(CertflowError::Config(_))));
        request.ca_provider_config = json!({"endpoint": "https://acme.example.net/dir"})
            .as_object()
            .cloned()
            .unwrap();
        assert_eq!(client.directory_for(&request).unwrap(), "https://acme.example.net/dir");

        request.ca_provider = "buypass".into();
        assert!(client.directory_for(&request).is_err());
    }

    #[test]
    fn test_settings_read_acme_section() {
        let config = AppConfig::parse(
            r#"
[engine]
workspace = "/srv/certflow"

[acme]
directory_url = "https://ca.internal/directory"
contact_email = "certs@example.org"
"#,
        )
        .unwrap();
        let settings = AcmeSettings::from(&config);
        assert_eq!(settings.directory_url, "https://ca.internal/directory");
        assert_eq!(settings.contact_email.as_deref(), Some("certs@example.org"));
        assert_eq!(settings.accounts_dir, Some(PathBuf::from("/srv/certflow/acme")));
    }

    #[test]
    fn test_contact_falls_back_to_settings() {
        let client = client();
        let mut request = IssuanceRequest::default();
        assert_eq!(client.contact_for(&request), "certs@example.org");
        request.contact_email = "ops@example.com".into();
        assert_eq!(client.contact_for(&request), "ops@example.com");
    }

    #[test]
    fn test_key_generation_by_algorithm() {
        let ec = generate_key("EC256").unwrap();
        assert!(ec.serialize_pem().contains("PRIVATE KEY"));
        assert!(generate_key("ec384").is_ok());
        assert!(matches!(generate_key("EC512"), Err(CertflowError::Config(_))));
    }

    #[test]
    fn test_split_chain() {
        let chain = concat!(
            "-----BEGIN CERTIFICATE-----\nLEAF\n-----END CERTIFICATE-----\n",
            "-----BEGIN CERTIFICATE-----\nCA\n-----END CERTIFICATE-----\n",
        );
        let (leaf, rest) = split_chain(chain);
        assert!(leaf.contains("LEAF") && !leaf.contains("CA\n"));
        assert!(rest.starts_with("-----BEGIN CERTIFICATE-----\nCA"));
        assert_eq!(split_chain("PEM").1, "");
    }

    #[test]
    fn test_credentials_path_is_flat() {
        let path = credentials_path(Path::new("/var/acme"), "https://ca.test/dir|a@b.c");
        assert_eq!(path.parent(), Some(Path::new("/var/acme")));
        assert!(!path.file_name().unwrap().to_string_lossy().contains('/'));
    }

    #[test]
    fn test_validation_timeout_precedence() {
        struct Fixed;
        impl ChallengeSolver for Fixed {
            fn present<'a>(&'a self, _: &'a Dns01Challenge) -> BoxFuture<'a, Result<()>> {
                Box::pin(async { Ok(()) })
            }
            fn cleanup<'a>(&'a self, _: &'a Dns01Challenge) -> BoxFuture<'a, Result<()>> {
                Box::pin(async { Ok(()) })
            }
            fn propagation_timeout(&self) -> Option<Duration> {
                Some(Duration::from_secs(45))
            }
        }
        let mut request = IssuanceRequest::default();
        assert_eq!(validation_timeout(&request, &Fixed), Duration::from_secs(45));
        request.dns_propagation_timeout = 300;
        assert_eq!(validation_timeout(&request, &Fixed), Duration::from_secs(300));
    }
}
