use futures::future::BoxFuture;
use tracing::{debug, info};

use certflow_core::error::Result;
use certflow_core::registry::ProviderFactoryOptions;
use certflow_core::traits::{CertificateMaterial, DeployReceipt, Deployer};

use crate::util::{HttpSettings, WebhookSettings};

/// Pushes certificate material to an HTTP endpoint.
///
/// Without a body template the request carries a JSON object with
/// `certificate`, `serverCertificate`, `intermediaCertificate`, `privateKey`,
/// `domain` and `domains`.
pub struct WebhookDeployer {
    settings: WebhookSettings,
    http: HttpSettings,
}

impl WebhookDeployer {
    pub fn new(options: &ProviderFactoryOptions, http: HttpSettings) -> Result<Self> {
        Ok(Self {
            settings: WebhookSettings::merge(
                "webhook",
                &options.access_config,
                &options.provider_config,
            )?,
            http,
        })
    }
}

/// Split a PEM bundle into the leaf certificate and the rest of the chain.
fn split_chain(bundle: &str) -> (String, String) {
    const END: &str = "-----END CERTIFICATE-----";
    match bundle.find(END) {
        Some(pos) => {
            let (leaf, rest) = bundle.split_at(pos + END.len());
            (leaf.trim().to_string(), rest.trim().to_string())
        }
        None => (bundle.trim().to_string(), String::new()),
    }
}

impl Deployer for WebhookDeployer {
    fn deploy<'a>(
        &'a self,
        material: &'a CertificateMaterial,
    ) -> BoxFuture<'a, Result<DeployReceipt>> {
        Box::pin(async move {
            let (server, mut intermediate) = split_chain(&material.certificate);
            if intermediate.is_empty() {
                intermediate = material.issuer_certificate.trim().to_string();
            }
            let domain = material.subject_alt_names.first().cloned().unwrap_or_default();
            let domains = material.subject_alt_names.join(";");

            debug!(
                url = %self.settings.url,
                certificate_id = %material.certificate_id,
                "Deploying via webhook"
            );

            let vars = [
                ("CERTIFICATE", material.certificate.as_str()),
                ("SERVER_CERTIFICATE", server.as_str()),
                ("INTERMEDIA_CERTIFICATE", intermediate.as_str()),
                ("PRIVATE_KEY", material.private_key.as_str()),
                ("DOMAIN", domain.as_str()),
                ("DOMAINS", domains.as_str()),
            ];
            let response = self.settings.send("webhook", &self.http, &vars).await?;
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();

            info!(url = %self.settings.url, status, "Webhook deployment accepted");
            Ok(DeployReceipt {
                summary: format!("webhook responded with HTTP {status}"),
                detail: Some(serde_json::json!({ "status": status, "response": body })),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_chain() {
        let bundle = concat!(
            "-----BEGIN CERTIFICATE-----\nA\n-----END CERTIFICATE-----\n",
            "-----BEGIN CERTIFICATE-----\nB\n-----END CERTIFICATE-----\n",
        );
        let (leaf, chain) = split_chain(bundle);
        assert!(leaf.ends_with("-----END CERTIFICATE-----"));
        assert!(leaf.contains("\nA\n"));
        assert!(chain.contains("\nB\n"));

        let (leaf, chain) = split_chain("PEM_A");
        assert_eq!(leaf, "PEM_A");
        assert!(chain.is_empty());
    }
}
