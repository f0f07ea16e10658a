use chrono::Utc;
use futures::future::BoxFuture;

use certflow_core::error::{CertflowError, Result};
use certflow_core::node::{NodeKind, UploadConfig, UploadSource};
use certflow_core::types::*;

use super::{new_certificate, NodeExecutor};
use crate::context::{EngineServices, NodeExecutionContext, NodeExecutionResult};

/// bizUpload: ingest existing certificate material.
pub struct UploadExecutor;

impl NodeExecutor for UploadExecutor {
    fn execute<'a>(
        &'a self,
        ctx: NodeExecutionContext<'a>,
    ) -> BoxFuture<'a, Result<NodeExecutionResult>> {
        Box::pin(async move {
            let NodeKind::BizUpload(cfg) = &ctx.node.kind else {
                return Err(CertflowError::Config("not a bizUpload node".into()));
            };
            let services = ctx.services();
            let (certificate_pem, private_key_pem) =
                ctx.run.cancellable(load_material(services, cfg)).await?;
            if certificate_pem.trim().is_empty() {
                return Err(CertflowError::Config("certificate is required".into()));
            }
            if private_key_pem.trim().is_empty() {
                return Err(CertflowError::Config("private key is required".into()));
            }

            let info = services.inspector.inspect(&certificate_pem)?;
            services.inspector.validate_private_key(&private_key_pem)?;
            let now = Utc::now();

            // Same material as last time: keep pointing at the stored record.
            if let Some(last) = services
                .certificates
                .get_latest_by_workflow_node(&ctx.run.workflow_id, &ctx.node.id)
                .await?
            {
                if last.certificate.trim() == certificate_pem.trim()
                    && last.private_key.trim() == private_key_pem.trim()
                {
                    let mut outputs = vec![OutputEntry::certificate_ref(&last.id)];
                    outputs.extend(OutputEntry::validity_of(last.valid_to, now));
                    return Ok(NodeExecutionResult::skipped(
                        format!("certificate unchanged, reusing {}", last.id),
                        outputs,
                    ));
                }
            }

            let chain = chain_of(&certificate_pem);
            let certificate = new_certificate(
                &ctx,
                CertificateSource::Upload,
                info,
                certificate_pem,
                chain,
                private_key_pem,
            );

            let mut outputs = vec![OutputEntry::certificate_ref(&certificate.id)];
            outputs.extend(OutputEntry::validity_of(certificate.valid_to, now));
            Ok(NodeExecutionResult {
                outputs,
                message: Some(format!("stored certificate {}", certificate.id)),
                certificate: Some(certificate),
                skipped: false,
            })
        })
    }
}

async fn load_material(services: &EngineServices, cfg: &UploadConfig) -> Result<(String, String)> {
    let source = UploadSource::parse(&cfg.source)
        .ok_or_else(|| {
            CertflowError::Config(format!("unsupported upload source '{}'", cfg.source))
        })?;
    match source {
        UploadSource::Form => Ok((cfg.certificate.clone(), cfg.private_key.clone())),
        UploadSource::Local => {
            let certificate = tokio::fs::read_to_string(&cfg.certificate).await?;
            let private_key = tokio::fs::read_to_string(&cfg.private_key).await?;
            Ok((certificate, private_key))
        }
        UploadSource::Url => {
            let certificate = fetch(&services.http, &cfg.certificate).await?;
            let private_key = fetch(&services.http, &cfg.private_key).await?;
            Ok((certificate, private_key))
        }
    }
}

async fn fetch(http: &reqwest::Client, url: &str) -> Result<String> {
    if url.is_empty() {
        return Ok(String::new());
    }
    let resp = http
        .get(url)
        .send()
        .await
        .map_err(|e| CertflowError::Http(e.to_string()))?;
    if !resp.status().is_success() {
        return Err(CertflowError::Http(format!("GET {url} returned {}", resp.status())));
    }
    resp.text().await.map_err(|e| CertflowError::Http(e.to_string()))
}

/// Everything after the leaf block of a PEM bundle.
fn chain_of(pem: &str) -> String {
    const END: &str = "-----END CERTIFICATE-----";
    pem.find(END)
        .map(|idx| pem[idx + END.len()..].trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_of_bundle() {
        let bundle = concat!(
            "-----BEGIN CERTIFICATE-----\nA\n-----END CERTIFICATE-----\n",
            "-----BEGIN CERTIFICATE-----\nB\n-----END CERTIFICATE-----\n",
        );
        let chain = chain_of(bundle);
        assert!(chain.starts_with("-----BEGIN CERTIFICATE-----\nB"));
        assert!(!chain.contains("\nA\n"));
        assert!(chain_of("PEM_A").is_empty());
    }
}
