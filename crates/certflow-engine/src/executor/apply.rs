use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::info;

use certflow_core::error::{CertflowError, Result};
use certflow_core::node::{ApplyConfig, NodeKind};
use certflow_core::registry::{ChallengeProviderType, ProviderFactoryOptions};
use certflow_core::traits::IssuanceRequest;
use certflow_core::types::*;

use super::{new_certificate, NodeExecutor};
use crate::context::{NodeExecutionContext, NodeExecutionResult};

/// bizApply: obtain or renew a certificate over ACME.
pub struct ApplyExecutor;

impl NodeExecutor for ApplyExecutor {
    fn execute<'a>(
        &'a self,
        ctx: NodeExecutionContext<'a>,
    ) -> BoxFuture<'a, Result<NodeExecutionResult>> {
        Box::pin(async move {
            let NodeKind::BizApply(cfg) = &ctx.node.kind else {
                return Err(CertflowError::Config("not a bizApply node".into()));
            };
            if cfg.domains.is_empty() {
                return Err(CertflowError::Config("domains is required".into()));
            }

            let last = last_certificate(&ctx, cfg).await?;
            if let Some(last) = &last {
                if let Some(result) = check_skip(cfg, last) {
                    return Ok(result);
                }
            }

            let services = ctx.services();
            let issuer = services
                .issuer
                .as_ref()
                .ok_or_else(|| CertflowError::Config("no ACME issuer configured".into()))?;
            if cfg.provider.is_empty() {
                return Err(CertflowError::Config("challenge provider is required".into()));
            }

            let options = ProviderFactoryOptions::new(
                services.access_config(&cfg.provider_access_id).await?,
                solver_config(cfg),
            );
            let solver = services
                .registries
                .challenge_solvers
                .create(&ChallengeProviderType::new(cfg.provider.clone()), &options)?;

            let request = IssuanceRequest {
                domains: cfg.domains.clone(),
                contact_email: cfg.contact_email.clone(),
                challenge_type: cfg.challenge_type.clone(),
                key_algorithm: cfg.key_algorithm.clone(),
                ca_provider: cfg.ca_provider.clone(),
                ca_access_config: services.access_config(&cfg.ca_provider_access_id).await?,
                ca_provider_config: cfg.ca_provider_config.clone(),
                validity_lifetime: cfg.validity_lifetime.clone(),
                acme_profile: cfg.acme_profile.clone(),
                nameservers: cfg.nameservers.clone(),
                dns_propagation_wait: cfg.dns_propagation_wait,
                dns_propagation_timeout: cfg.dns_propagation_timeout,
                dns_ttl: cfg.dns_ttl,
                http_delay_wait: cfg.http_delay_wait,
                disable_follow_cname: cfg.disable_follow_cname,
                disable_ari: cfg.disable_ari,
                replaces_certificate_url: last
                    .as_ref()
                    .filter(|c| !cfg.disable_ari && !c.acme_certificate_url.is_empty())
                    .map(|c| c.acme_certificate_url.clone()),
            };

            info!(
                node_id = %ctx.node.id,
                domains = ?cfg.domains,
                provider = %cfg.provider,
                "Requesting certificate"
            );
            ctx.run
                .log(
                    Some(ctx.node),
                    LogLevel::Info,
                    format!("requesting certificate for {}", cfg.domains.join(";")),
                )
                .await;

            let issued = ctx
                .run
                .cancellable(issuer.obtain(&request, &*solver))
                .await?;
            let info = services.inspector.inspect(&issued.certificate)?;

            let mut certificate = new_certificate(
                &ctx,
                CertificateSource::Request,
                info,
                issued.certificate,
                issued.issuer_certificate,
                issued.private_key,
            );
            certificate.acme_account_url = issued.acme_account_url;
            certificate.acme_certificate_url = issued.acme_certificate_url;
            certificate.renewed_from_id = last.map(|c| c.id);

            let mut outputs = vec![OutputEntry::certificate_ref(&certificate.id)];
            outputs.extend(OutputEntry::validity_of(certificate.valid_to, Utc::now()));
            Ok(NodeExecutionResult {
                outputs,
                message: Some(format!("issued certificate {}", certificate.id)),
                certificate: Some(certificate),
                skipped: false,
            })
        })
    }
}

/// Newest certificate this node issued, if it still covers the configured
/// domain set with the configured key algorithm. Failed attempts store no
/// certificate, so they never hide an earlier valid one.
async fn last_certificate(
    ctx: &NodeExecutionContext<'_>,
    cfg: &ApplyConfig,
) -> Result<Option<Certificate>> {
    let last = ctx
        .services()
        .certificates
        .get_latest_by_workflow_node(&ctx.run.workflow_id, &ctx.node.id)
        .await?;
    Ok(last.filter(|c| {
        same_domains(&c.subject_alt_names, &cfg.domains)
            && c.key_algorithm.eq_ignore_ascii_case(&cfg.key_algorithm)
    }))
}

fn same_domains(a: &[String], b: &[String]) -> bool {
    let normalize = |names: &[String]| {
        let mut names: Vec<String> = names.iter().map(|n| n.trim().to_ascii_lowercase()).collect();
        names.sort();
        names.dedup();
        names
    };
    normalize(a) == normalize(b)
}

/// Skip renewal while the last certificate has more than
/// `skipBeforeExpiryDays` days left; the prior reference is reused.
fn check_skip(cfg: &ApplyConfig, last: &Certificate) -> Option<NodeExecutionResult> {
    if cfg.skip_before_expiry_days <= 0 {
        return None;
    }
    let now = Utc::now();
    let days_left = last.days_left(now)?;
    if !last.is_valid_at(now) || days_left <= cfg.skip_before_expiry_days {
        return None;
    }

    let mut outputs = vec![OutputEntry::certificate_ref(&last.id)];
    outputs.extend(OutputEntry::validity_of(last.valid_to, now));
    Some(NodeExecutionResult::skipped(
        format!(
            "certificate {} still valid for {days_left} day(s), renewal skipped",
            last.id
        ),
        outputs,
    ))
}

/// Node provider config plus the DNS settings the solver is built with.
fn solver_config(cfg: &ApplyConfig) -> ConfigMap {
    let mut config = cfg.provider_config.clone();
    if cfg.dns_ttl > 0 {
        config.entry("dnsTTL").or_insert(Value::from(cfg.dns_ttl));
    }
    if cfg.dns_propagation_timeout > 0 {
        config
            .entry("dnsPropagationTimeout")
            .or_insert(Value::from(cfg.dns_propagation_timeout));
    }
    config
}
