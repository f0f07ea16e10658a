use futures::future::BoxFuture;
use serde_json::Value;
use tracing::info;

use certflow_core::error::{CertflowError, Result};
use certflow_core::node::NodeKind;
use certflow_core::registry::{DeploymentProviderType, ProviderFactoryOptions};
use certflow_core::traits::CertificateMaterial;
use certflow_core::types::*;

use super::NodeExecutor;
use crate::context::{NodeExecutionContext, NodeExecutionResult};

/// Output of a bizDeploy node: reference to the certificate it deployed.
pub const OUTPUT_DEPLOYED: &str = "deployed";

/// bizDeploy: push a certificate produced earlier in the run to a target.
pub struct DeployExecutor;

impl NodeExecutor for DeployExecutor {
    fn execute<'a>(
        &'a self,
        ctx: NodeExecutionContext<'a>,
    ) -> BoxFuture<'a, Result<NodeExecutionResult>> {
        Box::pin(async move {
            let NodeKind::BizDeploy(cfg) = &ctx.node.kind else {
                return Err(CertflowError::Config("not a bizDeploy node".into()));
            };
            if cfg.certificate_output_node_id.is_empty() {
                return Err(CertflowError::Config("certificateOutputNodeId is required".into()));
            }
            if cfg.provider.is_empty() {
                return Err(CertflowError::Config("deploy provider is required".into()));
            }
            let services = ctx.services();

            let source = services
                .outputs
                .get(&ctx.run.run_id, &cfg.certificate_output_node_id)
                .await?
                .ok_or_else(|| {
                    CertflowError::Config(format!(
                        "node '{}' has no output in this run",
                        cfg.certificate_output_node_id
                    ))
                })?;
            let certificate_id = source.certificate_id().ok_or_else(|| {
                CertflowError::Config(format!(
                    "output of node '{}' carries no certificate",
                    cfg.certificate_output_node_id
                ))
            })?;
            let certificate = services.certificates.get(certificate_id).await?;
            let reference = certificate.reference();

            if cfg.skip_on_last_succeeded {
                if let Some(last) = services
                    .outputs
                    .get_latest_terminal(&ctx.run.workflow_id, &ctx.node.id)
                    .await?
                {
                    let same_certificate = last
                        .get(OUTPUT_DEPLOYED)
                        .is_some_and(|o| o.value.as_str() == Some(reference.as_str()));
                    let same_config = last.node_config == ctx.node.config_snapshot();
                    if last.succeeded && same_certificate && same_config {
                        let message = format!(
                            "certificate {} already deployed by run {}",
                            certificate.id, last.run_id
                        );
                        return Ok(NodeExecutionResult::skipped(message, last.outputs));
                    }
                }
            }

            let options = ProviderFactoryOptions::new(
                services.access_config(&cfg.provider_access_id).await?,
                cfg.provider_config.clone(),
            );
            let deployer = services
                .registries
                .deployers
                .create(&DeploymentProviderType::new(cfg.provider.clone()), &options)?;

            info!(
                node_id = %ctx.node.id,
                provider = %cfg.provider,
                certificate_id = %certificate.id,
                "Deploying certificate"
            );
            let material = CertificateMaterial::from(&certificate);
            let receipt = ctx.run.cancellable(deployer.deploy(&material)).await?;
            if let Some(detail) = receipt.detail.clone() {
                ctx.run
                    .log_with_detail(
                        Some(ctx.node),
                        LogLevel::Debug,
                        "deployer response",
                        Some(detail),
                    )
                    .await;
            }

            Ok(NodeExecutionResult {
                outputs: vec![OutputEntry {
                    name: OUTPUT_DEPLOYED.to_string(),
                    value_type: OutputValueType::Ref,
                    value: Value::String(reference),
                }],
                message: Some(receipt.summary),
                ..NodeExecutionResult::completed()
            })
        })
    }
}
