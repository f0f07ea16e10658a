use futures::future::BoxFuture;
use tracing::info;

use certflow_core::error::{CertflowError, Result};
use certflow_core::node::NodeKind;
use certflow_core::registry::{NotificationProviderType, ProviderFactoryOptions};

use super::NodeExecutor;
use crate::context::{NodeExecutionContext, NodeExecutionResult};

/// bizNotify: send a subject and message through a notifier.
pub struct NotifyExecutor;

impl NodeExecutor for NotifyExecutor {
    fn execute<'a>(
        &'a self,
        ctx: NodeExecutionContext<'a>,
    ) -> BoxFuture<'a, Result<NodeExecutionResult>> {
        Box::pin(async move {
            let NodeKind::BizNotify(cfg) = &ctx.node.kind else {
                return Err(CertflowError::Config("not a bizNotify node".into()));
            };
            if cfg.skip_on_all_prev_skipped && ctx.run.all_prior_biz_skipped() {
                return Ok(NodeExecutionResult::skipped(
                    "all previous nodes were skipped",
                    vec![],
                ));
            }
            if cfg.provider.is_empty() {
                return Err(CertflowError::Config("notify provider is required".into()));
            }

            let services = ctx.services();
            let options = ProviderFactoryOptions::new(
                services.access_config(&cfg.provider_access_id).await?,
                cfg.provider_config.clone(),
            );
            let notifier = services
                .registries
                .notifiers
                .create(&NotificationProviderType::new(cfg.provider.clone()), &options)?;

            info!(node_id = %ctx.node.id, provider = %cfg.provider, "Sending notification");
            ctx.run
                .cancellable(notifier.notify(&cfg.subject, &cfg.message))
                .await?;
            Ok(NodeExecutionResult {
                message: Some("notification sent".into()),
                ..NodeExecutionResult::completed()
            })
        })
    }
}
