use chrono::Utc;
use futures::future::BoxFuture;
use tracing::warn;

use certflow_core::error::{CertflowError, Result};
use certflow_core::node::NodeKind;
use certflow_core::traits::MonitorTarget;
use certflow_core::types::*;

use super::NodeExecutor;
use crate::context::{NodeExecutionContext, NodeExecutionResult};

/// bizMonitor: inspect the certificate a live endpoint presents.
pub struct MonitorExecutor;

impl NodeExecutor for MonitorExecutor {
    fn execute<'a>(
        &'a self,
        ctx: NodeExecutionContext<'a>,
    ) -> BoxFuture<'a, Result<NodeExecutionResult>> {
        Box::pin(async move {
            let NodeKind::BizMonitor(cfg) = &ctx.node.kind else {
                return Err(CertflowError::Config("not a bizMonitor node".into()));
            };
            if cfg.host.is_empty() {
                return Err(CertflowError::Config("host is required".into()));
            }

            let target = MonitorTarget {
                host: cfg.host.clone(),
                port: cfg.port,
                domain: cfg.domain.clone(),
                path: cfg.path.clone(),
            };
            let observation = ctx
                .run
                .cancellable(ctx.services().probe.probe(&target))
                .await?;
            let info = observation.certificate.ok_or_else(|| {
                CertflowError::provider(
                    "monitor",
                    format!("no certificate presented by {}:{}", target.host, target.port),
                )
            })?;

            let now = Utc::now();
            if !info.subject_alt_names.iter().any(|san| san_matches(san, &target.domain)) {
                warn!(
                    node_id = %ctx.node.id,
                    domain = %target.domain,
                    "Certificate does not cover monitored domain"
                );
                ctx.run
                    .log(
                        Some(ctx.node),
                        LogLevel::Warn,
                        format!("certificate does not cover {}", target.domain),
                    )
                    .await;
            }

            let outputs = OutputEntry::validity_of(info.valid_to, now);
            let message = match info.valid_to {
                Some(valid_to) if valid_to <= now => {
                    let message = format!("certificate expired at {valid_to}");
                    ctx.run.log(Some(ctx.node), LogLevel::Warn, message.clone()).await;
                    message
                }
                Some(valid_to) => {
                    format!("certificate valid for {} day(s)", (valid_to - now).num_days())
                }
                None => "certificate validity unknown".to_string(),
            };
            Ok(NodeExecutionResult {
                outputs,
                message: Some(message),
                ..NodeExecutionResult::completed()
            })
        })
    }
}

/// Exact or single-label wildcard match, case-insensitive.
fn san_matches(san: &str, domain: &str) -> bool {
    let san = san.to_ascii_lowercase();
    let domain = domain.to_ascii_lowercase();
    if san == domain {
        return true;
    }
    match san.strip_prefix("*.") {
        Some(suffix) => domain
            .split_once('.')
            .is_some_and(|(label, rest)| !label.is_empty() && rest == suffix),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_san_matching() {
        assert!(san_matches("example.com", "EXAMPLE.com"));
        assert!(san_matches("*.example.com", "www.example.com"));
        assert!(!san_matches("*.example.com", "a.b.example.com"));
        assert!(!san_matches("*.example.com", "example.com"));
        assert!(!san_matches("example.org", "example.com"));
    }
}
