use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use tracing::{debug, warn};

use certflow_core::error::{CertflowError, Result};
use certflow_core::node::{NodeKind, NodeType, WorkflowNode};
use certflow_core::types::LogLevel;

use super::NodeExecutor;
use crate::context::{NodeExecutionContext, NodeExecutionResult, RunContext};

/// start / end.
pub struct MarkerExecutor;

impl NodeExecutor for MarkerExecutor {
    fn execute<'a>(
        &'a self,
        _ctx: NodeExecutionContext<'a>,
    ) -> BoxFuture<'a, Result<NodeExecutionResult>> {
        Box::pin(async { Ok(NodeExecutionResult::completed()) })
    }
}

/// branchBlock / tryBlock / catchBlock: run the nested sequence.
pub struct BlockExecutor;

impl NodeExecutor for BlockExecutor {
    fn execute<'a>(
        &'a self,
        ctx: NodeExecutionContext<'a>,
    ) -> BoxFuture<'a, Result<NodeExecutionResult>> {
        Box::pin(async move {
            ctx.runner.run_sequence(&ctx.node.blocks, ctx.run).await?;
            Ok(NodeExecutionResult::completed())
        })
    }
}

pub struct DelayExecutor;

impl NodeExecutor for DelayExecutor {
    fn execute<'a>(
        &'a self,
        ctx: NodeExecutionContext<'a>,
    ) -> BoxFuture<'a, Result<NodeExecutionResult>> {
        Box::pin(async move {
            let wait = match &ctx.node.kind {
                NodeKind::Delay(cfg) => cfg.wait,
                _ => 0,
            };
            ctx.run
                .log(
                    Some(ctx.node),
                    LogLevel::Info,
                    format!("delay for {wait} second(s) before continuing"),
                )
                .await;
            ctx.run
                .cancellable(async {
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                    Ok(())
                })
                .await?;
            Ok(NodeExecutionResult::completed())
        })
    }
}

/// Guarded fan-out: every branch whose guard holds runs, concurrently.
///
/// All guards are evaluated before any branch starts; a guard that cannot be
/// evaluated fails the condition node.
pub struct ConditionExecutor;

impl NodeExecutor for ConditionExecutor {
    fn execute<'a>(
        &'a self,
        ctx: NodeExecutionContext<'a>,
    ) -> BoxFuture<'a, Result<NodeExecutionResult>> {
        Box::pin(async move {
            let mut selected = Vec::new();
            for branch in ctx.node.blocks_of(NodeType::BranchBlock) {
                if guard_holds(ctx.run, branch).await? {
                    selected.push(branch);
                } else {
                    debug!(node_id = %branch.id, "Branch guard false");
                    ctx.run
                        .log(Some(branch), LogLevel::Info, "branch not taken")
                        .await;
                }
            }

            let results = join_all(
                selected
                    .iter()
                    .map(|branch| ctx.runner.run_node(branch, ctx.run)),
            )
            .await;
            // First failure in declaration order wins.
            results.into_iter().collect::<Result<Vec<()>>>()?;

            Ok(NodeExecutionResult {
                message: Some(format!("{} branch(es) taken", selected.len())),
                ..NodeExecutionResult::completed()
            })
        })
    }
}

/// An absent guard holds.
async fn guard_holds(run: &RunContext, branch: &WorkflowNode) -> Result<bool> {
    let NodeKind::BranchBlock(cfg) = &branch.kind else {
        return Ok(false);
    };
    let Some(expression) = &cfg.expression else {
        return Ok(true);
    };
    match run.services.evaluator.evaluate(expression, &run.variables()) {
        Ok(holds) => Ok(holds),
        Err(e) => {
            warn!(node_id = %branch.id, error = %e, "Guard evaluation failed");
            run.log(Some(branch), LogLevel::Error, format!("invalid guard: {e}"))
                .await;
            Err(e)
        }
    }
}

/// Runs the tryBlock; on failure runs the catchBlock instead.
pub struct TryCatchExecutor;

impl NodeExecutor for TryCatchExecutor {
    fn execute<'a>(
        &'a self,
        ctx: NodeExecutionContext<'a>,
    ) -> BoxFuture<'a, Result<NodeExecutionResult>> {
        Box::pin(async move {
            let try_block = ctx.node.blocks_of(NodeType::TryBlock).next().ok_or_else(|| {
                CertflowError::GraphIntegrity(format!("tryCatch '{}' has no tryBlock", ctx.node.id))
            })?;

            let err = match ctx.runner.run_node(try_block, ctx.run).await {
                Ok(()) => return Ok(NodeExecutionResult::completed()),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => e,
            };

            warn!(node_id = %ctx.node.id, error = %err, "Caught failure in tryBlock");
            ctx.run
                .log(Some(ctx.node), LogLevel::Warn, format!("caught: {err}"))
                .await;

            if let Some(catch_block) = ctx.node.blocks_of(NodeType::CatchBlock).next() {
                ctx.runner.run_node(catch_block, ctx.run).await?;
            }
            Ok(NodeExecutionResult {
                message: Some("recovered by catchBlock".into()),
                ..NodeExecutionResult::completed()
            })
        })
    }
}
