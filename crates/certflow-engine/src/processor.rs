use std::time::Instant;

use futures::future::BoxFuture;
use tracing::{debug, error, info};

use certflow_core::error::{CertflowError, Result};
use certflow_core::event::RunEvent;
use certflow_core::node::WorkflowNode;
use certflow_core::types::{LogLevel, WorkflowOutput};

use crate::context::{NodeExecutionContext, NodeExecutionResult, RunContext, SequenceRunner};
use crate::executor::executor_for;

/// Walks a graph, dispatching every node to its executor.
///
/// Business-node outputs are persisted as soon as the node finishes, before
/// the next node in the sequence starts.
#[derive(Debug, Default, Clone, Copy)]
pub struct WorkflowProcessor;

impl WorkflowProcessor {
    async fn process(&self, node: &WorkflowNode, run: &RunContext) -> Result<()> {
        if run.cancel.is_cancelled() {
            return Err(CertflowError::Cancelled.in_node(&node.id, &node.name));
        }

        let node_type = node.node_type();
        if node.disabled {
            debug!(run_id = %run.run_id, node_id = %node.id, "Node disabled, skipping");
            run.log(Some(node), LogLevel::Info, "node is disabled, skipped").await;
            if node_type.is_biz() {
                run.record_biz(node_type, true);
            }
            self.publish_completed(node, run, true);
            return Ok(());
        }

        run.services.event_bus.publish(RunEvent::NodeStarted {
            run_id: run.run_id.clone(),
            node_id: node.id.clone(),
            node_name: node.name.clone(),
            node_type,
        });
        if node_type.is_biz() {
            run.log(Some(node), LogLevel::Info, format!("{node_type} node started")).await;
        }

        let started = Instant::now();
        let ctx = NodeExecutionContext { node, run, runner: self };
        let outcome = executor_for(node_type).execute(ctx).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                if node_type.is_biz() {
                    if let Err(e) = self.persist(node, run, &result).await {
                        error!(
                            run_id = %run.run_id,
                            node_id = %node.id,
                            error = %e,
                            "Output not persisted"
                        );
                        self.report_failure(node, run, format!("output not persisted: {e}")).await;
                        return Err(e.in_node(&node.id, &node.name));
                    }
                    run.publish_outputs(&node.id, &result.outputs);
                    run.record_biz(node_type, result.skipped);
                }
                if result.skipped {
                    info!(run_id = %run.run_id, node_id = %node.id, elapsed_ms, "Node skipped");
                    let reason = result.message.as_deref().unwrap_or("no work needed");
                    run.log(Some(node), LogLevel::Info, format!("skipped: {reason}")).await;
                } else if node_type.is_biz() {
                    info!(run_id = %run.run_id, node_id = %node.id, elapsed_ms, "Node completed");
                    let message = result.message.as_deref().unwrap_or("completed");
                    let line = format!("{node_type} node completed: {message}");
                    run.log(Some(node), LogLevel::Info, line).await;
                } else {
                    debug!(run_id = %run.run_id, node_id = %node.id, elapsed_ms, "Node completed");
                }
                self.publish_completed(node, run, result.skipped);
                Ok(())
            }
            Err(e) => {
                let own_failure = e.node_id().is_none();
                let e = e.in_node(&node.id, &node.name);
                if e.is_cancelled() {
                    if own_failure {
                        run.log(Some(node), LogLevel::Warn, "cancelled").await;
                    }
                    return Err(e);
                }
                if own_failure {
                    error!(run_id = %run.run_id, node_id = %node.id, error = %e, "Node failed");
                    if node_type.is_biz() {
                        let mut output = WorkflowOutput::new(
                            &run.workflow_id,
                            &run.run_id,
                            &node.id,
                            node.config_snapshot(),
                        );
                        output.succeeded = false;
                        if let Err(save_err) = run.services.outputs.save(&output).await {
                            error!(
                                node_id = %node.id,
                                error = %save_err,
                                "Failed to persist failed output"
                            );
                        }
                        run.record_biz(node_type, false);
                    }
                    let message = match &e {
                        CertflowError::NodeFailed { source, .. } => source.to_string(),
                        other => other.to_string(),
                    };
                    self.report_failure(node, run, message).await;
                }
                Err(e)
            }
        }
    }

    async fn persist(
        &self,
        node: &WorkflowNode,
        run: &RunContext,
        result: &NodeExecutionResult,
    ) -> Result<()> {
        let mut output =
            WorkflowOutput::new(&run.workflow_id, &run.run_id, &node.id, node.config_snapshot());
        output.outputs = result.outputs.clone();
        output.skipped = result.skipped;

        let saved = match &result.certificate {
            Some(certificate) => {
                run.services
                    .outputs
                    .save_with_certificate(&output, certificate)
                    .await
            }
            None => run.services.outputs.save(&output).await,
        };
        saved
    }

    async fn report_failure(&self, node: &WorkflowNode, run: &RunContext, message: String) {
        run.log(Some(node), LogLevel::Error, message.clone()).await;
        run.services.event_bus.publish(RunEvent::NodeFailed {
            run_id: run.run_id.clone(),
            node_id: node.id.clone(),
            node_name: node.name.clone(),
            error: message,
        });
    }

    fn publish_completed(&self, node: &WorkflowNode, run: &RunContext, skipped: bool) {
        run.services.event_bus.publish(RunEvent::NodeCompleted {
            run_id: run.run_id.clone(),
            node_id: node.id.clone(),
            node_name: node.name.clone(),
            skipped,
        });
    }
}

impl SequenceRunner for WorkflowProcessor {
    fn run_node<'a>(
        &'a self,
        node: &'a WorkflowNode,
        run: &'a RunContext,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.process(node, run))
    }

    fn run_sequence<'a>(
        &'a self,
        nodes: &'a [WorkflowNode],
        run: &'a RunContext,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            for node in nodes {
                self.process(node, run).await?;
            }
            Ok(())
        })
    }
}
