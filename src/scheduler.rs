use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use certflow_core::traits::WorkflowRepository;
use certflow_core::types::{Workflow, WorkflowTriggerType};
use certflow_engine::WorkflowEngine;

struct ScheduledWorkflow {
    id: String,
    name: String,
    schedule: Schedule,
}

/// Starts runs of enabled scheduled workflows when their cron expression fires.
///
/// The set of workflows is reloaded at least every `tick`, so publishing or
/// disabling a workflow takes effect without a restart.
pub struct WorkflowScheduler {
    engine: WorkflowEngine,
    workflows: Arc<dyn WorkflowRepository>,
    tick: Duration,
    cancel: CancellationToken,
}

impl WorkflowScheduler {
    pub fn new(
        engine: WorkflowEngine,
        workflows: Arc<dyn WorkflowRepository>,
        tick: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            engine,
            workflows,
            tick: tick.max(Duration::from_secs(1)),
            cancel,
        }
    }

    /// Run the scheduler loop. Blocks until cancelled.
    pub async fn run(&self) {
        info!(tick_secs = self.tick.as_secs(), "Workflow scheduler started");

        loop {
            let jobs = self.load().await;
            let now = Utc::now();
            let next = next_fire(&jobs, now);

            let delay = match next {
                Some(fire_at) => (fire_at - now).to_std().unwrap_or_default().min(self.tick),
                None => self.tick,
            };
            if let Some(fire_at) = next {
                debug!(
                    fire_at = %fire_at.format("%H:%M:%S"),
                    delay_secs = delay.as_secs(),
                    "Next trigger"
                );
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => {
                    info!("Workflow scheduler shutting down");
                    break;
                }
            }

            let Some(fire_at) = next else { continue };
            if Utc::now() < fire_at {
                continue;
            }
            for job in jobs.iter().filter(|j| j.schedule.after(&now).next() == Some(fire_at)) {
                self.fire(job).await;
            }
        }
    }

    async fn fire(&self, job: &ScheduledWorkflow) {
        info!(workflow_id = %job.id, name = %job.name, "Firing scheduled workflow");
        match self.engine.spawn_workflow(&job.id, WorkflowTriggerType::Scheduled).await {
            Ok(handle) => {
                let workflow_id = job.id.clone();
                tokio::spawn(async move {
                    match handle.wait().await {
                        Ok(run) => info!(
                            %workflow_id,
                            run_id = %run.id,
                            status = %run.status,
                            "Scheduled run finished"
                        ),
                        Err(e) => error!(%workflow_id, error = %e, "Scheduled run failed"),
                    }
                });
            }
            Err(e) => error!(workflow_id = %job.id, error = %e, "Failed to start scheduled run"),
        }
    }

    async fn load(&self) -> Vec<ScheduledWorkflow> {
        let workflows = match self.workflows.list_scheduled().await {
            Ok(workflows) => workflows,
            Err(e) => {
                error!(error = %e, "Failed to load scheduled workflows");
                return Vec::new();
            }
        };
        workflows.iter().filter_map(parse_job).collect()
    }
}

fn parse_job(workflow: &Workflow) -> Option<ScheduledWorkflow> {
    let expr = if workflow.trigger_cron.trim().is_empty() {
        workflow.graph_content.as_ref()?.start_trigger_cron()?
    } else {
        workflow.trigger_cron.clone()
    };
    match parse_schedule(&expr) {
        Ok(schedule) => Some(ScheduledWorkflow {
            id: workflow.id.clone(),
            name: workflow.name.clone(),
            schedule,
        }),
        Err(e) => {
            warn!(
                workflow_id = %workflow.id,
                cron = %expr,
                error = %e,
                "Invalid cron expression, skipping workflow"
            );
            None
        }
    }
}

/// Parse a cron expression, accepting the five-field form by pinning seconds to 0.
fn parse_schedule(expr: &str) -> Result<Schedule, cron::error::Error> {
    let expr = expr.trim();
    if expr.split_whitespace().count() == 5 {
        Schedule::from_str(&format!("0 {expr}"))
    } else {
        Schedule::from_str(expr)
    }
}

fn next_fire(jobs: &[ScheduledWorkflow], now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    jobs.iter().filter_map(|j| j.schedule.after(&now).next()).min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_five_field_cron_is_accepted() {
        let schedule = parse_schedule("30 3 * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let next = schedule.after(&now).next().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 1, 1, 3, 30, 0).unwrap());
    }

    #[test]
    fn test_invalid_cron_rejected() {
        assert!(parse_schedule("every day").is_err());
    }

    #[test]
    fn test_trigger_cron_falls_back_to_start_node() {
        let mut workflow = Workflow::new("nightly", WorkflowTriggerType::Scheduled);
        workflow.graph_content = Some(
            serde_json::from_value(serde_json::json!({"nodes": [
                {"id": "s", "type": "start", "data": {
                    "name": "s",
                    "config": {"triggerCron": "0 0 2 * * *"}
                }},
                {"id": "e", "type": "end", "data": {"name": "e"}}
            ]}))
            .unwrap(),
        );
        assert!(parse_job(&workflow).is_some());

        workflow.graph_content = None;
        assert!(parse_job(&workflow).is_none());
    }

    #[test]
    fn test_next_fire_picks_earliest() {
        let jobs = vec![
            ScheduledWorkflow {
                id: "a".into(),
                name: "a".into(),
                schedule: parse_schedule("0 5 * * *").unwrap(),
            },
            ScheduledWorkflow {
                id: "b".into(),
                name: "b".into(),
                schedule: parse_schedule("0 4 * * *").unwrap(),
            },
        ];
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(next_fire(&jobs, now), Some(Utc.with_ymd_and_hms(2025, 1, 1, 4, 0, 0).unwrap()));
        assert_eq!(next_fire(&[], now), None);
    }
}
