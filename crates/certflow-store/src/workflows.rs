use chrono::Utc;
use futures::future::BoxFuture;
use rusqlite::{params, OptionalExtension, Row};

use certflow_core::error::{CertflowError, Result};
use certflow_core::traits::{WorkflowRepository, WorkflowRunRepository};
use certflow_core::types::{
    LogLevel, Workflow, WorkflowLog, WorkflowRun, WorkflowRunStatus, WorkflowTriggerType,
};

use crate::store::{db_err, parse_opt_ts, parse_ts, ts, SqliteStore};

fn workflow_from_data(data: &str) -> Result<Workflow> {
    Ok(serde_json::from_str(data)?)
}

impl WorkflowRepository for SqliteStore {
    fn get(&self, id: &str) -> BoxFuture<'_, Result<Workflow>> {
        let id = id.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            let data: Option<String> = conn
                .query_row("SELECT data FROM workflows WHERE id = ?1", params![id], |row| {
                    row.get(0)
                })
                .optional()
                .map_err(db_err)?;
            let data = data.ok_or_else(|| CertflowError::NotFound(format!("workflow '{id}'")))?;
            workflow_from_data(&data)
        })
    }

    fn save(&self, workflow: &Workflow) -> BoxFuture<'_, Result<()>> {
        let row = serde_json::to_string(workflow).map(|data| {
            (
                workflow.id.clone(),
                workflow.name.clone(),
                workflow.trigger.to_string(),
                workflow.enabled,
                workflow.has_content,
                data,
            )
        });
        Box::pin(async move {
            let (id, name, trigger, enabled, has_content, data) = row?;
            let conn = self.lock()?;
            conn.execute(
                "INSERT OR REPLACE INTO workflows
                 (id, name, trigger_type, enabled, has_content, data, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![id, name, trigger, enabled, has_content, data, ts(&Utc::now())],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<Workflow>>> {
        Box::pin(async move {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare("SELECT data FROM workflows ORDER BY name ASC")
                .map_err(db_err)?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0)).map_err(db_err)?;

            let mut workflows = Vec::new();
            for row in rows {
                workflows.push(workflow_from_data(&row.map_err(db_err)?)?);
            }
            Ok(workflows)
        })
    }

    fn list_scheduled(&self) -> BoxFuture<'_, Result<Vec<Workflow>>> {
        Box::pin(async move {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare(
                    "SELECT data FROM workflows
                     WHERE trigger_type = ?1 AND enabled = 1 AND has_content = 1
                     ORDER BY id ASC",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![WorkflowTriggerType::Scheduled.to_string()], |row| {
                    row.get::<_, String>(0)
                })
                .map_err(db_err)?;

            let mut workflows = Vec::new();
            for row in rows {
                workflows.push(workflow_from_data(&row.map_err(db_err)?)?);
            }
            Ok(workflows)
        })
    }
}

type RunRow = (String, String, String, String, String, String, Option<String>, Option<String>);

fn read_run_row(row: &Row<'_>) -> rusqlite::Result<RunRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn run_from_row(row: RunRow) -> Result<WorkflowRun> {
    let (id, workflow_id, status, trigger, graph, started_at, ended_at, error) = row;
    let status = WorkflowRunStatus::parse(&status)
        .ok_or_else(|| CertflowError::Database(format!("unknown run status '{status}'")))?;
    let trigger = match trigger.as_str() {
        "scheduled" => WorkflowTriggerType::Scheduled,
        _ => WorkflowTriggerType::Manual,
    };
    Ok(WorkflowRun {
        id,
        workflow_id,
        status,
        trigger,
        graph: serde_json::from_str(&graph)?,
        started_at: parse_ts(&started_at),
        ended_at: parse_opt_ts(ended_at),
        error: error.map(|e| serde_json::from_str(&e)).transpose()?,
    })
}

const RUN_COLUMNS: &str =
    "id, workflow_id, status, trigger_type, graph, started_at, ended_at, error";

impl WorkflowRunRepository for SqliteStore {
    fn get(&self, id: &str) -> BoxFuture<'_, Result<WorkflowRun>> {
        let id = id.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            let row = conn
                .query_row(
                    &format!("SELECT {RUN_COLUMNS} FROM workflow_runs WHERE id = ?1"),
                    params![id],
                    read_run_row,
                )
                .optional()
                .map_err(db_err)?
                .ok_or_else(|| CertflowError::NotFound(format!("run '{id}'")))?;
            run_from_row(row)
        })
    }

    fn save(&self, run: &WorkflowRun) -> BoxFuture<'_, Result<()>> {
        let graph = serde_json::to_string(&run.graph);
        let error = run.error.as_ref().map(serde_json::to_string).transpose();
        let id = run.id.clone();
        let workflow_id = run.workflow_id.clone();
        let status = run.status.to_string();
        let trigger = run.trigger.to_string();
        let started_at = ts(&run.started_at);
        let ended_at = run.ended_at.as_ref().map(ts);

        Box::pin(async move {
            let (graph, error) = (graph?, error?);
            let conn = self.lock()?;
            conn.execute(
                "INSERT OR REPLACE INTO workflow_runs
                 (id, workflow_id, status, trigger_type, graph, started_at, ended_at, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![id, workflow_id, status, trigger, graph, started_at, ended_at, error],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    fn append_log(&self, log: &WorkflowLog) -> BoxFuture<'_, Result<()>> {
        let detail = log.detail.as_ref().map(serde_json::to_string).transpose();
        let log = log.clone();
        Box::pin(async move {
            let detail = detail?;
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO workflow_logs
                 (run_id, node_id, node_name, level, message, detail, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    log.run_id,
                    log.node_id,
                    log.node_name,
                    log.level.as_str(),
                    log.message,
                    detail,
                    ts(&log.created_at)
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    fn list_logs(&self, run_id: &str) -> BoxFuture<'_, Result<Vec<WorkflowLog>>> {
        let run_id = run_id.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare(
                    "SELECT node_id, node_name, level, message, detail, created_at
                     FROM workflow_logs WHERE run_id = ?1 ORDER BY seq ASC",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![run_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                })
                .map_err(db_err)?;

            let mut logs = Vec::new();
            for row in rows {
                let (node_id, node_name, level, message, detail, created_at) = row.map_err(db_err)?;
                logs.push(WorkflowLog {
                    run_id: run_id.clone(),
                    node_id,
                    node_name,
                    level: LogLevel::parse(&level).unwrap_or(LogLevel::Info),
                    message,
                    detail: detail.and_then(|d| serde_json::from_str(&d).ok()),
                    created_at: parse_ts(&created_at),
                });
            }
            Ok(logs)
        })
    }

    fn list_by_workflow(
        &self,
        workflow_id: &str,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<WorkflowRun>>> {
        let workflow_id = workflow_id.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {RUN_COLUMNS} FROM workflow_runs
                     WHERE workflow_id = ?1
                     ORDER BY started_at DESC, rowid DESC
                     LIMIT ?2"
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![workflow_id, limit as i64], read_run_row)
                .map_err(db_err)?;

            let mut runs = Vec::new();
            for row in rows {
                runs.push(run_from_row(row.map_err(db_err)?)?);
            }
            Ok(runs)
        })
    }
}
