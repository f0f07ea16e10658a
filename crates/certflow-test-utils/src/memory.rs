use std::collections::HashMap;
use std::sync::Mutex;

use futures::future::BoxFuture;

use certflow_core::error::{CertflowError, Result};
use certflow_core::traits::*;
use certflow_core::types::*;

#[derive(Default)]
struct Tables {
    workflows: HashMap<String, Workflow>,
    runs: HashMap<String, WorkflowRun>,
    logs: Vec<WorkflowLog>,
    /// Insertion order doubles as recency.
    outputs: Vec<WorkflowOutput>,
    certificates: Vec<Certificate>,
    accesses: HashMap<String, Access>,
}

/// In-memory implementation of every repository trait.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outputs(&self) -> Vec<WorkflowOutput> {
        self.tables.lock().unwrap().outputs.clone()
    }

    pub fn certificates(&self) -> Vec<Certificate> {
        self.tables.lock().unwrap().certificates.clone()
    }

    pub fn logs(&self) -> Vec<WorkflowLog> {
        self.tables.lock().unwrap().logs.clone()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Tables) -> Result<T>) -> Result<T> {
        let mut tables = self
            .tables
            .lock()
            .map_err(|e| CertflowError::Database(e.to_string()))?;
        f(&mut tables)
    }
}

fn ready<T: Send + 'static>(result: Result<T>) -> BoxFuture<'static, Result<T>> {
    Box::pin(futures::future::ready(result))
}

fn upsert_output(tables: &mut Tables, output: &WorkflowOutput) {
    tables
        .outputs
        .retain(|o| !(o.run_id == output.run_id && o.node_id == output.node_id));
    tables.outputs.push(output.clone());
}

impl WorkflowRepository for MemoryStore {
    fn get(&self, id: &str) -> BoxFuture<'_, Result<Workflow>> {
        ready(self.with(|t| {
            t.workflows
                .get(id)
                .cloned()
                .ok_or_else(|| CertflowError::NotFound(format!("workflow '{id}'")))
        }))
    }

    fn save(&self, workflow: &Workflow) -> BoxFuture<'_, Result<()>> {
        ready(self.with(|t| {
            t.workflows.insert(workflow.id.clone(), workflow.clone());
            Ok(())
        }))
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<Workflow>>> {
        ready(self.with(|t| Ok(t.workflows.values().cloned().collect())))
    }

    fn list_scheduled(&self) -> BoxFuture<'_, Result<Vec<Workflow>>> {
        ready(self.with(|t| {
            Ok(t.workflows
                .values()
                .filter(|w| {
                    w.trigger == WorkflowTriggerType::Scheduled && w.enabled && w.has_content
                })
                .cloned()
                .collect())
        }))
    }
}

impl WorkflowRunRepository for MemoryStore {
    fn get(&self, id: &str) -> BoxFuture<'_, Result<WorkflowRun>> {
        ready(self.with(|t| {
            t.runs
                .get(id)
                .cloned()
                .ok_or_else(|| CertflowError::NotFound(format!("run '{id}'")))
        }))
    }

    fn save(&self, run: &WorkflowRun) -> BoxFuture<'_, Result<()>> {
        ready(self.with(|t| {
            t.runs.insert(run.id.clone(), run.clone());
            Ok(())
        }))
    }

    fn append_log(&self, log: &WorkflowLog) -> BoxFuture<'_, Result<()>> {
        ready(self.with(|t| {
            t.logs.push(log.clone());
            Ok(())
        }))
    }

    fn list_logs(&self, run_id: &str) -> BoxFuture<'_, Result<Vec<WorkflowLog>>> {
        ready(self.with(|t| Ok(t.logs.iter().filter(|l| l.run_id == run_id).cloned().collect())))
    }

    fn list_by_workflow(
        &self,
        workflow_id: &str,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<WorkflowRun>>> {
        ready(self.with(|t| {
            let mut runs: Vec<_> = t
                .runs
                .values()
                .filter(|r| r.workflow_id == workflow_id)
                .cloned()
                .collect();
            runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            runs.truncate(limit);
            Ok(runs)
        }))
    }
}

impl WorkflowOutputRepository for MemoryStore {
    fn get(&self, run_id: &str, node_id: &str) -> BoxFuture<'_, Result<Option<WorkflowOutput>>> {
        ready(self.with(|t| {
            Ok(t.outputs
                .iter()
                .find(|o| o.run_id == run_id && o.node_id == node_id)
                .cloned())
        }))
    }

    fn get_latest_terminal(
        &self,
        workflow_id: &str,
        node_id: &str,
    ) -> BoxFuture<'_, Result<Option<WorkflowOutput>>> {
        ready(self.with(|t| {
            Ok(t.outputs
                .iter()
                .rev()
                .find(|o| o.workflow_id == workflow_id && o.node_id == node_id && !o.skipped)
                .cloned())
        }))
    }

    fn save(&self, output: &WorkflowOutput) -> BoxFuture<'_, Result<()>> {
        ready(self.with(|t| {
            upsert_output(t, output);
            Ok(())
        }))
    }

    fn save_with_certificate(
        &self,
        output: &WorkflowOutput,
        certificate: &Certificate,
    ) -> BoxFuture<'_, Result<()>> {
        ready(self.with(|t| {
            if t.certificates.iter().any(|c| c.id == certificate.id) {
                return Err(CertflowError::Database(format!(
                    "certificate '{}' already exists",
                    certificate.id
                )));
            }
            t.certificates.push(certificate.clone());
            upsert_output(t, output);
            Ok(())
        }))
    }
}

impl CertificateRepository for MemoryStore {
    fn get(&self, id: &str) -> BoxFuture<'_, Result<Certificate>> {
        ready(self.with(|t| {
            t.certificates
                .iter()
                .find(|c| c.id == id)
                .cloned()
                .ok_or_else(|| CertflowError::NotFound(format!("certificate '{id}'")))
        }))
    }

    fn get_latest_by_workflow_node(
        &self,
        workflow_id: &str,
        node_id: &str,
    ) -> BoxFuture<'_, Result<Option<Certificate>>> {
        ready(self.with(|t| {
            Ok(t.certificates
                .iter()
                .rev()
                .find(|c| c.workflow_id == workflow_id && c.workflow_node_id == node_id)
                .cloned())
        }))
    }

    fn save(&self, certificate: &Certificate) -> BoxFuture<'_, Result<()>> {
        ready(self.with(|t| {
            t.certificates.push(certificate.clone());
            Ok(())
        }))
    }
}

impl AccessRepository for MemoryStore {
    fn get(&self, id: &str) -> BoxFuture<'_, Result<Access>> {
        ready(self.with(|t| {
            t.accesses
                .get(id)
                .cloned()
                .ok_or_else(|| CertflowError::NotFound(format!("access '{id}'")))
        }))
    }

    fn save(&self, access: &Access) -> BoxFuture<'_, Result<()>> {
        ready(self.with(|t| {
            t.accesses.insert(access.id.clone(), access.clone());
            Ok(())
        }))
    }
}
