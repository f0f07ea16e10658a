use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast::{error::RecvError, Receiver};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use certflow_core::event::{EventBus, RunEvent};

/// JSONL run logger.
///
/// Subscribes to the EventBus and writes one JSON object per line to
/// `{log_dir}/{run_id}.jsonl`. The format is append-only and crash-resilient:
/// even if the process dies mid-run, all previously written lines are intact.
pub struct RunLogger {
    log_dir: PathBuf,
    level: u8,
}

/// A single log entry written to the JSONL file.
#[derive(Serialize)]
struct LogEntry {
    timestamp: String,
    run_id: String,
    event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

impl RunLogger {
    /// `level` controls verbosity: 1=run summary, 2=per-node, 3=every log line.
    pub fn new(log_dir: PathBuf, level: u8) -> Self {
        Self { log_dir, level }
    }

    /// Subscribe now and log `run_id` in the background until its
    /// `RunFinished` event or cancellation.
    pub fn spawn(
        self,
        event_bus: &EventBus,
        run_id: String,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let rx = event_bus.subscribe();
        tokio::spawn(self.run(rx, run_id, cancel))
    }

    pub async fn run(self, mut rx: Receiver<RunEvent>, run_id: String, cancel: CancellationToken) {
        if let Err(e) = tokio::fs::create_dir_all(&self.log_dir).await {
            error!(error = %e, "Failed to create log directory");
            return;
        }
        let log_path = self.log_dir.join(format!("{run_id}.jsonl"));
        let file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, path = %log_path.display(), "Failed to open log file");
                return;
            }
        };

        info!(path = %log_path.display(), "RunLogger started");
        let mut writer = tokio::io::BufWriter::new(file);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("RunLogger cancelled");
                    break;
                }
                result = rx.recv() => {
                    match result {
                        Ok(event) => {
                            if event.run_id() != run_id {
                                continue;
                            }
                            if let Some(entry) = self.event_to_entry(&event) {
                                if let Ok(json) = serde_json::to_string(&entry) {
                                    let line = format!("{json}\n");
                                    if let Err(e) = writer.write_all(line.as_bytes()).await {
                                        error!(error = %e, "Failed to write log entry");
                                        break;
                                    }
                                    // Flush after each entry for crash resilience
                                    if let Err(e) = writer.flush().await {
                                        error!(error = %e, "Failed to flush log");
                                    }
                                }
                            }
                            if matches!(event, RunEvent::RunFinished { .. }) {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            debug!(skipped = n, "RunLogger lagged, skipped events");
                        }
                        Err(RecvError::Closed) => {
                            debug!("EventBus closed, RunLogger stopping");
                            break;
                        }
                    }
                }
            }
        }

        writer.flush().await.ok();
        debug!(path = %log_path.display(), "RunLogger finished");
    }

    /// Convert a RunEvent to a log entry (None if filtered by level).
    fn event_to_entry(&self, event: &RunEvent) -> Option<LogEntry> {
        let entry = |event_type: &str,
                     node_id: Option<&str>,
                     detail: Option<serde_json::Value>| LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            run_id: event.run_id().to_string(),
            event_type: event_type.to_string(),
            node_id: node_id.map(str::to_string),
            detail,
        };

        match event {
            // L1: run summary
            RunEvent::RunStarted { workflow_id, trigger, .. } => Some(entry(
                "run_started",
                None,
                Some(serde_json::json!({ "workflow_id": workflow_id, "trigger": trigger })),
            )),
            RunEvent::RunFinished { status, error, .. } => Some(entry(
                "run_finished",
                None,
                Some(serde_json::json!({ "status": status, "error": error })),
            )),

            // L2: per node
            RunEvent::NodeStarted { node_id, node_type, .. } if self.level >= 2 => Some(entry(
                "node_started",
                Some(node_id.as_str()),
                Some(serde_json::json!({ "node_type": node_type })),
            )),
            RunEvent::NodeCompleted { node_id, skipped, .. } if self.level >= 2 => Some(entry(
                "node_completed",
                Some(node_id.as_str()),
                Some(serde_json::json!({ "skipped": skipped })),
            )),
            RunEvent::NodeFailed { node_id, error, .. } if self.level >= 2 => Some(entry(
                "node_failed",
                Some(node_id.as_str()),
                Some(serde_json::json!({ "error": error })),
            )),

            // L3: every log line
            RunEvent::Log(log) if self.level >= 3 => Some(entry(
                "log",
                (!log.node_id.is_empty()).then_some(log.node_id.as_str()),
                Some(serde_json::json!({
                    "level": log.level,
                    "message": truncate_str(&log.message, 500),
                })),
            )),

            _ => None,
        }
    }
}

/// Truncate a string for logging.
fn truncate_str(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use certflow_core::types::{LogLevel, WorkflowLog, WorkflowRunStatus, WorkflowTriggerType};

    fn log_event(run_id: &str) -> RunEvent {
        RunEvent::Log(WorkflowLog {
            run_id: run_id.into(),
            node_id: "deploy-1".into(),
            node_name: "Deploy".into(),
            level: LogLevel::Info,
            message: "bizDeploy node started".into(),
            detail: None,
            created_at: Utc::now(),
        })
    }

    #[test]
    fn test_entry_skips_empty_fields() {
        let logger = RunLogger::new(PathBuf::from("/tmp"), 1);
        let entry = logger
            .event_to_entry(&RunEvent::RunStarted {
                run_id: "r1".into(),
                workflow_id: "wf".into(),
                trigger: WorkflowTriggerType::Manual,
            })
            .unwrap();
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("run_started"));
        assert!(json.contains("\"trigger\":\"manual\""));
        assert!(!json.contains("node_id"));
    }

    #[test]
    fn test_event_level_filtering() {
        let completed = RunEvent::NodeCompleted {
            run_id: "r1".into(),
            node_id: "n1".into(),
            node_name: "N".into(),
            skipped: false,
        };

        let logger = RunLogger::new(PathBuf::from("/tmp"), 1);
        assert!(logger.event_to_entry(&completed).is_none());
        assert!(logger.event_to_entry(&log_event("r1")).is_none());

        let logger2 = RunLogger::new(PathBuf::from("/tmp"), 2);
        assert!(logger2.event_to_entry(&completed).is_some());
        assert!(logger2.event_to_entry(&log_event("r1")).is_none());

        let logger3 = RunLogger::new(PathBuf::from("/tmp"), 3);
        let entry = logger3.event_to_entry(&log_event("r1")).unwrap();
        assert_eq!(entry.node_id.as_deref(), Some("deploy-1"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_str("héllo", 2), "h");
        assert_eq!(truncate_str("short", 50), "short");
    }

    #[tokio::test]
    async fn test_writes_only_its_run() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::default();
        let handle = RunLogger::new(dir.path().to_path_buf(), 3).spawn(
            &bus,
            "r1".into(),
            CancellationToken::new(),
        );

        bus.publish(log_event("r2"));
        bus.publish(log_event("r1"));
        bus.publish(RunEvent::RunFinished {
            run_id: "r1".into(),
            workflow_id: "wf".into(),
            status: WorkflowRunStatus::Succeeded,
            error: None,
        });
        handle.await.unwrap();

        let text = std::fs::read_to_string(dir.path().join("r1.jsonl")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"event_type\":\"log\""));
        assert!(lines[1].contains("\"status\":\"succeeded\""));
    }
}
