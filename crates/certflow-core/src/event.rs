use serde::Serialize;

use crate::node::NodeType;
use crate::types::{WorkflowLog, WorkflowRunStatus, WorkflowTriggerType};

/// Progress of a run, as seen by observers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        workflow_id: String,
        trigger: WorkflowTriggerType,
    },
    NodeStarted {
        run_id: String,
        node_id: String,
        node_name: String,
        node_type: NodeType,
    },
    NodeCompleted {
        run_id: String,
        node_id: String,
        node_name: String,
        skipped: bool,
    },
    NodeFailed {
        run_id: String,
        node_id: String,
        node_name: String,
        error: String,
    },
    Log(WorkflowLog),
    RunFinished {
        run_id: String,
        workflow_id: String,
        status: WorkflowRunStatus,
        error: Option<String>,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> &str {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::NodeStarted { run_id, .. }
            | Self::NodeCompleted { run_id, .. }
            | Self::NodeFailed { run_id, .. }
            | Self::RunFinished { run_id, .. } => run_id,
            Self::Log(log) => &log.run_id,
        }
    }
}

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<RunEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: RunEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(RunEvent::RunStarted {
            run_id: "r1".into(),
            workflow_id: "w1".into(),
            trigger: WorkflowTriggerType::Manual,
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.run_id(), "r1");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        bus.publish(RunEvent::NodeCompleted {
            run_id: "r".into(),
            node_id: "n".into(),
            node_name: "N".into(),
            skipped: true,
        });
    }
}
