use crate::{NodeKind, NodePhase, RunId, RunPhase};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted while a run is being walked
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    RunSubmitted {
        run: String,
        uid: RunId,
        timestamp: DateTime<Utc>,
    },
    RunStarted {
        run: String,
        uid: RunId,
        timestamp: DateTime<Utc>,
    },
    RunCompleted {
        run: String,
        uid: RunId,
        phase: RunPhase,
        message: Option<String>,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        run: String,
        uid: RunId,
        node_id: String,
        template: String,
        kind: NodeKind,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        run: String,
        uid: RunId,
        node_id: String,
        phase: NodePhase,
        message: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    pub fn run(&self) -> &str {
        match self {
            ExecutionEvent::RunSubmitted { run, .. }
            | ExecutionEvent::RunStarted { run, .. }
            | ExecutionEvent::RunCompleted { run, .. }
            | ExecutionEvent::NodeStarted { run, .. }
            | ExecutionEvent::NodeCompleted { run, .. } => run,
        }
    }
}

/// Process-wide event bus
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    /// Sends are dropped silently when nobody is listening.
    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
