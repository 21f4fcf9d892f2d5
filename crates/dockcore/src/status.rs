use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the single output entry that holds captured stdout/stderr.
pub const LOGS_OUTPUT: &str = "logs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Succeeded | RunPhase::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodePhase {
    Running,
    Succeeded,
    Failed,
    Error,
}

impl NodePhase {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, NodePhase::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Leaf,
    Composite,
}

/// Status of one executed position in the template graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub kind: NodeKind,
    pub template_name: String,
    pub phase: NodePhase,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Name of the runtime unit that executed this node (leaves only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_unit: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, String>,
}

impl NodeStatus {
    /// A freshly started node.
    pub fn running(
        id: impl Into<String>,
        display_name: impl Into<String>,
        kind: NodeKind,
        template_name: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            display_name: display_name.into(),
            kind,
            template_name: template_name.into(),
            phase: NodePhase::Running,
            started_at: Utc::now(),
            finished_at: None,
            message: None,
            runtime_unit: None,
            outputs: BTreeMap::new(),
        }
    }

    /// Move to a terminal phase. Returns false if the node already finished.
    pub fn finish(&mut self, phase: NodePhase, message: Option<String>) -> bool {
        if self.phase.is_terminal() || !phase.is_terminal() {
            return false;
        }
        self.phase = phase;
        self.message = message;
        self.finished_at = Some(Utc::now());
        true
    }

    pub fn logs(&self) -> Option<&str> {
        self.outputs.get(LOGS_OUTPUT).map(String::as_str)
    }

    pub fn set_logs(&mut self, logs: impl Into<String>) {
        self.outputs.insert(LOGS_OUTPUT.to_string(), logs.into());
    }
}

/// Mutable status of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    pub phase: RunPhase,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeStatus>,
}

impl RunStatus {
    pub fn pending() -> Self {
        Self {
            phase: RunPhase::Pending,
            started_at: Utc::now(),
            finished_at: None,
            message: None,
            nodes: BTreeMap::new(),
        }
    }

    /// Upsert a node, refusing to move a finished node anywhere else.
    /// Returns whether the update was applied.
    pub fn record_node(&mut self, node: NodeStatus) -> bool {
        if let Some(existing) = self.nodes.get(&node.id) {
            if existing.phase.is_terminal() {
                return false;
            }
        }
        self.nodes.insert(node.id.clone(), node);
        true
    }

    /// Terminal phase bookkeeping. Ignored if the run already finished.
    pub fn complete(&mut self, phase: RunPhase, message: Option<String>) -> bool {
        if self.phase.is_terminal() || !phase.is_terminal() {
            return false;
        }
        self.phase = phase;
        self.message = message;
        self.finished_at = Some(Utc::now());
        true
    }
}
