use dockcore::{
    NodePhase, NodeStatus, RegistryError, RunMetadata, RunPhase, RunStatus, WorkflowDocument,
    WorkflowRun, WorkflowSpec,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// One registered run: immutable spec plus a separately locked status.
pub struct RunEntry {
    metadata: RunMetadata,
    spec: Arc<WorkflowSpec>,
    status: RwLock<RunStatus>,
}

impl RunEntry {
    fn new(document: WorkflowDocument) -> Self {
        Self {
            metadata: RunMetadata {
                name: document.metadata.name,
                uid: Uuid::new_v4(),
            },
            spec: Arc::new(document.spec),
            status: RwLock::new(RunStatus::pending()),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn uid(&self) -> Uuid {
        self.metadata.uid
    }

    pub fn spec(&self) -> Arc<WorkflowSpec> {
        Arc::clone(&self.spec)
    }

    /// Deep copy of spec and status, taken under the read lock.
    pub async fn snapshot(&self) -> WorkflowRun {
        let status = self.status.read().await.clone();
        WorkflowRun {
            metadata: self.metadata.clone(),
            spec: (*self.spec).clone(),
            status,
        }
    }

    pub async fn node(&self, node_id: &str) -> Option<NodeStatus> {
        self.status.read().await.nodes.get(node_id).cloned()
    }

    pub async fn phase(&self) -> RunPhase {
        self.status.read().await.phase
    }

    /// Monotonic upsert of a node status.
    pub async fn update_node(&self, node: NodeStatus) -> bool {
        let node_id = node.id.clone();
        let applied = self.status.write().await.record_node(node);
        if !applied {
            tracing::warn!(
                "Refusing to overwrite terminal status of node '{}' in workflow '{}'",
                node_id,
                self.name()
            );
        }
        applied
    }

    /// Force a node that is still running into Error. Used when the task
    /// driving it died without reporting back.
    pub async fn abandon_node(&self, node_id: &str, message: impl Into<String>) {
        let mut status = self.status.write().await;
        if let Some(node) = status.nodes.get_mut(node_id) {
            if node.finish(NodePhase::Error, Some(message.into())) {
                tracing::warn!("Node '{}' in workflow '{}' was abandoned", node_id, self.name());
            }
        }
    }

    pub async fn mark_running(&self) {
        let mut status = self.status.write().await;
        if status.phase == RunPhase::Pending {
            status.phase = RunPhase::Running;
        }
    }

    pub async fn mark_succeeded(&self) {
        self.status.write().await.complete(RunPhase::Succeeded, None);
    }

    pub async fn mark_failed(&self, message: impl Into<String>) {
        self.status
            .write()
            .await
            .complete(RunPhase::Failed, Some(message.into()));
    }
}

/// In-memory store of every run submitted during this process lifetime
pub struct RunRegistry {
    runs: RwLock<HashMap<String, Arc<RunEntry>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
        }
    }

    /// Register a run in Pending phase.
    pub async fn create(&self, document: WorkflowDocument) -> Result<Arc<RunEntry>, RegistryError> {
        let mut runs = self.runs.write().await;
        if runs.contains_key(document.name()) {
            return Err(RegistryError::DuplicateRun(document.name().to_string()));
        }

        let entry = Arc::new(RunEntry::new(document));
        runs.insert(entry.name().to_string(), Arc::clone(&entry));
        Ok(entry)
    }

    pub async fn entry(&self, name: &str) -> Result<Arc<RunEntry>, RegistryError> {
        self.runs
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub async fn get(&self, name: &str) -> Result<WorkflowRun, RegistryError> {
        let entry = self.entry(name).await?;
        Ok(entry.snapshot().await)
    }

    /// Snapshots of every run, ordered by name.
    pub async fn list(&self) -> Vec<WorkflowRun> {
        let mut entries: Vec<Arc<RunEntry>> = self.runs.read().await.values().cloned().collect();
        entries.sort_by(|a, b| a.name().cmp(b.name()));

        let mut runs = Vec::with_capacity(entries.len());
        for entry in entries {
            runs.push(entry.snapshot().await);
        }
        runs
    }

    pub async fn update_node_status(
        &self,
        run_name: &str,
        node: NodeStatus,
    ) -> Result<(), RegistryError> {
        let entry = self.entry(run_name).await?;
        entry.update_node(node).await;
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.runs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.runs.read().await.is_empty()
    }
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new()
    }
}
