use crate::executor::{UnitExecutor, Walk};
use crate::registry::RunRegistry;
use chrono::Utc;
use dockcore::{
    DocumentError, EventBus, ExecutionEvent, FlowError, RegistryError, WorkflowDocument,
    WorkflowRun,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Accepts workflow documents and drives each one on its own background task
pub struct Orchestrator {
    registry: Arc<RunRegistry>,
    executor: Arc<dyn UnitExecutor>,
    event_bus: Arc<EventBus>,
    permits: Option<Arc<Semaphore>>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    /// Create an orchestrator with default settings
    pub fn new(executor: Arc<dyn UnitExecutor>) -> Self {
        Self::with_config(executor, EngineConfig::default())
    }

    pub fn with_config(executor: Arc<dyn UnitExecutor>, config: EngineConfig) -> Self {
        Self::with_registry(Arc::new(RunRegistry::new()), executor, config)
    }

    /// Create an orchestrator over an existing registry
    pub fn with_registry(
        registry: Arc<RunRegistry>,
        executor: Arc<dyn UnitExecutor>,
        config: EngineConfig,
    ) -> Self {
        let permits = config
            .max_parallel_units
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));

        Self {
            registry,
            executor,
            event_bus: Arc::new(EventBus::new(config.event_buffer_size)),
            permits,
            shutdown: CancellationToken::new(),
        }
    }

    /// Register a run and start walking it in the background.
    ///
    /// Returns the Pending snapshot without waiting for any execution.
    pub async fn submit(&self, document: WorkflowDocument) -> Result<WorkflowRun, FlowError> {
        if self.shutdown.is_cancelled() {
            return Err(FlowError::ShuttingDown);
        }
        if document.name().trim().is_empty() {
            return Err(DocumentError::MissingName.into());
        }
        if document.spec.entrypoint.trim().is_empty() {
            return Err(DocumentError::EntrypointMissing.into());
        }

        let entry = self.registry.create(document).await?;
        tracing::info!("Submitting workflow '{}' for execution", entry.name());

        self.event_bus.emit(ExecutionEvent::RunSubmitted {
            run: entry.name().to_string(),
            uid: entry.uid(),
            timestamp: Utc::now(),
        });

        let snapshot = entry.snapshot().await;

        let walk = Walk::new(
            entry,
            Arc::clone(&self.executor),
            Arc::clone(&self.event_bus),
            self.permits.clone(),
        );
        tokio::spawn(walk.run());

        Ok(snapshot)
    }

    pub async fn get(&self, name: &str) -> Result<WorkflowRun, FlowError> {
        Ok(self.registry.get(name).await?)
    }

    pub async fn list(&self) -> Vec<WorkflowRun> {
        self.registry.list().await
    }

    /// Poll the registry until the run reaches a terminal phase.
    pub async fn wait_for_completion(
        &self,
        name: &str,
        poll_interval: Duration,
    ) -> Result<WorkflowRun, RegistryError> {
        let entry = self.registry.entry(name).await?;
        while !entry.phase().await.is_terminal() {
            tokio::time::sleep(poll_interval).await;
        }
        Ok(entry.snapshot().await)
    }

    /// Stop accepting submissions. Runs already walking are left alone.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::info!("Orchestrator shutting down, new submissions will be rejected");
            self.shutdown.cancel();
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }
}

/// Configuration for the orchestrator
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on concurrently running units of work. `None` leaves
    /// fan-out unbounded.
    pub max_parallel_units: Option<usize>,
    pub event_buffer_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel_units: None,
            event_buffer_size: 1000,
        }
    }
}
