use crate::registry::RunEntry;
use crate::validate::validate;
use async_trait::async_trait;
use chrono::Utc;
use dockcore::{
    DocumentError, EventBus, ExecutionEvent, FlowError, NodeError, NodeKind, NodePhase,
    NodeStatus, RunPhase, RuntimeError, StepGroup, TaskGraph, TemplateKind, UnitOfWork,
};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::Instrument;

/// Everything an executor needs to run one unit of work.
#[derive(Debug, Clone)]
pub struct UnitRequest {
    pub run_name: String,
    pub node_id: String,
    pub display_name: String,
    pub template_name: String,
    pub work: UnitOfWork,
}

impl UnitRequest {
    /// A Running leaf status for this request, stamped now.
    pub fn running_status(&self) -> NodeStatus {
        NodeStatus::running(
            &self.node_id,
            &self.display_name,
            NodeKind::Leaf,
            &self.template_name,
        )
    }
}

/// The executor could not bring a unit of work to a terminal state. `status`
/// is already populated with phase Error.
#[derive(Error, Debug)]
#[error("{source}")]
pub struct UnitError {
    pub status: Box<NodeStatus>,
    #[source]
    pub source: RuntimeError,
}

impl UnitError {
    pub fn new(status: NodeStatus, source: RuntimeError) -> Self {
        Self {
            status: Box::new(status),
            source,
        }
    }
}

/// Runs a single unit of work to completion.
///
/// `Ok` carries a terminal status (Succeeded or Failed). `Err` means the
/// runtime itself misbehaved.
#[async_trait]
pub trait UnitExecutor: Send + Sync {
    async fn execute(&self, request: UnitRequest) -> Result<NodeStatus, UnitError>;
}

/// One pass over a run's template graph. Cheap to clone; each spawned child
/// gets its own copy.
#[derive(Clone)]
pub(crate) struct Walk {
    run: Arc<RunEntry>,
    executor: Arc<dyn UnitExecutor>,
    events: Arc<EventBus>,
    permits: Option<Arc<Semaphore>>,
}

impl Walk {
    pub(crate) fn new(
        run: Arc<RunEntry>,
        executor: Arc<dyn UnitExecutor>,
        events: Arc<EventBus>,
        permits: Option<Arc<Semaphore>>,
    ) -> Self {
        Self {
            run,
            executor,
            events,
            permits,
        }
    }

    /// Drive the run from its entrypoint to a terminal phase.
    pub(crate) async fn run(self) {
        let span = tracing::info_span!("walk", workflow = %self.run.name());
        async move {
            tracing::info!("Starting workflow execution");
            self.run.mark_running().await;
            self.events.emit(ExecutionEvent::RunStarted {
                run: self.run.name().to_string(),
                uid: self.run.uid(),
                timestamp: Utc::now(),
            });

            let spec = self.run.spec();
            let result = match validate(&spec) {
                Ok(()) => {
                    // The entry node goes through the same spawn and join as
                    // any child so a panicking executor still ends the run.
                    let entry = spec.entrypoint.clone();
                    self.join_children([(entry.clone(), entry.clone(), entry)])
                        .await
                }
                Err(e) => Err(FlowError::from(e)),
            };

            let (phase, message) = match result {
                Ok(()) => {
                    self.run.mark_succeeded().await;
                    tracing::info!("Workflow completed successfully");
                    (RunPhase::Succeeded, None)
                }
                Err(e) => {
                    tracing::error!("Failed to execute workflow: {}", e);
                    let message = e.to_string();
                    self.run.mark_failed(message.clone()).await;
                    (RunPhase::Failed, Some(message))
                }
            };

            self.events.emit(ExecutionEvent::RunCompleted {
                run: self.run.name().to_string(),
                uid: self.run.uid(),
                phase,
                message,
                timestamp: Utc::now(),
            });
        }
        .instrument(span)
        .await
    }

    /// Execute the named template at graph position `node_id`.
    pub(crate) fn execute_template(
        self,
        node_id: String,
        display_name: String,
        template_name: String,
    ) -> BoxFuture<'static, Result<(), FlowError>> {
        async move {
            let spec = self.run.spec();
            let template = spec.template(&template_name).ok_or_else(|| {
                DocumentError::TemplateNotFound {
                    template: template_name.clone(),
                    referenced_by: format!("node '{}'", node_id),
                }
            })?;

            tracing::info!("Executing template '{}' as node '{}'", template.name, node_id);

            match &template.kind {
                TemplateKind::Work(work) => {
                    self.execute_unit(&node_id, &display_name, &template.name, work)
                        .await
                }
                TemplateKind::Steps(groups) => {
                    self.execute_steps(&node_id, &display_name, &template.name, groups)
                        .await
                }
                TemplateKind::Dag(graph) => {
                    self.execute_dag(&node_id, &display_name, &template.name, graph)
                        .await
                }
            }
        }
        .boxed()
    }

    async fn execute_unit(
        &self,
        node_id: &str,
        display_name: &str,
        template_name: &str,
        work: &UnitOfWork,
    ) -> Result<(), FlowError> {
        let request = UnitRequest {
            run_name: self.run.name().to_string(),
            node_id: node_id.to_string(),
            display_name: display_name.to_string(),
            template_name: template_name.to_string(),
            work: work.clone(),
        };
        self.start_node(request.running_status()).await;

        let _permit = match &self.permits {
            Some(permits) => Arc::clone(permits).acquire_owned().await.ok(),
            None => None,
        };

        let (mut status, runtime_error) = match self.executor.execute(request).await {
            Ok(status) => (status, None),
            Err(UnitError { status, source }) => (*status, Some(source)),
        };

        if !status.phase.is_terminal() {
            let message = runtime_error
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "unit of work ended without a terminal phase".to_string());
            status.finish(NodePhase::Error, Some(message));
        }

        let phase = status.phase;
        let message = status.message.clone().unwrap_or_default();
        self.finish_node(status).await;

        match phase {
            NodePhase::Succeeded => Ok(()),
            NodePhase::Failed => Err(NodeError::Failed {
                node: node_id.to_string(),
                message,
            }
            .into()),
            NodePhase::Error | NodePhase::Running => Err(NodeError::Error {
                node: node_id.to_string(),
                message,
            }
            .into()),
        }
    }

    async fn execute_steps(
        &self,
        node_id: &str,
        display_name: &str,
        template_name: &str,
        groups: &[StepGroup],
    ) -> Result<(), FlowError> {
        self.start_node(NodeStatus::running(
            node_id,
            display_name,
            NodeKind::Composite,
            template_name,
        ))
        .await;

        let mut outcome = Ok(());
        for (index, group) in groups.iter().enumerate() {
            tracing::debug!("Executing step group {} of '{}'", index, node_id);

            let children = group.steps.iter().map(|step| {
                (
                    format!("{}[{}].{}", node_id, index, step.name),
                    step.name.clone(),
                    step.template.clone(),
                )
            });

            if let Err(e) = self.join_children(children).await {
                outcome = Err(e);
                break;
            }
        }

        self.finish_composite(node_id, &outcome).await;
        outcome
    }

    async fn execute_dag(
        &self,
        node_id: &str,
        display_name: &str,
        template_name: &str,
        graph: &TaskGraph,
    ) -> Result<(), FlowError> {
        self.start_node(NodeStatus::running(
            node_id,
            display_name,
            NodeKind::Composite,
            template_name,
        ))
        .await;

        if graph.tasks.iter().any(|task| !task.dependencies.is_empty()) {
            tracing::debug!(
                "Task dependencies in '{}' are not enforced, all tasks run concurrently",
                node_id
            );
        }

        let children = graph.tasks.iter().map(|task| {
            (
                format!("{}.{}", node_id, task.name),
                task.name.clone(),
                task.template.clone(),
            )
        });

        let outcome = self.join_children(children).await;
        self.finish_composite(node_id, &outcome).await;
        outcome
    }

    /// Spawn every child, wait for all of them, and report the first error
    /// observed in completion order. Siblings are never cancelled.
    async fn join_children(
        &self,
        children: impl IntoIterator<Item = (String, String, String)>,
    ) -> Result<(), FlowError> {
        let mut running = FuturesUnordered::new();

        for (child_id, display_name, template_name) in children {
            let handle = tokio::spawn(self.clone().execute_template(
                child_id.clone(),
                display_name,
                template_name,
            ));
            running.push(async move { (child_id, handle.await) });
        }

        let mut first_error = None;
        while let Some((child_id, joined)) = running.next().await {
            let result = match joined {
                Ok(result) => result,
                Err(join_err) => {
                    let message = format!("task for node did not complete: {}", join_err);
                    self.run.abandon_node(&child_id, message.clone()).await;
                    Err(NodeError::Error {
                        node: child_id.clone(),
                        message,
                    }
                    .into())
                }
            };

            if let Err(e) = result {
                tracing::warn!("Node '{}' did not succeed: {}", child_id, e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn start_node(&self, status: NodeStatus) {
        self.events.emit(ExecutionEvent::NodeStarted {
            run: self.run.name().to_string(),
            uid: self.run.uid(),
            node_id: status.id.clone(),
            template: status.template_name.clone(),
            kind: status.kind,
            timestamp: Utc::now(),
        });
        self.run.update_node(status).await;
    }

    async fn finish_node(&self, status: NodeStatus) {
        let event = ExecutionEvent::NodeCompleted {
            run: self.run.name().to_string(),
            uid: self.run.uid(),
            node_id: status.id.clone(),
            phase: status.phase,
            message: status.message.clone(),
            timestamp: Utc::now(),
        };
        if self.run.update_node(status).await {
            self.events.emit(event);
        }
    }

    async fn finish_composite(&self, node_id: &str, outcome: &Result<(), FlowError>) {
        let Some(mut status) = self.run.node(node_id).await else {
            return;
        };
        match outcome {
            Ok(()) => status.finish(NodePhase::Succeeded, None),
            Err(e) => status.finish(NodePhase::Failed, Some(e.to_string())),
        };
        self.finish_node(status).await;
    }
}
