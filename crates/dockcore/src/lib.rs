//! Core types for the dockflow engine
//!
//! Workflow documents, templates, run and node status, the error taxonomy
//! and the execution event bus. Everything else in the workspace builds on
//! these types.

mod error;
pub mod events;
mod status;
mod template;
mod workflow;

pub use error::{DocumentError, FlowError, NodeError, RegistryError, RuntimeError};
pub use events::{EventBus, ExecutionEvent};
pub use status::{NodeKind, NodePhase, NodeStatus, RunPhase, RunStatus, LOGS_OUTPUT};
pub use template::{
    ContainerSpec, DagTask, EnvVar, ScriptSpec, StepGroup, TaskGraph, Template, TemplateKind,
    UnitOfWork, WorkflowStep,
};
pub use workflow::{Metadata, RunId, RunMetadata, WorkflowDocument, WorkflowRun, WorkflowSpec};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
