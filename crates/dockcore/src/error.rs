use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Engine is shutting down, no new runs are accepted")]
    ShuttingDown,
}

/// Errors raised by the run registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Workflow '{0}' already exists")]
    DuplicateRun(String),

    #[error("Workflow '{0}' not found")]
    NotFound(String),
}

/// Structural problems in a workflow document. These fail a run before any
/// unit of work is created.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("Workflow name is required")]
    MissingName,

    #[error("No entrypoint specified")]
    EntrypointMissing,

    #[error("Entrypoint template '{0}' not found")]
    EntrypointNotFound(String),

    #[error("Template '{template}' not found for {referenced_by}")]
    TemplateNotFound {
        template: String,
        referenced_by: String,
    },

    #[error("Template '{0}' is defined more than once")]
    DuplicateTemplate(String),

    #[error("Template '{template}' has more than one child named '{name}'")]
    DuplicateChild { template: String, name: String },

    #[error("Template '{0}' references itself through its children")]
    CyclicReference(String),

    #[error("Invalid template '{name}': {reason}")]
    InvalidTemplate { name: String, reason: String },

    #[error("Failed to parse workflow: {0}")]
    Parse(String),
}

/// Outcome of a unit of work that did not succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// The program ran and exited non-zero.
    #[error("node '{node}' failed: {message}")]
    Failed { node: String, message: String },

    /// The engine could not run the program or observe its end.
    #[error("node '{node}' errored: {message}")]
    Error { node: String, message: String },
}

/// Errors reported by a container runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("failed to create container: {0}")]
    Create(String),

    #[error("failed to start container: {0}")]
    Start(String),

    #[error("failed to wait for container: {0}")]
    Wait(String),

    #[error("failed to read container logs: {0}")]
    Logs(String),

    #[error("failed to remove container: {0}")]
    Remove(String),

    #[error("container runtime unavailable: {0}")]
    Unavailable(String),
}
