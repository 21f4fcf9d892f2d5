//! Container execution for dockflow
//!
//! Runs unit-of-work templates as isolated containers and reports the outcome
//! back to the orchestrator as node statuses.

mod adapter;
mod docker;
mod runtime;

pub use adapter::{
    build_env, build_unit_spec, unit_name, ExecutionAdapter, DEFAULT_INTERPRETER,
    DEFAULT_NAME_PREFIX, ENV_NODE_NAME, ENV_TEMPLATE_NAME, ENV_WORKFLOW_NAME,
};
pub use docker::{DockerCli, DockerConfig};
pub use runtime::{ContainerRuntime, RuntimeUnit, UnitSpec};
