//! Workflow execution engine
//!
//! The run registry, structural validation of workflow specs, and the
//! orchestrator that walks step lists and task graphs, handing every leaf to
//! a [`UnitExecutor`].

mod executor;
mod registry;
mod runtime;
mod validate;

pub use executor::{UnitError, UnitExecutor, UnitRequest};
pub use registry::{RunEntry, RunRegistry};
pub use runtime::{EngineConfig, Orchestrator};
pub use validate::validate;
