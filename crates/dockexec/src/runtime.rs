use async_trait::async_trait;
use dockcore::{EnvVar, RuntimeError};

/// A fully resolved request for one isolated runtime unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSpec {
    pub image: String,
    /// Entrypoint followed by its arguments. Empty means the image default.
    pub command: Vec<String>,
    pub working_dir: Option<String>,
    pub env: Vec<EnvVar>,
}

/// Handle to a created runtime unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeUnit {
    /// Opaque id assigned by the runtime.
    pub id: String,
    pub name: String,
}

/// Lifecycle operations on an isolated container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn create(&self, spec: &UnitSpec, name: &str) -> Result<RuntimeUnit, RuntimeError>;

    async fn start(&self, unit: &RuntimeUnit) -> Result<(), RuntimeError>;

    /// Block until the unit stops and return its exit code.
    async fn wait(&self, unit: &RuntimeUnit) -> Result<i64, RuntimeError>;

    /// Combined standard output and error.
    async fn logs(&self, unit: &RuntimeUnit) -> Result<String, RuntimeError>;

    /// Force removal, whether or not the unit is still running.
    async fn remove(&self, unit: &RuntimeUnit) -> Result<(), RuntimeError>;
}
