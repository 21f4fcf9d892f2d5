// crates/dockexec/src/adapter.rs
// Turns one unit-of-work template into a runtime unit and back into a node status

use crate::docker::{DockerCli, DockerConfig};
use crate::runtime::{ContainerRuntime, RuntimeUnit, UnitSpec};
use async_trait::async_trait;
use dockcore::{EnvVar, NodePhase, NodeStatus, RuntimeError, UnitOfWork};
use dockruntime::{UnitError, UnitExecutor, UnitRequest};
use std::sync::Arc;

pub const DEFAULT_NAME_PREFIX: &str = "dockflow";

/// Interpreter used for scripts that do not declare one.
pub const DEFAULT_INTERPRETER: &str = "sh";

pub const ENV_WORKFLOW_NAME: &str = "WORKFLOW_NAME";
pub const ENV_NODE_NAME: &str = "WORKFLOW_NODE_NAME";
pub const ENV_TEMPLATE_NAME: &str = "WORKFLOW_TEMPLATE_NAME";

/// Executes leaves of the template graph as containers.
pub struct ExecutionAdapter {
    runtime: Arc<dyn ContainerRuntime>,
    name_prefix: String,
}

impl ExecutionAdapter {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
        }
    }

    /// Adapter over the docker CLI described by `config`
    pub fn docker(config: &DockerConfig) -> Self {
        Self::new(Arc::new(DockerCli::new(config))).with_name_prefix(&config.name_prefix)
    }

    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Start the unit and wait for it to stop.
    async fn run_unit(&self, unit: &RuntimeUnit) -> Result<i64, RuntimeError> {
        self.runtime.start(unit).await?;
        self.runtime.wait(unit).await
    }

    async fn capture_logs(&self, unit: &RuntimeUnit, status: &mut NodeStatus) {
        match self.runtime.logs(unit).await {
            Ok(logs) => status.set_logs(logs),
            Err(e) => tracing::warn!(
                "Could not capture output of node '{}' ({}): {}",
                status.id,
                unit.name,
                e
            ),
        }
    }

    async fn destroy(&self, unit: &RuntimeUnit) {
        if let Err(e) = self.runtime.remove(unit).await {
            tracing::warn!("Failed to remove container '{}': {}", unit.name, e);
        }
    }
}

#[async_trait]
impl UnitExecutor for ExecutionAdapter {
    async fn execute(&self, request: UnitRequest) -> Result<NodeStatus, UnitError> {
        let spec = build_unit_spec(&request);
        let name = unit_name(&self.name_prefix, &request.run_name, &request.node_id);

        let mut status = request.running_status();
        status.runtime_unit = Some(name.clone());

        tracing::info!(
            "🐳 Running node '{}' in container '{}' ({})",
            request.node_id,
            name,
            spec.image
        );

        let unit = match self.runtime.create(&spec, &name).await {
            Ok(unit) => unit,
            Err(e) => {
                tracing::error!("Could not create container for node '{}': {}", request.node_id, e);
                status.finish(NodePhase::Error, Some(e.to_string()));
                return Err(UnitError::new(status, e));
            }
        };

        let result = match self.run_unit(&unit).await {
            Ok(code) => {
                if code == 0 {
                    status.finish(NodePhase::Succeeded, None);
                } else {
                    tracing::warn!("Node '{}' exited with code {}", request.node_id, code);
                    status.finish(NodePhase::Failed, Some(format!("exited with code {}", code)));
                }
                self.capture_logs(&unit, &mut status).await;
                Ok(status)
            }
            Err(e) => {
                tracing::error!("Container for node '{}' did not finish: {}", request.node_id, e);
                status.finish(NodePhase::Error, Some(e.to_string()));
                Err(UnitError::new(status, e))
            }
        };

        self.destroy(&unit).await;
        result
    }
}

/// Resolve a unit-of-work template into a runtime request.
pub fn build_unit_spec(request: &UnitRequest) -> UnitSpec {
    let command = match &request.work {
        UnitOfWork::Container(container) => container
            .command
            .iter()
            .chain(container.args.iter())
            .cloned()
            .collect(),
        UnitOfWork::Script(script) => {
            let mut command = if script.command.is_empty() {
                vec![DEFAULT_INTERPRETER.to_string()]
            } else {
                script.command.clone()
            };
            command.push("-c".to_string());
            command.push(script.source.clone());
            command
        }
    };

    UnitSpec {
        image: request.work.image().to_string(),
        command,
        working_dir: request.work.working_dir().map(String::from),
        env: build_env(request),
    }
}

/// Injected identifiers first, then declared variables in document order.
/// A declared variable may not shadow an injected one.
pub fn build_env(request: &UnitRequest) -> Vec<EnvVar> {
    let mut env = vec![
        EnvVar::new(ENV_WORKFLOW_NAME, &request.run_name),
        EnvVar::new(ENV_NODE_NAME, &request.node_id),
        EnvVar::new(ENV_TEMPLATE_NAME, &request.template_name),
    ];

    for var in request.work.env() {
        let reserved = [ENV_WORKFLOW_NAME, ENV_NODE_NAME, ENV_TEMPLATE_NAME];
        if reserved.contains(&var.name.as_str()) {
            tracing::warn!(
                "Ignoring env var '{}' declared by template '{}': the name is reserved",
                var.name,
                request.template_name
            );
            continue;
        }
        env.push(var.clone());
    }

    env
}

/// Deterministic container name `<prefix>-<run>-<node>`, restricted to
/// `[A-Za-z0-9_-]` and starting with an alphanumeric.
pub fn unit_name(prefix: &str, run_name: &str, node_id: &str) -> String {
    let raw = if prefix.is_empty() {
        format!("{}-{}", run_name, node_id)
    } else {
        format!("{}-{}-{}", prefix, run_name, node_id)
    };

    let name: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();

    match name.chars().next() {
        Some(c) if c.is_ascii_alphanumeric() => name,
        _ => format!("u{}", name),
    }
}
