use crate::DocumentError;
use serde::{Deserialize, Serialize};

/// A named definition of work inside a workflow document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TemplateDef", into = "TemplateDef")]
pub struct Template {
    pub name: String,
    pub kind: TemplateKind,
}

/// What a template does when it is executed.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateKind {
    /// A single isolated runtime unit.
    Work(UnitOfWork),
    /// Groups run in order; members of a group run concurrently.
    Steps(Vec<StepGroup>),
    /// All tasks run concurrently.
    Dag(TaskGraph),
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnitOfWork {
    Container(ContainerSpec),
    Script(ScriptSpec),
}

impl Template {
    pub fn container(name: impl Into<String>, spec: ContainerSpec) -> Self {
        Self {
            name: name.into(),
            kind: TemplateKind::Work(UnitOfWork::Container(spec)),
        }
    }

    pub fn script(name: impl Into<String>, spec: ScriptSpec) -> Self {
        Self {
            name: name.into(),
            kind: TemplateKind::Work(UnitOfWork::Script(spec)),
        }
    }

    pub fn steps(name: impl Into<String>, groups: Vec<StepGroup>) -> Self {
        Self {
            name: name.into(),
            kind: TemplateKind::Steps(groups),
        }
    }

    pub fn dag(name: impl Into<String>, tasks: Vec<DagTask>) -> Self {
        Self {
            name: name.into(),
            kind: TemplateKind::Dag(TaskGraph { tasks }),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, TemplateKind::Work(_))
    }

    /// Every (child name, referenced template) pair declared by a composite.
    /// Leaves reference nothing.
    pub fn references(&self) -> Vec<(&str, &str)> {
        match &self.kind {
            TemplateKind::Work(_) => Vec::new(),
            TemplateKind::Steps(groups) => groups
                .iter()
                .flat_map(|group| group.steps.iter())
                .map(|step| (step.name.as_str(), step.template.as_str()))
                .collect(),
            TemplateKind::Dag(graph) => graph
                .tasks
                .iter()
                .map(|task| (task.name.as_str(), task.template.as_str()))
                .collect(),
        }
    }
}

impl UnitOfWork {
    pub fn image(&self) -> &str {
        match self {
            UnitOfWork::Container(c) => &c.image,
            UnitOfWork::Script(s) => &s.image,
        }
    }

    pub fn working_dir(&self) -> Option<&str> {
        match self {
            UnitOfWork::Container(c) => c.working_dir.as_deref(),
            UnitOfWork::Script(s) => s.working_dir.as_deref(),
        }
    }

    pub fn env(&self) -> &[EnvVar] {
        match self {
            UnitOfWork::Container(c) => &c.env,
            UnitOfWork::Script(s) => &s.env,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(EnvVar::new(name, value));
        self
    }
}

/// Inline source run by an interpreter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptSpec {
    pub image: String,
    /// Interpreter invocation, `sh` when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

impl ScriptSpec {
    pub fn new(image: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            source: source.into(),
            ..Default::default()
        }
    }

    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(EnvVar::new(name, value));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One parallel group of a step list. Serialized as a plain list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepGroup {
    pub steps: Vec<WorkflowStep>,
}

impl StepGroup {
    pub fn new(steps: Vec<WorkflowStep>) -> Self {
        Self { steps }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub name: String,
    pub template: String,
}

impl WorkflowStep {
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskGraph {
    pub tasks: Vec<DagTask>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagTask {
    pub name: String,
    pub template: String,
    /// Kept for display only. Tasks are never ordered by it.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

impl DagTask {
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
            dependencies: Vec::new(),
        }
    }

    pub fn depends_on(mut self, task: impl Into<String>) -> Self {
        self.dependencies.push(task.into());
        self
    }
}

/// Document shape of a template: a name plus exactly one body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TemplateDef {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    container: Option<ContainerSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    script: Option<ScriptSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    steps: Option<Vec<StepGroup>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dag: Option<TaskGraph>,
}

impl TryFrom<TemplateDef> for Template {
    type Error = DocumentError;

    fn try_from(def: TemplateDef) -> Result<Self, Self::Error> {
        let invalid = |reason: &str| DocumentError::InvalidTemplate {
            name: def.name.clone(),
            reason: reason.to_string(),
        };

        if def.name.trim().is_empty() {
            return Err(invalid("template name is required"));
        }

        let bodies = [
            def.container.is_some(),
            def.script.is_some(),
            def.steps.is_some(),
            def.dag.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count();

        if bodies != 1 {
            return Err(invalid(
                "exactly one of container, script, steps or dag must be set",
            ));
        }

        let kind = if let Some(container) = def.container {
            if container.image.trim().is_empty() {
                return Err(invalid("container image is required"));
            }
            TemplateKind::Work(UnitOfWork::Container(container))
        } else if let Some(script) = def.script {
            if script.image.trim().is_empty() {
                return Err(invalid("script image is required"));
            }
            TemplateKind::Work(UnitOfWork::Script(script))
        } else if let Some(groups) = def.steps {
            if groups
                .iter()
                .flat_map(|g| g.steps.iter())
                .any(|s| s.name.trim().is_empty())
            {
                return Err(invalid("every step needs a name"));
            }
            TemplateKind::Steps(groups)
        } else if let Some(graph) = def.dag {
            if graph.tasks.iter().any(|t| t.name.trim().is_empty()) {
                return Err(invalid("every task needs a name"));
            }
            TemplateKind::Dag(graph)
        } else {
            return Err(invalid("template has no body"));
        };

        Ok(Template {
            name: def.name,
            kind,
        })
    }
}

impl From<Template> for TemplateDef {
    fn from(template: Template) -> Self {
        let mut def = TemplateDef {
            name: template.name,
            ..Default::default()
        };
        match template.kind {
            TemplateKind::Work(UnitOfWork::Container(c)) => def.container = Some(c),
            TemplateKind::Work(UnitOfWork::Script(s)) => def.script = Some(s),
            TemplateKind::Steps(groups) => def.steps = Some(groups),
            TemplateKind::Dag(graph) => def.dag = Some(graph),
        }
        def
    }
}
