use crate::{DocumentError, RunStatus, Template};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type RunId = Uuid;

/// A parsed workflow document, as submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDocument {
    #[serde(default)]
    pub metadata: Metadata,
    pub spec: WorkflowSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
}

/// The immutable part of a run: its templates and where to start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    #[serde(default)]
    pub entrypoint: String,
    #[serde(default)]
    pub templates: Vec<Template>,
}

impl WorkflowSpec {
    pub fn template(&self, name: &str) -> Option<&Template> {
        self.templates.iter().find(|t| t.name == name)
    }
}

impl WorkflowDocument {
    pub fn new(name: impl Into<String>, entrypoint: impl Into<String>) -> Self {
        Self {
            metadata: Metadata { name: name.into() },
            spec: WorkflowSpec {
                entrypoint: entrypoint.into(),
                templates: Vec::new(),
            },
        }
    }

    pub fn with_template(mut self, template: Template) -> Self {
        self.spec.templates.push(template);
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Parse a document body, trying JSON first and YAML second.
    pub fn parse(body: &[u8]) -> Result<Self, DocumentError> {
        match serde_json::from_slice(body) {
            Ok(doc) => Ok(doc),
            Err(json_err) => serde_yaml::from_slice(body).map_err(|yaml_err| {
                tracing::debug!("JSON parse failed: {}", json_err);
                DocumentError::Parse(yaml_err.to_string())
            }),
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, DocumentError> {
        serde_yaml::from_str(yaml).map_err(|e| DocumentError::Parse(e.to_string()))
    }

    pub fn to_yaml(&self) -> Result<String, DocumentError> {
        serde_yaml::to_string(self).map_err(|e| DocumentError::Parse(e.to_string()))
    }
}

/// Identity of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub name: String,
    pub uid: RunId,
}

/// A point-in-time snapshot of one run: spec plus status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub metadata: RunMetadata,
    pub spec: WorkflowSpec,
    pub status: RunStatus,
}

impl WorkflowRun {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TemplateKind;

    const HELLO_YAML: &str = r#"
apiVersion: argoproj.io/v1alpha1
kind: Workflow
metadata:
  name: hello
spec:
  entrypoint: main
  templates:
  - name: main
    steps:
    - - name: say
        template: echo
  - name: echo
    container:
      image: alpine:3.19
      command: [echo, hello]
  - name: py
    script:
      image: python:3.12-alpine
      command: [python]
      source: |
        print("hi")
"#;

    #[test]
    fn parses_yaml_document() {
        let doc = WorkflowDocument::parse(HELLO_YAML.as_bytes()).unwrap();
        assert_eq!(doc.name(), "hello");
        assert_eq!(doc.spec.entrypoint, "main");
        assert_eq!(doc.spec.templates.len(), 3);
        assert!(matches!(
            doc.spec.template("main").map(|t| &t.kind),
            Some(TemplateKind::Steps(_))
        ));
        assert!(doc.spec.template("py").unwrap().is_leaf());
    }

    #[test]
    fn parses_json_document() {
        let json = r#"{
            "metadata": {"name": "j"},
            "spec": {
                "entrypoint": "echo",
                "templates": [{"name": "echo", "container": {"image": "alpine"}}]
            }
        }"#;
        let doc = WorkflowDocument::parse(json.as_bytes()).unwrap();
        assert_eq!(doc.name(), "j");
        assert!(doc.spec.template("echo").is_some());
    }

    #[test]
    fn reports_parse_errors() {
        let err = WorkflowDocument::parse(b"spec: [not, a, map").unwrap_err();
        assert!(matches!(err, DocumentError::Parse(_)));
    }

    #[test]
    fn yaml_round_trip_keeps_templates() {
        let doc = WorkflowDocument::from_yaml(HELLO_YAML).unwrap();
        let again = WorkflowDocument::from_yaml(&doc.to_yaml().unwrap()).unwrap();
        assert_eq!(doc, again);
    }
}
