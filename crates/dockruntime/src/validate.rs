use dockcore::{DocumentError, TemplateKind, WorkflowSpec};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

/// Check that a spec can be walked without hitting a structural error.
///
/// The entrypoint must resolve, template names must be unique, every step and
/// task must reference an existing template, and the reference graph must be
/// acyclic. Steps in one group and tasks in one graph need distinct names,
/// since the name is part of the child's node id. Nothing is executed when
/// this fails.
pub fn validate(spec: &WorkflowSpec) -> Result<(), DocumentError> {
    if spec.entrypoint.trim().is_empty() {
        return Err(DocumentError::EntrypointMissing);
    }

    let graph = build_graph(spec)?;

    if let Err(cycle) = toposort(&graph, None) {
        return Err(DocumentError::CyclicReference(
            graph[cycle.node_id()].to_string(),
        ));
    }

    Ok(())
}

/// Build the template reference graph: one vertex per template, one edge per
/// step or task reference.
fn build_graph(spec: &WorkflowSpec) -> Result<DiGraph<&str, ()>, DocumentError> {
    let mut graph = DiGraph::new();
    let mut template_to_index: HashMap<&str, NodeIndex> = HashMap::new();

    for template in &spec.templates {
        let idx = graph.add_node(template.name.as_str());
        if template_to_index.insert(template.name.as_str(), idx).is_some() {
            return Err(DocumentError::DuplicateTemplate(template.name.clone()));
        }
    }

    if !template_to_index.contains_key(spec.entrypoint.as_str()) {
        return Err(DocumentError::EntrypointNotFound(spec.entrypoint.clone()));
    }

    for template in &spec.templates {
        let label = match template.kind {
            TemplateKind::Work(_) => continue,
            TemplateKind::Steps(_) => "step",
            TemplateKind::Dag(_) => "task",
        };
        let from_idx = template_to_index[template.name.as_str()];
        check_sibling_names(&template.name, &template.kind)?;

        for (child, target) in template.references() {
            if child.trim().is_empty() {
                return Err(DocumentError::InvalidTemplate {
                    name: template.name.clone(),
                    reason: format!("{} name is required", label),
                });
            }
            let to_idx = template_to_index.get(target).ok_or_else(|| {
                DocumentError::TemplateNotFound {
                    template: target.to_string(),
                    referenced_by: format!("{} '{}' in template '{}'", label, child, template.name),
                }
            })?;
            graph.add_edge(from_idx, *to_idx, ());
        }
    }

    Ok(graph)
}

/// Steps may reuse a name across groups (the group index keeps their ids
/// apart) but not within one. Task names must be unique across the graph.
fn check_sibling_names(template: &str, kind: &TemplateKind) -> Result<(), DocumentError> {
    let sibling_sets: Vec<Vec<&str>> = match kind {
        TemplateKind::Work(_) => return Ok(()),
        TemplateKind::Steps(groups) => groups
            .iter()
            .map(|group| group.steps.iter().map(|step| step.name.as_str()).collect())
            .collect(),
        TemplateKind::Dag(graph) => {
            vec![graph.tasks.iter().map(|task| task.name.as_str()).collect()]
        }
    };

    for siblings in sibling_sets {
        let mut seen = HashSet::new();
        for name in siblings {
            if !seen.insert(name) {
                return Err(DocumentError::DuplicateChild {
                    template: template.to_string(),
                    name: name.to_string(),
                });
            }
        }
    }
    Ok(())
}
