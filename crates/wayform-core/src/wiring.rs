//! The wiring pass: walks the AST and emits `DATA_FLOW` edges for every
//! property whose value is (or contains) a child AST node, plus the extra
//! validation-gating edges a SUBMIT transition needs when `validate: true`.

use crate::ast::{AstNode, NodeType, PropertyValue};
use crate::graph::DependencyGraph;
use crate::ids::NodeId;
use crate::metadata::NodeMetadata;
use crate::registry::{ReadRegistry, Registry};

/// Emit edges for one node's properties: `child -> node` per AST-node-valued
/// property (and per list element, carrying its index).
fn wire_node(node: &AstNode, graph: &DependencyGraph) {
    for (property, value) in node.properties().iter() {
        match value {
            PropertyValue::Scalar(_) => {}
            PropertyValue::Child(child) => {
                graph.wire(child.clone(), node.id().clone(), property, None);
            }
            PropertyValue::Children(children) => {
                for (index, child) in children.iter().enumerate() {
                    graph.wire(child.clone(), node.id().clone(), property, Some(index));
                }
            }
        }
    }
}

/// Wire every node in the registry. Call once, after parsing and metadata
/// marking, as compilation step 7.
pub fn wire_all(nodes: &Registry<AstNode>, metadata: &Registry<NodeMetadata>, graph: &DependencyGraph) {
    for (_, node) in nodes.entries() {
        wire_node(&node, graph);
    }
    wire_submit_validation_gates(nodes, metadata, graph);
}

/// Wire only the given ids (and, transitively, their descendants reachable
/// through child properties). Used to extend the graph when an iterator
/// handler registers new runtime nodes mid-evaluation, without re-walking
/// the whole compiled program.
pub fn wire_nodes(nodes: &Registry<AstNode>, graph: &DependencyGraph, ids: &[NodeId]) {
    let mut stack: Vec<NodeId> = ids.to_vec();
    let mut visited: std::collections::HashSet<NodeId> = std::collections::HashSet::new();
    while let Some(id) = stack.pop() {
        if !visited.insert(id.clone()) {
            continue;
        }
        let Some(node) = nodes.get(&id) else {
            continue;
        };
        wire_node(&node, graph);
        for (_, value) in node.child_ids() {
            stack.extend(value.child_ids());
        }
    }
}

fn find_parent_step(nodes: &Registry<AstNode>, metadata: &Registry<NodeMetadata>, start: &NodeId) -> Option<NodeId> {
    let mut current = metadata.get(start)?.attached_to_parent_node;
    while let Some(candidate) = current {
        if let Some(node) = nodes.get(&candidate) {
            if node.node_type() == NodeType::Step {
                return Some(candidate);
            }
        }
        current = metadata.get(&candidate).and_then(|meta| meta.attached_to_parent_node);
    }
    None
}

fn collect_validation_descendants(nodes: &Registry<AstNode>, root: &NodeId, out: &mut Vec<NodeId>) {
    let Some(node) = nodes.get(root) else {
        return;
    };
    for (_, value) in node.child_ids() {
        for child in value.child_ids() {
            if let Some(child_node) = nodes.get(&child) {
                if child_node.node_type() == NodeType::Expression && child_node.variant() == "VALIDATION" {
                    out.push(child.clone());
                }
            }
            collect_validation_descendants(nodes, &child, out);
        }
    }
}

/// For every SUBMIT transition with `validate: true`, wire an edge from
/// every VALIDATION expression descending from its containing STEP into
/// the transition, so the transition's evaluation depends on all step
/// validations having run first.
fn wire_submit_validation_gates(nodes: &Registry<AstNode>, metadata: &Registry<NodeMetadata>, graph: &DependencyGraph) {
    for (id, node) in nodes.find_where(|node: &AstNode| {
        node.node_type() == NodeType::Transition && node.variant() == "SUBMIT"
    }) {
        let validates = matches!(
            node.properties().get("validate"),
            Some(PropertyValue::Scalar(serde_json::Value::Bool(true)))
        );
        if !validates {
            continue;
        }
        let Some(step_id) = find_parent_step(nodes, metadata, &id) else {
            continue;
        };
        let mut validations = Vec::new();
        collect_validation_descendants(nodes, &step_id, &mut validations);
        for validation in validations {
            graph.wire(validation, id.clone(), "validations", None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parse_document;
    use crate::ids::IdAllocator;
    use serde_json::json;

    #[test]
    fn submit_with_validate_depends_on_step_validations() {
        let document = json!({
            "type": "JOURNEY",
            "code": "apply",
            "path": "/apply",
            "steps": [{
                "type": "STEP",
                "path": "/apply/name",
                "blocks": [{
                    "type": "BLOCK",
                    "blockType": "FIELD",
                    "variant": "text-input",
                    "code": "fullName",
                    "validate": [{
                        "type": "EXPRESSION",
                        "expressionType": "VALIDATION",
                        "function": "isEmpty"
                    }]
                }],
                "onSubmission": [{
                    "type": "TRANSITION",
                    "transitionType": "SUBMIT",
                    "validate": true
                }]
            }]
        });

        let allocator = IdAllocator::new();
        let parsed = parse_document(&document, &allocator).unwrap();
        crate::compiler::mark_step_descendants(&parsed.nodes, &parsed.metadata, &parsed.root);
        let graph = DependencyGraph::new();
        wire_all(&parsed.nodes, &parsed.metadata, &graph);

        let (submit_id, _) = &parsed.nodes.find_where(|n| n.variant() == "SUBMIT")[0];
        let deps = graph.dependencies(submit_id);
        assert!(!deps.is_empty(), "submit transition should depend on its step's validations");
    }
}
