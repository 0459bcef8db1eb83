//! Compilation: turns a JSON form document into an `Artefact` a host keeps
//! around for the lifetime of the process and hands to a fresh `Evaluator`
//! per request.
//!
//! Builds on `wayform_core`'s parse/metadata/wiring steps (1-4, 7 in the
//! core crate's own numbering) and layers on the two steps that need the
//! handler registry, which only this crate owns: handler registration and
//! the `isAsync` reverse-topological pass. Handler registration is done
//! *before* `isAsync` rather than after, since the reverse-topological walk
//! needs every node's handler already resolvable to call
//! `compute_is_async`. Wiring runs before handler registration so the
//! `isAsync` walk has a complete graph to topologically sort.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use wayform_core::{
    AstNode, DependencyGraph, EngineError, IdAllocator, NodeId, NodeMetadata, NodeType, PropertyValue, PseudoKind, ReadRegistry,
    Registry,
};

use crate::handler::Handler;
use crate::handlers::build_handler;
use crate::handlers::support::scalar_str;

/// A compiled form, shared (via `Arc`) across every request the host serves.
/// Nothing here is ever mutated after `compile` returns; a request overlays
/// these registries and this graph with its own fresh, request-scoped
/// pending layer (see `Evaluator::with_runtime_overlay`).
pub struct Artefact {
    pub(crate) nodes: Arc<Registry<AstNode>>,
    pub(crate) metadata: Arc<Registry<NodeMetadata>>,
    pub(crate) handlers: Arc<Registry<Arc<dyn Handler>>>,
    pub(crate) graph: Arc<DependencyGraph>,
    pub(crate) pseudo_index: Arc<HashMap<(String, String), NodeId>>,
    pub(crate) root: NodeId,
}

impl Artefact {
    /// The root JOURNEY node's identity.
    #[must_use]
    pub fn root(&self) -> &NodeId {
        &self.root
    }

    /// Number of compiled AST nodes, including generated pseudo nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.size()
    }

    /// Find every compiled node matching `predicate`, keyed by id. Lets a
    /// host locate the `NodeId` for a particular step/journey out of a
    /// compiled document's shape alone, to pass to
    /// `LifecycleController::handle_request`.
    #[must_use]
    pub fn find_where(&self, predicate: impl Fn(&AstNode) -> bool) -> Vec<(NodeId, AstNode)> {
        self.nodes.find_where(predicate)
    }
}

/// Compile a JSON form document into an `Artefact`.
///
/// # Errors
///
/// Returns `EngineError::Compilation` for a malformed document (unknown
/// node types, a non-JOURNEY root) and `EngineError::HandlerRegistry` if
/// handler construction fails for some node (an unrecognized variant, or a
/// fallible handler constructor rejecting a malformed property).
pub fn compile(document: &Value) -> Result<Artefact, EngineError> {
    let allocator = IdAllocator::new();

    let parsed = wayform_core::parse_document(document, &allocator)?;
    wayform_core::mark_step_descendants(&parsed.nodes, &parsed.metadata, &parsed.root);

    let pseudo_nodes = wayform_core::generate_pseudo_nodes(&parsed.nodes, &allocator);
    for (id, node) in pseudo_nodes.entries() {
        parsed.nodes.register(id.clone(), node).map_err(|err| {
            EngineError::handler_registry(format!("failed to merge generated pseudo node {id}: {err}"))
        })?;
        parsed.metadata.register(id, NodeMetadata::new()).ok();
    }

    let pseudo_index = build_pseudo_index(&parsed.nodes);

    let graph = DependencyGraph::new();
    wayform_core::wiring::wire_all(&parsed.nodes, &parsed.metadata, &graph);
    wire_reference_pseudo_edges(&parsed.nodes, &pseudo_index, &graph);

    let handlers: Registry<Arc<dyn Handler>> = Registry::new("handlers");
    for (id, node) in parsed.nodes.entries() {
        let handler = build_handler(&node)?;
        handlers.register(id, handler)?;
    }

    compute_is_async(&parsed.nodes, &parsed.metadata, &handlers, &graph);

    Ok(Artefact {
        nodes: Arc::new(parsed.nodes),
        metadata: Arc::new(parsed.metadata),
        handlers: Arc::new(handlers),
        graph: Arc::new(graph),
        pseudo_index: Arc::new(pseudo_index),
        root: parsed.root,
    })
}

/// Index every generated pseudo node by `(namespace, key)`, the same pair a
/// REFERENCE expression's `namespace`/`key` properties carry. `@scope`/
/// `@self` references never get an entry here, since they resolve against
/// the scope stack / enclosing field rather than a pseudo node.
fn build_pseudo_index(nodes: &Registry<AstNode>) -> HashMap<(String, String), NodeId> {
    let mut index = HashMap::new();
    for (id, node) in nodes.find_where(|node: &AstNode| node.node_type() == NodeType::Pseudo) {
        let Some(namespace) = scalar_str(node.properties(), "namespace") else {
            continue;
        };
        let Some(key) = scalar_str(node.properties(), "key") else {
            continue;
        };
        index.insert((namespace.to_string(), key.to_string()), id);
    }
    index
}

/// Wire a `pseudo -> reference` edge for every REFERENCE expression whose
/// `(namespace, key)` pair matches a generated pseudo node.
///
/// `wayform_core::wiring::wire_all` only emits edges for properties that
/// were parsed as `PropertyValue::Child`/`Children` — a REFERENCE's
/// `namespace`/`key` scalars never take that shape, since the pseudo node
/// they resolve to at evaluation time (via `Evaluator::pseudo_for`) isn't
/// discovered until the pseudo-generation pass runs, well after the
/// reference node itself is parsed. Without this pass a REFERENCE's pseudo
/// dependency is invisible to the dependency graph, which would leave an
/// `ANSWER_REMOTE`-backed reference's `isAsync` computed as `false`.
fn wire_reference_pseudo_edges(nodes: &Registry<AstNode>, pseudo_index: &HashMap<(String, String), NodeId>, graph: &DependencyGraph) {
    for (id, node) in nodes.find_where(|node: &AstNode| node.node_type() == NodeType::Expression && node.variant() == "REFERENCE") {
        let Some(namespace) = scalar_str(node.properties(), "namespace") else {
            continue;
        };
        let Some(key) = scalar_str(node.properties(), "key") else {
            continue;
        };
        let remote = matches!(node.properties().get("remote"), Some(PropertyValue::Scalar(Value::Bool(true))));
        if PseudoKind::from_namespace(namespace, remote).is_none() {
            continue;
        }
        if let Some(pseudo_id) = pseudo_index.get(&(namespace.to_string(), key.to_string())) {
            graph.wire(pseudo_id.clone(), id, "pseudo", None);
        }
    }
}

/// Compute and record each node's `isAsync` flag, visiting dependencies
/// before dependents so a node's flag only ever depends on already-settled
/// flags.
fn compute_is_async(nodes: &Registry<AstNode>, metadata: &Registry<NodeMetadata>, handlers: &Registry<Arc<dyn Handler>>, graph: &DependencyGraph) {
    // Every node id is passed as a root (rather than just the program's
    // root JOURNEY) so a node with no inbound-from-root path — a pseudo
    // node nothing currently references, say — still gets visited and a
    // deterministic `false` default instead of being skipped entirely.
    let mut roots = nodes.ids();
    roots.sort();
    let order = graph.reverse_topological_from(&roots);

    for id in order {
        let dependency_is_async: Vec<bool> = graph
            .dependencies(&id)
            .into_iter()
            .map(|dep| metadata.get(&dep).is_some_and(|meta| meta.is_async))
            .collect();
        let Some(handler) = handlers.get(&id) else {
            continue;
        };
        let is_async = handler.compute_is_async(&dependency_is_async);
        metadata.update(&id, |meta| meta.is_async = is_async);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_document() -> Value {
        json!({
            "type": "JOURNEY",
            "code": "apply",
            "path": "/apply",
            "steps": [
                {
                    "type": "STEP",
                    "path": "/apply/name",
                    "blocks": [
                        {
                            "type": "BLOCK",
                            "blockType": "FIELD",
                            "variant": "text-input",
                            "code": "fullName",
                            "label": "Full name"
                        }
                    ],
                    "onSubmission": [{
                        "type": "TRANSITION",
                        "transitionType": "SUBMIT",
                        "validate": false,
                        "onValidNext": {
                            "type": "EXPRESSION",
                            "expressionType": "NEXT",
                            "redirect": "/apply/done"
                        }
                    }]
                }
            ]
        })
    }

    #[test]
    fn compiles_a_simple_document() {
        let artefact = compile(&sample_document()).unwrap();
        assert!(artefact.node_count() > 0);
        assert!(artefact.handlers.has(artefact.root()));
    }

    #[test]
    fn reference_pseudo_edge_makes_remote_answer_reference_async() {
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
                    "hidden": {
                        "type": "EXPRESSION",
                        "expressionType": "REFERENCE",
                        "namespace": "answers",
                        "key": "other",
                        "remote": true
                    }
                }]
            }]
        });

        let artefact = compile(&document).unwrap();
        let reference = artefact
            .nodes
            .find_where(|n| n.node_type() == NodeType::Expression && n.variant() == "REFERENCE")
            .into_iter()
            .next()
            .unwrap()
            .0;
        let meta = artefact.metadata.get(&reference).unwrap();
        assert!(meta.is_async, "reference to a remote answer must be marked async");
    }

    #[test]
    fn rejects_malformed_document() {
        let bad = json!({"type": "NOT_A_NODE"});
        assert!(compile(&bad).is_err());
    }
}
