//! Runtime node creation: the surface an iterator (MAP/FILTER/FIND) or
//! conditional handler uses to materialize new AST nodes mid-evaluation and
//! have them registered, handler-assigned, and wired into the request's
//! overlay graph without touching the compiled program's shared state.
//!
//! `wayform-core::wiring::wire_nodes` is concrete over `Registry`/
//! `DependencyGraph` and can't be reused against a request's
//! `OverlayRegistry`/`OverlayGraph` pair, so the subtree wiring walk below is
//! a small, overlay-aware twin of that pass rather than a call into it.

use std::collections::HashSet;

use wayform_core::{AstNode, EngineError, NodeCategory, NodeId, NodeMetadata, NodeType, PropertyMap, PropertyValue, PseudoKind, ReadRegistry};

use crate::evaluator::Evaluator;

/// Bound to the node currently being evaluated, so new nodes a handler
/// creates can be wired as that node's dependency.
pub struct RuntimeHooks<'a> {
    evaluator: &'a Evaluator,
    invoking: NodeId,
}

impl<'a> RuntimeHooks<'a> {
    pub(crate) fn new(evaluator: &'a Evaluator, invoking: NodeId) -> Self {
        Self { evaluator, invoking }
    }

    /// The id of the node this set of hooks was handed to.
    #[must_use]
    pub fn invoking(&self) -> &NodeId {
        &self.invoking
    }

    /// Parse `value` as a fresh AST subtree under a runtime identity,
    /// register a handler for every node in it, wire it into the overlay
    /// graph, and wire the subtree's root as a dependency of the invoking
    /// node via `property`. Used by MAP/FILTER/FIND to materialize one
    /// element's subtree per iteration.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` is not a well-formed node document, or if
    /// handler construction fails for some node in the subtree.
    pub fn create_node(&self, value: &serde_json::Value, property: impl Into<String>) -> Result<NodeId, EngineError> {
        let root = wayform_core::parse_runtime_node(
            value,
            self.evaluator.allocator(),
            NodeCategory::RuntimeAst,
            &self.evaluator.nodes,
            &self.evaluator.metadata,
            None,
        )?;
        let subtree = self.register_runtime_subtree(&root)?;
        self.wire_overlay_subtree(&subtree);
        self.evaluator.graph.wire(root.clone(), self.invoking.clone(), property, None);
        Ok(root)
    }

    /// Construct a pseudo node of `kind` directly (bypassing document
    /// parsing, since pseudo nodes never come from the input document),
    /// register it, and assign it a handler. Used when a handler needs to
    /// reference a request-scoped value (e.g. a freshly bound iterator
    /// element's own `ANSWER_LOCAL` lookup) that wasn't discovered during
    /// compilation's pseudo-node generation pass.
    ///
    /// # Errors
    ///
    /// Returns an error if the pseudo node's identity is already registered,
    /// or if no handler is known for `kind`.
    pub fn create_pseudo_node(&self, kind: PseudoKind, properties: PropertyMap) -> Result<NodeId, EngineError> {
        let id = self.evaluator.next_id(NodeCategory::RuntimePseudo);
        let node = AstNode::new(id.clone(), NodeType::Pseudo, kind.as_variant_str(), properties);
        self.evaluator.nodes.register(id.clone(), node)?;
        self.evaluator.metadata.register(id.clone(), NodeMetadata::new())?;
        self.register_handler_for(&id)?;
        Ok(id)
    }

    /// Collect every id in the subtree rooted at `root` (via `child_ids`)
    /// and register a handler for each that doesn't already have one.
    fn register_runtime_subtree(&self, root: &NodeId) -> Result<Vec<NodeId>, EngineError> {
        let mut stack = vec![root.clone()];
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut ids = Vec::new();

        while let Some(id) = stack.pop() {
            if !visited.insert(id.clone()) {
                continue;
            }
            ids.push(id.clone());
            if let Some(node) = self.evaluator.nodes.get(&id) {
                for (_, value) in node.child_ids() {
                    stack.extend(value.child_ids());
                }
            }
        }

        for id in &ids {
            self.register_handler_for(id)?;
        }

        Ok(ids)
    }

    fn register_handler_for(&self, id: &NodeId) -> Result<(), EngineError> {
        if self.evaluator.handlers.has(id) {
            return Ok(());
        }
        let node = self
            .evaluator
            .nodes
            .get(id)
            .ok_or_else(|| EngineError::lookup_failed(format!("{id}: node not registered before handler assignment")))?;
        let handler = crate::handlers::build_handler(&node)?;
        self.evaluator.handlers.register(id.clone(), handler)?;
        Ok(())
    }

    /// Emit `child -> node` edges for every node in `ids`, mirroring
    /// `wayform_core::wiring::wire_node` but against the overlay graph.
    fn wire_overlay_subtree(&self, ids: &[NodeId]) {
        for id in ids {
            let Some(node) = self.evaluator.nodes.get(id) else {
                continue;
            };
            for (property, value) in node.properties().iter() {
                match value {
                    PropertyValue::Scalar(_) => {}
                    PropertyValue::Child(child) => {
                        self.evaluator.graph.wire(child.clone(), id.clone(), property, None);
                    }
                    PropertyValue::Children(children) => {
                        for (index, child) in children.iter().enumerate() {
                            self.evaluator.graph.wire(child.clone(), id.clone(), property, Some(index));
                        }
                    }
                }
            }
        }
    }
}
