//! The dependency graph: a directed, multi-edge graph over node identities
//! recording data-flow between nodes. Used for invalidation ordering
//! documentation and for the reverse-topological `isAsync` computation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::ids::NodeId;

/// The single edge kind the specification names. Kept as an enum (rather
/// than a bare string) so future edge kinds are a compile-time decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// `value → containing node`, one edge per AST-node-valued property.
    DataFlow,
}

/// One edge: `from` feeds `to` via `property` (and, for list-valued
/// properties, `index`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    /// The producer node.
    pub from: NodeId,
    /// The consumer node.
    pub to: NodeId,
    /// The edge kind.
    pub kind: EdgeKind,
    /// The consumer property this edge was wired through.
    pub property: String,
    /// Position within the property, if the property is list-valued.
    pub index: Option<usize>,
}

/// A directed multi-edge graph keyed by node identity.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    outgoing: RwLock<HashMap<NodeId, Vec<Edge>>>,
    incoming: RwLock<HashMap<NodeId, Vec<Edge>>>,
}

impl DependencyGraph {
    /// An empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an edge. Duplicate edges (same from/to/property/index) are kept
    /// rather than deduplicated; wirers are expected to call this at most
    /// once per property position, but duplication is harmless for
    /// downstream consumers that only care about reachability.
    pub fn add_edge(&self, edge: Edge) {
        let mut out = self.outgoing.write().unwrap_or_else(|poison| poison.into_inner());
        out.entry(edge.from.clone()).or_default().push(edge.clone());
        drop(out);
        let mut inn = self.incoming.write().unwrap_or_else(|poison| poison.into_inner());
        inn.entry(edge.to.clone()).or_default().push(edge);
    }

    /// Convenience for `add_edge` with the (currently only) `DataFlow` kind.
    pub fn wire(&self, from: NodeId, to: NodeId, property: impl Into<String>, index: Option<usize>) {
        self.add_edge(Edge {
            from,
            to,
            kind: EdgeKind::DataFlow,
            property: property.into(),
            index,
        });
    }

    /// Edges whose `from` is `id`.
    #[must_use]
    pub fn outgoing(&self, id: &NodeId) -> Vec<Edge> {
        let out = self.outgoing.read().unwrap_or_else(|poison| poison.into_inner());
        out.get(id).cloned().unwrap_or_default()
    }

    /// Edges whose `to` is `id` — i.e. this node's direct dependencies.
    #[must_use]
    pub fn incoming(&self, id: &NodeId) -> Vec<Edge> {
        let inn = self.incoming.read().unwrap_or_else(|poison| poison.into_inner());
        inn.get(id).cloned().unwrap_or_default()
    }

    /// This node's direct dependency ids (deduplicated), i.e. the `from`
    /// side of every incoming edge.
    #[must_use]
    pub fn dependencies(&self, id: &NodeId) -> Vec<NodeId> {
        let mut deps: Vec<NodeId> = self.incoming(id).into_iter().map(|edge| edge.from).collect();
        deps.sort();
        deps.dedup();
        deps
    }

    /// All node ids that appear as either endpoint of some edge.
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        let out = self.outgoing.read().unwrap_or_else(|poison| poison.into_inner());
        let inn = self.incoming.read().unwrap_or_else(|poison| poison.into_inner());
        let mut ids: Vec<NodeId> = out.keys().cloned().chain(inn.keys().cloned()).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// A reverse-topological ordering (dependencies before dependents) over
    /// every node id reachable from `roots` through `incoming` edges. Used
    /// by the `isAsync` computation pass. Cycles (which should not occur in
    /// a well-formed program, but defensively guarded against here) are
    /// broken by visiting each node at most once.
    #[must_use]
    pub fn reverse_topological_from(&self, roots: &[NodeId]) -> Vec<NodeId> {
        let mut visited: std::collections::HashSet<NodeId> = std::collections::HashSet::new();
        let mut order = Vec::new();
        let mut stack: Vec<NodeId> = roots.to_vec();

        while let Some(id) = stack.pop() {
            if visited.contains(&id) {
                continue;
            }
            visited.insert(id.clone());
            let deps = self.dependencies(&id);
            let mut pending_deps = false;
            for dep in &deps {
                if !visited.contains(dep) {
                    pending_deps = true;
                }
            }
            if pending_deps {
                stack.push(id.clone());
                for dep in deps {
                    if !visited.contains(&dep) {
                        stack.push(dep);
                    }
                }
                visited.remove(&id);
                continue;
            }
            order.push(id);
        }

        order
    }
}

/// Overlays a read-only, request-shared `main` graph with a fresh `pending`
/// graph that a request's runtime wiring appends to. Mirrors `OverlayRegistry`:
/// queries merge both layers, writes only ever land in `pending`, and the
/// main graph is never mutated by a request (`wireNodes` only appends).
#[derive(Debug)]
pub struct OverlayGraph {
    main: Arc<DependencyGraph>,
    pending: DependencyGraph,
}

impl OverlayGraph {
    /// Wrap a shared compiled graph with a fresh, empty pending layer.
    #[must_use]
    pub fn new(main: Arc<DependencyGraph>) -> Self {
        Self {
            main,
            pending: DependencyGraph::new(),
        }
    }

    /// Append an edge to the pending layer. Never touches `main`.
    pub fn wire(&self, from: NodeId, to: NodeId, property: impl Into<String>, index: Option<usize>) {
        self.pending.wire(from, to, property, index);
    }

    /// Direct dependency ids from both layers, deduplicated.
    #[must_use]
    pub fn dependencies(&self, id: &NodeId) -> Vec<NodeId> {
        let mut deps = self.main.dependencies(id);
        deps.extend(self.pending.dependencies(id));
        deps.sort();
        deps.dedup();
        deps
    }

    /// Edges whose `to` is `id`, from both layers.
    #[must_use]
    pub fn incoming(&self, id: &NodeId) -> Vec<Edge> {
        let mut edges = self.main.incoming(id);
        edges.extend(self.pending.incoming(id));
        edges
    }

    /// Edges whose `from` is `id`, from both layers.
    #[must_use]
    pub fn outgoing(&self, id: &NodeId) -> Vec<Edge> {
        let mut edges = self.main.outgoing(id);
        edges.extend(self.pending.outgoing(id));
        edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::NodeCategory;

    fn id(n: u64) -> NodeId {
        NodeId::new(NodeCategory::CompileAst, n)
    }

    #[test]
    fn dependencies_come_from_incoming_edges() {
        let graph = DependencyGraph::new();
        graph.wire(id(1), id(2), "value", None);
        graph.wire(id(3), id(2), "predicate", None);

        let mut deps = graph.dependencies(&id(2));
        deps.sort();
        assert_eq!(deps, vec![id(1), id(3)]);
    }

    #[test]
    fn reverse_topological_visits_dependencies_first() {
        let graph = DependencyGraph::new();
        // 1 -> 2 -> 3 (2 depends on 1, 3 depends on 2)
        graph.wire(id(1), id(2), "value", None);
        graph.wire(id(2), id(3), "value", None);

        let order = graph.reverse_topological_from(&[id(3)]);
        let pos1 = order.iter().position(|n| *n == id(1)).unwrap();
        let pos2 = order.iter().position(|n| *n == id(2)).unwrap();
        let pos3 = order.iter().position(|n| *n == id(3)).unwrap();
        assert!(pos1 < pos2);
        assert!(pos2 < pos3);
    }

    #[test]
    fn overlay_graph_merges_both_layers_without_mutating_main() {
        let main = Arc::new(DependencyGraph::new());
        main.wire(id(1), id(2), "value", None);

        let overlay = OverlayGraph::new(Arc::clone(&main));
        overlay.wire(id(3), id(2), "predicate", None);

        let mut deps = overlay.dependencies(&id(2));
        deps.sort();
        assert_eq!(deps, vec![id(1), id(3)]);
        assert_eq!(main.dependencies(&id(2)), vec![id(1)]);
    }
}
