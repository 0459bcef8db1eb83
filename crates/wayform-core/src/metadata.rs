//! Per-node metadata tracked alongside the AST: parent attachment, step
//! ancestry flags, and the `isAsync` flag computed during compilation.

use crate::ids::NodeId;

/// Attributes recorded for a single node during compilation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeMetadata {
    /// The node that owns the property this node is attached under.
    pub attached_to_parent_node: Option<NodeId>,
    /// The property name on the parent this node is attached under.
    pub attached_to_parent_property: Option<String>,
    /// Index within the property, when the property holds an ordered list
    /// of child nodes (e.g. a step's `blocks`).
    pub attached_to_parent_index: Option<usize>,
    /// True for every node strictly beneath some STEP in the tree.
    pub is_descendant_of_step: bool,
    /// True for every node on the ancestor chain of some STEP (including
    /// the journeys containing it), used by the lifecycle controller's
    /// ancestor walk.
    pub is_ancestor_of_step: bool,
    /// True for the STEP currently being rendered in a given request; set
    /// per request, not at compile time, so it defaults to false here.
    pub is_current_step: bool,
    /// Whether this node's handler (transitively) performs asynchronous
    /// work, computed by the reverse-topological pass in §4.1 step 6.
    pub is_async: bool,
}

impl NodeMetadata {
    /// A fresh, all-default metadata record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the metadata recording this node's attachment point.
    #[must_use]
    pub fn attached_to(parent: NodeId, property: impl Into<String>, index: Option<usize>) -> Self {
        Self {
            attached_to_parent_node: Some(parent),
            attached_to_parent_property: Some(property.into()),
            attached_to_parent_index: index,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::NodeCategory;

    #[test]
    fn attached_to_records_parent_and_property() {
        let parent = NodeId::new(NodeCategory::CompileAst, 1);
        let metadata = NodeMetadata::attached_to(parent.clone(), "blocks", Some(2));
        assert_eq!(metadata.attached_to_parent_node, Some(parent));
        assert_eq!(metadata.attached_to_parent_property.as_deref(), Some("blocks"));
        assert_eq!(metadata.attached_to_parent_index, Some(2));
        assert!(!metadata.is_descendant_of_step);
    }
}
