//! The AST node shape described in the specification: a tagged sum for node
//! kind plus a heterogeneous property map, since the compiled form's shape is
//! driven entirely by the input document rather than by a fixed Rust type per
//! node variant.

use crate::ids::NodeId;

/// The six structural/expression/predicate/transition node types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeType {
    /// A journey: the outermost container, optionally nested (`children`).
    Journey,
    /// A step within a journey.
    Step,
    /// A block within a step (BASIC, FIELD, or COLLECTION).
    Block,
    /// A value-producing expression (REFERENCE, PIPELINE, FORMAT, ...).
    Expression,
    /// A boolean-producing predicate (TEST, AND, OR, XOR, NOT).
    Predicate,
    /// An ACCESS/ACTION/SUBMIT transition.
    Transition,
    /// A compile- or runtime-generated pseudo node (POST/QUERY/PARAMS/DATA/
    /// ANSWER_LOCAL/ANSWER_REMOTE). Never present in the input document;
    /// synthesized during compilation or by iterator expansion.
    Pseudo,
}

/// The specific variant within a `NodeType`, e.g. `"REFERENCE"` for an
/// Expression node or `"AND"` for a Predicate node. Kept as a plain string
/// (rather than a closed enum) because the handler registry, not the AST
/// layer, owns the set of known variants, and new variants should not
/// require touching this module.
pub type NodeVariant = String;

/// One property value on an AST node. Distinguishes plain data (which needs
/// no further evaluation) from references to child AST nodes (which are
/// looked up in the owning `NodeRegistry` and must be invoked to resolve).
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// A JSON scalar, plain object, or plain array containing no AST nodes.
    Scalar(serde_json::Value),
    /// A single child AST node.
    Child(NodeId),
    /// An ordered list whose elements are each a child AST node (e.g. a
    /// step's `blocks`, or a pipeline's transformer arguments).
    Children(Vec<NodeId>),
}

impl PropertyValue {
    /// The scalar value, if this property holds no child nodes.
    #[must_use]
    pub const fn as_scalar(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Scalar(value) => Some(value),
            Self::Child(_) | Self::Children(_) => None,
        }
    }

    /// The single child id, if this property holds exactly one child node.
    #[must_use]
    pub const fn as_child(&self) -> Option<&NodeId> {
        match self {
            Self::Child(id) => Some(id),
            Self::Scalar(_) | Self::Children(_) => None,
        }
    }

    /// The child ids this property value directly references, in order.
    #[must_use]
    pub fn child_ids(&self) -> Vec<NodeId> {
        match self {
            Self::Scalar(_) => Vec::new(),
            Self::Child(id) => vec![id.clone()],
            Self::Children(ids) => ids.clone(),
        }
    }
}

/// An ordered property map. Order is preserved because evaluation order
/// (e.g. a step's `blocks` rendering in declaration order) is an observable
/// invariant, not an implementation detail.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyMap {
    entries: Vec<(String, PropertyValue)>,
}

impl PropertyMap {
    /// An empty property map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a property, preserving the original insertion
    /// position on replace.
    pub fn insert(&mut self, name: impl Into<String>, value: PropertyValue) {
        let name = name.into();
        if let Some(slot) = self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            slot.1 = value;
        } else {
            self.entries.push((name, value));
        }
    }

    /// Look up a property by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value)
    }

    /// Whether a property with this name is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterate properties in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Number of properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no properties.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A single compiled AST node: identity, kind, variant, and its property map.
#[derive(Debug, Clone, PartialEq)]
pub struct AstNode {
    id: NodeId,
    node_type: NodeType,
    variant: NodeVariant,
    properties: PropertyMap,
}

impl AstNode {
    /// Construct a node. Callers are expected to come from the compiler's
    /// parse step, which is the only place identities are minted for
    /// compile-time nodes (runtime nodes go through `NodeFactory` instead).
    #[must_use]
    pub fn new(id: NodeId, node_type: NodeType, variant: impl Into<String>, properties: PropertyMap) -> Self {
        Self {
            id,
            node_type,
            variant: variant.into(),
            properties,
        }
    }

    /// This node's identity.
    #[must_use]
    pub const fn id(&self) -> &NodeId {
        &self.id
    }

    /// The node's structural type.
    #[must_use]
    pub const fn node_type(&self) -> NodeType {
        self.node_type
    }

    /// The node's kind-specific variant, e.g. `"REFERENCE"`, `"AND"`, `"MAP"`.
    #[must_use]
    pub fn variant(&self) -> &str {
        &self.variant
    }

    /// This node's property map.
    #[must_use]
    pub const fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    /// All child node ids referenced anywhere in this node's properties, in
    /// declaration order. Used by metadata registration and wiring.
    #[must_use]
    pub fn child_ids(&self) -> Vec<(String, PropertyValue)> {
        self.properties
            .iter()
            .filter(|(_, value)| !matches!(value, PropertyValue::Scalar(_)))
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_map_preserves_insertion_order() {
        let mut props = PropertyMap::new();
        props.insert("first", PropertyValue::Scalar(serde_json::json!(1)));
        props.insert("second", PropertyValue::Scalar(serde_json::json!(2)));
        props.insert("first", PropertyValue::Scalar(serde_json::json!(3)));

        let names: Vec<&str> = props.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(props.get("first"), Some(&PropertyValue::Scalar(serde_json::json!(3))));
    }

    #[test]
    fn child_ids_ignore_scalars() {
        let id = NodeId::new_for_test("compile_ast", 7);
        let mut props = PropertyMap::new();
        props.insert("label", PropertyValue::Scalar(serde_json::json!("hi")));
        props.insert("value", PropertyValue::Child(id.clone()));
        let node = AstNode::new(
            NodeId::new_for_test("compile_ast", 0),
            NodeType::Block,
            "FIELD",
            props,
        );
        let children = node.child_ids();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].0, "value");
    }
}
