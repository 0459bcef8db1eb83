//! Compilation pipeline steps 1-4: parse a JSON document into the AST node
//! shape, register parent/property metadata, mark step-descendant flags, and
//! generate pseudo nodes from reference expressions. Handler registration,
//! the `isAsync` pass, and wiring are layered on top by `wayform-engine`,
//! since they require the handler registry that only the engine crate owns.

use serde_json::Value;

use crate::ast::{AstNode, NodeType, PropertyMap, PropertyValue};
use crate::error::{CompileIssue, EngineError};
use crate::ids::{IdAllocator, NodeCategory, NodeId};
use crate::metadata::NodeMetadata;
use crate::registry::{ReadRegistry, Registry, WriteRegistry};

/// The structural/expression/predicate/transition node type names accepted
/// in the `"type"` discriminator field of the input document.
fn parse_node_type(raw: &str) -> Option<NodeType> {
    match raw.to_uppercase().as_str() {
        "JOURNEY" => Some(NodeType::Journey),
        "STEP" => Some(NodeType::Step),
        "BLOCK" => Some(NodeType::Block),
        "EXPRESSION" => Some(NodeType::Expression),
        "PREDICATE" => Some(NodeType::Predicate),
        "TRANSITION" => Some(NodeType::Transition),
        _ => None,
    }
}

/// Which discriminator field, if any, supplies this node type's variant.
fn variant_field_for(node_type: NodeType) -> Option<&'static str> {
    match node_type {
        NodeType::Block => Some("blockType"),
        NodeType::Expression => Some("expressionType"),
        NodeType::Predicate => Some("predicateType"),
        NodeType::Transition => Some("transitionType"),
        NodeType::Journey | NodeType::Step | NodeType::Pseudo => None,
    }
}

fn object_node_type(value: &Value) -> Option<NodeType> {
    let obj = value.as_object()?;
    let raw = obj.get("type")?.as_str()?;
    parse_node_type(raw)
}

/// The outcome of parsing a document: the node/metadata registries and the
/// root journey's identity.
pub struct ParsedProgram {
    /// Every AST node discovered, keyed by its freshly allocated identity.
    pub nodes: Registry<AstNode>,
    /// Metadata (parent attachment, step ancestry) for every node above.
    pub metadata: Registry<NodeMetadata>,
    /// The root JOURNEY node's identity.
    pub root: NodeId,
}

/// Parse a JSON document into an AST. The root value must be a JOURNEY
/// object; anything else is reported as a single global compile issue.
///
/// # Errors
///
/// Returns `EngineError::Compilation` with every problem found (unknown
/// node types, a non-JOURNEY root, malformed node objects).
pub fn parse_document(document: &Value, allocator: &IdAllocator) -> Result<ParsedProgram, EngineError> {
    let nodes: Registry<AstNode> = Registry::new("nodes");
    let metadata: Registry<NodeMetadata> = Registry::new("metadata");
    let mut issues: Vec<CompileIssue> = Vec::new();

    let Some(root_type) = object_node_type(document) else {
        issues.push(CompileIssue::global(
            "root document must be an object with a recognized 'type' field",
        ));
        return Err(EngineError::compilation(issues));
    };

    if root_type != NodeType::Journey {
        issues.push(CompileIssue::global(format!(
            "root document must have type JOURNEY, found {root_type:?}"
        )));
        return Err(EngineError::compilation(issues));
    }

    let root = parse_node(
        document,
        allocator,
        NodeCategory::CompileAst,
        &nodes,
        &metadata,
        None,
        &mut issues,
    )
    .ok_or_else(|| EngineError::compilation(issues.clone()))?;

    if !issues.is_empty() {
        return Err(EngineError::compilation(issues));
    }

    Ok(ParsedProgram { nodes, metadata, root })
}

/// Parse and register a single node (and, transitively, its descendants)
/// into the given registries, allocating identities in `category`. Used
/// directly by runtime-overlay hooks (`createNode`/`registerRuntimeNode`)
/// with `category = NodeCategory::RuntimeAst`, and by `parse_document` with
/// `category = NodeCategory::CompileAst`.
///
/// # Errors
///
/// Returns `EngineError::Compilation` describing every problem found.
pub fn parse_runtime_node<N, M>(
    value: &Value,
    allocator: &IdAllocator,
    category: NodeCategory,
    nodes: &N,
    metadata: &M,
    parent: Option<(NodeId, String, Option<usize>)>,
) -> Result<NodeId, EngineError>
where
    N: WriteRegistry<AstNode>,
    M: WriteRegistry<NodeMetadata>,
{
    let mut issues = Vec::new();
    let id = parse_node(value, allocator, category, nodes, metadata, parent, &mut issues);
    match id {
        Some(id) if issues.is_empty() => Ok(id),
        _ => Err(EngineError::compilation(issues)),
    }
}

#[allow(clippy::too_many_lines)]
fn parse_node<N, M>(
    value: &Value,
    allocator: &IdAllocator,
    category: NodeCategory,
    nodes: &N,
    metadata: &M,
    parent: Option<(NodeId, String, Option<usize>)>,
    issues: &mut Vec<CompileIssue>,
) -> Option<NodeId>
where
    N: WriteRegistry<AstNode>,
    M: WriteRegistry<NodeMetadata>,
{
    let Some(node_type) = object_node_type(value) else {
        issues.push(CompileIssue::global("expected a node object with a recognized 'type' field"));
        return None;
    };
    let obj = value.as_object()?;

    let variant = match variant_field_for(node_type) {
        Some(field) => match obj.get(field).and_then(Value::as_str) {
            Some(v) => v.to_string(),
            None => {
                issues.push(CompileIssue::global(format!(
                    "{node_type:?} node missing required '{field}' field"
                )));
                String::new()
            }
        },
        None => format!("{node_type:?}").to_uppercase(),
    };

    let id = allocator.next(category);

    let mut properties = PropertyMap::new();
    for (key, raw_value) in obj {
        if key == "type" {
            continue;
        }
        let property_value = parse_property(raw_value, &id, key, allocator, category, nodes, metadata, issues);
        properties.insert(key.clone(), property_value);
    }

    let node = AstNode::new(id.clone(), node_type, variant, properties);
    if let Err(err) = nodes.register(id.clone(), node) {
        issues.push(CompileIssue::at(id.clone(), err.to_string()));
        return None;
    }

    let node_metadata = match parent {
        Some((parent_id, property, index)) => NodeMetadata::attached_to(parent_id, property, index),
        None => NodeMetadata::new(),
    };
    if let Err(err) = metadata.register(id.clone(), node_metadata) {
        issues.push(CompileIssue::at(id.clone(), err.to_string()));
    }

    Some(id)
}

fn parse_property<N, M>(
    raw_value: &Value,
    parent_id: &NodeId,
    property_name: &str,
    allocator: &IdAllocator,
    category: NodeCategory,
    nodes: &N,
    metadata: &M,
    issues: &mut Vec<CompileIssue>,
) -> PropertyValue
where
    N: WriteRegistry<AstNode>,
    M: WriteRegistry<NodeMetadata>,
{
    if object_node_type(raw_value).is_some() {
        let child = parse_node(
            raw_value,
            allocator,
            category,
            nodes,
            metadata,
            Some((parent_id.clone(), property_name.to_string(), None)),
            issues,
        );
        return match child {
            Some(child_id) => PropertyValue::Child(child_id),
            None => PropertyValue::Scalar(Value::Null),
        };
    }

    if let Some(array) = raw_value.as_array() {
        let all_nodes = !array.is_empty() && array.iter().all(|element| object_node_type(element).is_some());
        if all_nodes {
            let mut ids = Vec::with_capacity(array.len());
            for (index, element) in array.iter().enumerate() {
                let child = parse_node(
                    element,
                    allocator,
                    category,
                    nodes,
                    metadata,
                    Some((parent_id.clone(), property_name.to_string(), Some(index))),
                    issues,
                );
                if let Some(child_id) = child {
                    ids.push(child_id);
                }
            }
            return PropertyValue::Children(ids);
        }
    }

    PropertyValue::Scalar(raw_value.clone())
}

/// The pseudo node kinds named in the specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PseudoKind {
    /// A POST body field.
    Post,
    /// A query string parameter.
    Query,
    /// A path parameter.
    Params,
    /// A static `data` top-level property.
    Data,
    /// A field's answer, evaluated without crossing a remote boundary.
    AnswerLocal,
    /// A field's answer, evaluated via a remote lookup.
    AnswerRemote,
}

impl PseudoKind {
    #[must_use]
    pub const fn as_variant_str(self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Query => "QUERY",
            Self::Params => "PARAMS",
            Self::Data => "DATA",
            Self::AnswerLocal => "ANSWER_LOCAL",
            Self::AnswerRemote => "ANSWER_REMOTE",
        }
    }

    pub fn from_namespace(namespace: &str, remote: bool) -> Option<Self> {
        match namespace {
            "post" => Some(Self::Post),
            "query" => Some(Self::Query),
            "params" => Some(Self::Params),
            "data" => Some(Self::Data),
            "answers" if remote => Some(Self::AnswerRemote),
            "answers" => Some(Self::AnswerLocal),
            _ => None,
        }
    }
}

/// Scan every REFERENCE expression node for `(namespace, key)` pairs and
/// register one pseudo node per unique pair. Mirrors compilation step 4.
#[must_use]
pub fn generate_pseudo_nodes(nodes: &Registry<AstNode>, allocator: &IdAllocator) -> Registry<AstNode> {
    let pseudo_nodes: Registry<AstNode> = Registry::new("pseudo_nodes");
    let mut seen: std::collections::HashSet<(String, String)> = std::collections::HashSet::new();

    for (_, node) in nodes.find_where(|node: &AstNode| {
        node.node_type() == NodeType::Expression && node.variant() == "REFERENCE"
    }) {
        let Some(PropertyValue::Scalar(Value::String(namespace))) = node.properties().get("namespace") else {
            continue;
        };
        let Some(PropertyValue::Scalar(Value::String(key))) = node.properties().get("key") else {
            continue;
        };
        let remote = matches!(
            node.properties().get("remote"),
            Some(PropertyValue::Scalar(Value::Bool(true)))
        );
        let Some(kind) = PseudoKind::from_namespace(namespace, remote) else {
            continue;
        };
        let dedup_key = (namespace.clone(), key.clone());
        if !seen.insert(dedup_key) {
            continue;
        }

        let mut props = PropertyMap::new();
        props.insert("namespace", PropertyValue::Scalar(Value::String(namespace.clone())));
        props.insert("key", PropertyValue::Scalar(Value::String(key.clone())));
        let pseudo_id = allocator.next(NodeCategory::CompilePseudo);
        let pseudo_node = AstNode::new(pseudo_id.clone(), NodeType::Pseudo, kind.as_variant_str(), props);
        // Unique by construction (fresh id), so registration cannot fail.
        let _ = pseudo_nodes.register(pseudo_id, pseudo_node);
    }

    pseudo_nodes
}

/// Mark every node strictly beneath some STEP as `is_descendant_of_step`,
/// and every node on the ancestor chain leading to a STEP (its containing
/// journeys) as `is_ancestor_of_step`. Mirrors compilation step 3.
pub fn mark_step_descendants(nodes: &Registry<AstNode>, metadata: &Registry<NodeMetadata>, root: &NodeId) {
    mark_from(nodes, metadata, root, &mut Vec::new());
}

fn mark_from(
    nodes: &Registry<AstNode>,
    metadata: &Registry<NodeMetadata>,
    current: &NodeId,
    ancestors: &mut Vec<NodeId>,
) {
    let Some(node) = nodes.get(current) else {
        return;
    };

    if node.node_type() == NodeType::Step {
        for ancestor in ancestors.iter() {
            metadata.update(ancestor, |meta| meta.is_ancestor_of_step = true);
        }
        mark_descendants(nodes, metadata, current);
    }

    ancestors.push(current.clone());
    for (_, value) in node.child_ids() {
        for child in value.child_ids() {
            mark_from(nodes, metadata, &child, ancestors);
        }
    }
    ancestors.pop();
}

fn mark_descendants(nodes: &Registry<AstNode>, metadata: &Registry<NodeMetadata>, current: &NodeId) {
    let Some(node) = nodes.get(current) else {
        return;
    };
    for (_, value) in node.child_ids() {
        for child in value.child_ids() {
            metadata.update(&child, |meta| meta.is_descendant_of_step = true);
            mark_descendants(nodes, metadata, &child);
        }
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
                            "label": "Full name",
                            "formatters": {
                                "type": "EXPRESSION",
                                "expressionType": "REFERENCE",
                                "namespace": "answers",
                                "key": "fullName"
                            }
                        }
                    ]
                }
            ]
        })
    }

    #[test]
    fn parses_nested_tree_and_assigns_unique_ids() {
        let allocator = IdAllocator::new();
        let parsed = parse_document(&sample_document(), &allocator).unwrap();
        assert!(parsed.nodes.size() >= 3);
        let mut ids = parsed.nodes.ids();
        let unique_count = {
            ids.sort();
            ids.dedup();
            ids.len()
        };
        assert_eq!(unique_count, parsed.nodes.size());
    }

    #[test]
    fn step_descendants_and_ancestors_are_marked() {
        let allocator = IdAllocator::new();
        let parsed = parse_document(&sample_document(), &allocator).unwrap();

        let root_meta = parsed.metadata.get(&parsed.root).unwrap();
        assert!(root_meta.is_ancestor_of_step);

        let field_nodes = parsed.nodes.find_where(|n| n.variant() == "text-input");
        assert_eq!(field_nodes.len(), 1);
        let (field_id, _) = &field_nodes[0];
        let field_meta = parsed.metadata.get(field_id).unwrap();
        assert!(field_meta.is_descendant_of_step);
    }

    #[test]
    fn pseudo_nodes_are_deduplicated_by_namespace_and_key() {
        let allocator = IdAllocator::new();
        let parsed = parse_document(&sample_document(), &allocator).unwrap();
        let pseudo = generate_pseudo_nodes(&parsed.nodes, &allocator);
        assert_eq!(pseudo.size(), 1);
    }

    #[test]
    fn non_journey_root_is_rejected() {
        let allocator = IdAllocator::new();
        let bad = json!({"type": "STEP", "path": "/x"});
        let err = parse_document(&bad, &allocator).unwrap_err();
        assert!(matches!(err, EngineError::Compilation(_)));
    }
}
