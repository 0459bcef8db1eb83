//! `ITERATE`: MAP/FILTER/FIND over an input container. The per-item
//! `template`/`predicate` is a single compile-time subtree shared by every
//! element, so each iteration reifies it back to JSON and asks
//! `RuntimeHooks::create_node` for a fresh runtime copy — giving each
//! element's invocation its own node identities rather than colliding on the
//! cache entry of one shared template node.

use async_trait::async_trait;
use serde_json::{Map, Value};

use wayform_core::{AstNode, NodeId, NodeType, PropertyValue, ReadRegistry, ThunkResult};

use crate::context::EvalContext;
use crate::evaluator::Evaluator;
use crate::handler::Handler;
use crate::hooks::RuntimeHooks;
use crate::scope::ScopeFrame;

use super::support::{invoke_value, is_truthy, scalar_str};

fn node_type_tag(node_type: NodeType) -> &'static str {
    match node_type {
        NodeType::Journey => "JOURNEY",
        NodeType::Step => "STEP",
        NodeType::Block => "BLOCK",
        NodeType::Expression => "EXPRESSION",
        NodeType::Predicate => "PREDICATE",
        NodeType::Transition => "TRANSITION",
        NodeType::Pseudo => "PSEUDO",
    }
}

/// Walk a compiled subtree back into the JSON document shape it was parsed
/// from, so it can be reparsed under fresh runtime identities.
fn reify(invoker: &Evaluator, id: &NodeId) -> Value {
    let Some(node) = invoker.nodes.get(id) else {
        return Value::Null;
    };
    let mut object = Map::new();
    object.insert("type".to_string(), Value::String(node_type_tag(node.node_type()).to_string()));
    for (property, value) in node.properties().iter() {
        let reified = match value {
            PropertyValue::Scalar(value) => value.clone(),
            PropertyValue::Child(child) => reify(invoker, child),
            PropertyValue::Children(children) => Value::Array(children.iter().map(|child| reify(invoker, child)).collect()),
        };
        object.insert(property.clone(), reified);
    }
    Value::Object(object)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IterateKind {
    Map,
    Filter,
    Find,
}

fn parse_kind(node: &AstNode) -> IterateKind {
    match scalar_str(node.properties(), "iterateKind") {
        Some("FILTER") => IterateKind::Filter,
        Some("FIND") => IterateKind::Find,
        _ => IterateKind::Map,
    }
}

#[derive(Debug)]
pub(crate) struct IterateHandler {
    kind: IterateKind,
    input: Option<NodeId>,
    template: Option<NodeId>,
}

impl IterateHandler {
    pub(crate) fn new(node: &AstNode) -> Self {
        Self {
            kind: parse_kind(node),
            input: match node.properties().get("input") {
                Some(PropertyValue::Child(id)) => Some(id.clone()),
                _ => None,
            },
            template: match node.properties().get("template") {
                Some(PropertyValue::Child(id)) => Some(id.clone()),
                _ => None,
            },
        }
    }

    async fn invoke_element(&self, id: &NodeId, context: &EvalContext, invoker: &Evaluator, hooks: &RuntimeHooks<'_>, item: &Value, index: usize, key: Option<&str>) -> Result<Value, wayform_core::EngineError> {
        let Some(template) = &self.template else {
            return Ok(Value::Null);
        };
        let document = reify(invoker, template);
        let runtime_id = hooks.create_node(&document, "template")?;

        let index = i64::try_from(index).unwrap_or(i64::MAX);
        let frame = ScopeFrame::iterator(item.clone(), Some(index), key.map(str::to_string));
        context.push_scope(frame);
        let result = invoke_value(invoker, context, &runtime_id).await;
        context.pop_scope();
        let _ = id;
        result
    }
}

fn entries(container: &Value) -> Vec<(Value, Option<String>)> {
    match container {
        Value::Array(items) => items.iter().cloned().map(|item| (item, None)).collect(),
        Value::Object(map) => map.iter().map(|(key, value)| (value.clone(), Some(key.clone()))).collect(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl Handler for IterateHandler {
    async fn evaluate(&self, id: &NodeId, context: &EvalContext, invoker: &Evaluator, hooks: &RuntimeHooks<'_>) -> ThunkResult {
        let container = match &self.input {
            Some(input_id) => match invoke_value(invoker, context, input_id).await {
                Ok(value) => value,
                Err(err) => return ThunkResult::Error(err),
            },
            None => Value::Null,
        };

        let items = entries(&container);

        match self.kind {
            IterateKind::Map if matches!(container, Value::Object(_)) => {
                let mut out = Map::with_capacity(items.len());
                for (index, (item, key)) in items.into_iter().enumerate() {
                    let key = key.unwrap_or_default();
                    match self.invoke_element(id, context, invoker, hooks, &item, index, Some(key.as_str())).await {
                        Ok(value) => {
                            out.insert(key, value);
                        }
                        Err(err) => return ThunkResult::Error(err),
                    }
                }
                ThunkResult::Value(Value::Object(out))
            }
            IterateKind::Map => {
                let mut out = Vec::with_capacity(items.len());
                for (index, (item, key)) in items.into_iter().enumerate() {
                    match self.invoke_element(id, context, invoker, hooks, &item, index, key.as_deref()).await {
                        Ok(value) => out.push(value),
                        Err(err) => return ThunkResult::Error(err),
                    }
                }
                ThunkResult::Value(Value::Array(out))
            }
            IterateKind::Filter => {
                let mut out = Vec::with_capacity(items.len());
                for (index, (item, key)) in items.into_iter().enumerate() {
                    match self.invoke_element(id, context, invoker, hooks, &item, index, key.as_deref()).await {
                        Ok(predicate_value) => {
                            if is_truthy(&predicate_value) {
                                out.push(item);
                            }
                        }
                        Err(err) => return ThunkResult::Error(err),
                    }
                }
                ThunkResult::Value(Value::Array(out))
            }
            IterateKind::Find => {
                for (index, (item, key)) in items.into_iter().enumerate() {
                    match self.invoke_element(id, context, invoker, hooks, &item, index, key.as_deref()).await {
                        Ok(predicate_value) => {
                            if is_truthy(&predicate_value) {
                                return ThunkResult::Value(item);
                            }
                        }
                        Err(err) => return ThunkResult::Error(err),
                    }
                }
                ThunkResult::Value(Value::Null)
            }
        }
    }

    fn compute_is_async(&self, dependency_is_async: &[bool]) -> bool {
        dependency_is_async.iter().any(|value| *value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_entries_preserve_key_order() {
        let container = serde_json::json!({"a": 1, "b": 2});
        let pairs = entries(&container);
        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn array_entries_have_no_key() {
        let container = serde_json::json!([1, 2, 3]);
        let pairs = entries(&container);
        assert!(pairs.iter().all(|(_, key)| key.is_none()));
    }
}
