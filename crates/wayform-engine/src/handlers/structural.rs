//! Structural handlers: JOURNEY/STEP/BLOCK produce a shallow
//! `{id, type, variant?, blockType?, properties}` shape with every
//! AST-node-valued property invoked and substituted (undefined on error).
//! FIELD blocks additionally resolve their answer value, run a formatters
//! pipeline (falling back to the raw value on formatter failure), evaluate
//! `validate`, and resolve `hidden`/`dependent`.

use async_trait::async_trait;
use serde_json::{Map, Value};

use wayform_core::{AstNode, NodeId, NodeType, PropertyValue, ReadRegistry, ThunkResult};

use crate::context::EvalContext;
use crate::evaluator::Evaluator;
use crate::handler::Handler;
use crate::hooks::RuntimeHooks;

use super::support::{is_truthy, resolve_answer, resolve_property, scalar_bool, scalar_str};

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

async fn resolve_properties(invoker: &Evaluator, context: &EvalContext, node: &AstNode, skip: &[&str]) -> Map<String, Value> {
    let mut out = Map::new();
    for (name, value) in node.properties().iter() {
        if skip.contains(&name.as_str()) {
            continue;
        }
        out.insert(name.clone(), resolve_property(invoker, context, value).await);
    }
    out
}

#[derive(Debug)]
pub(crate) struct StructuralHandler {
    node_type: NodeType,
    variant: String,
}

impl StructuralHandler {
    pub(crate) fn new(node: &AstNode) -> Self {
        Self {
            node_type: node.node_type(),
            variant: node.variant().to_string(),
        }
    }
}

#[async_trait]
impl Handler for StructuralHandler {
    async fn evaluate(&self, id: &NodeId, context: &EvalContext, invoker: &Evaluator, _hooks: &RuntimeHooks<'_>) -> ThunkResult {
        let Some(node) = invoker.nodes.get(id) else {
            return ThunkResult::Error(wayform_core::EngineError::lookup_failed(format!("{id}: structural node not registered")));
        };
        let properties = resolve_properties(invoker, context, &node, &[]).await;

        let mut shape = Map::new();
        shape.insert("id".to_string(), Value::String(id.to_string()));
        shape.insert("type".to_string(), Value::String(node_type_tag(self.node_type).to_string()));
        if self.node_type == NodeType::Block {
            shape.insert("blockType".to_string(), Value::String(self.variant.clone()));
        }
        shape.insert("variant".to_string(), Value::String(self.variant.clone()));
        shape.insert("properties".to_string(), Value::Object(properties));
        ThunkResult::Value(Value::Object(shape))
    }

    fn compute_is_async(&self, dependency_is_async: &[bool]) -> bool {
        dependency_is_async.iter().any(|value| *value)
    }
}

#[derive(Debug)]
pub(crate) struct FieldHandler {
    code: String,
    variant: String,
    formatters: Option<NodeId>,
    hidden: Option<NodeId>,
    dependent: Option<NodeId>,
}

impl FieldHandler {
    pub(crate) fn new(node: &AstNode) -> Self {
        Self {
            code: scalar_str(node.properties(), "code").unwrap_or_default().to_string(),
            variant: node.variant().to_string(),
            formatters: match node.properties().get("formatters") {
                Some(PropertyValue::Child(id)) => Some(id.clone()),
                _ => None,
            },
            hidden: match node.properties().get("hidden") {
                Some(PropertyValue::Child(id)) => Some(id.clone()),
                _ => None,
            },
            dependent: match node.properties().get("dependent") {
                Some(PropertyValue::Child(id)) => Some(id.clone()),
                _ => None,
            },
        }
    }
}

#[async_trait]
impl Handler for FieldHandler {
    async fn evaluate(&self, id: &NodeId, context: &EvalContext, invoker: &Evaluator, _hooks: &RuntimeHooks<'_>) -> ThunkResult {
        let Some(node) = invoker.nodes.get(id) else {
            return ThunkResult::Error(wayform_core::EngineError::lookup_failed(format!("{id}: field node not registered")));
        };

        let raw_value = resolve_answer(&self.code, context);
        let value = match &self.formatters {
            Some(formatters_id) => match invoker.invoke(formatters_id, context).await {
                ThunkResult::Value(formatted) => formatted,
                ThunkResult::Error(err) => {
                    tracing::debug!(%id, error = %err, "field formatter failed, keeping pre-formatter value");
                    raw_value
                }
            },
            None => raw_value,
        };

        let hidden = match &self.hidden {
            Some(hidden_id) => match invoker.invoke(hidden_id, context).await {
                ThunkResult::Value(value) => is_truthy(&value),
                ThunkResult::Error(_) => false,
            },
            None => scalar_bool(node.properties(), "hidden"),
        };

        let dependent = match &self.dependent {
            Some(dependent_id) => match invoker.invoke(dependent_id, context).await {
                ThunkResult::Value(value) => is_truthy(&value),
                ThunkResult::Error(_) => true,
            },
            None => true,
        };

        let properties = resolve_properties(invoker, context, &node, &["formatters", "hidden", "dependent"]).await;
        let mut properties = properties;
        properties.insert("value".to_string(), value);
        properties.insert("hidden".to_string(), Value::Bool(hidden));
        properties.insert("dependent".to_string(), Value::Bool(dependent));

        let mut shape = Map::new();
        shape.insert("id".to_string(), Value::String(id.to_string()));
        shape.insert("type".to_string(), Value::String("BLOCK".to_string()));
        shape.insert("blockType".to_string(), Value::String("FIELD".to_string()));
        shape.insert("variant".to_string(), Value::String(self.variant.clone()));
        shape.insert("properties".to_string(), Value::Object(properties));
        ThunkResult::Value(Value::Object(shape))
    }

    fn compute_is_async(&self, dependency_is_async: &[bool]) -> bool {
        dependency_is_async.iter().any(|value| *value)
    }
}
