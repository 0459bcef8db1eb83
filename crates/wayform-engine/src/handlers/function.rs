//! `FUNCTION` expressions (CONDITION/TRANSFORMER/EFFECT): dispatch by name
//! to the function registry. Arguments are evaluated in order; EFFECT
//! functions additionally receive an `EffectContext` giving them
//! `setAnswer`/`setData`/`getPost`/`getQuery`/`getParams` and invalidate the
//! corresponding pseudo node's cache entry when they mutate.

use async_trait::async_trait;
use serde_json::Value;

use wayform_core::{AstNode, NodeId, PropertyValue, ThunkResult};

use crate::context::EvalContext;
use crate::evaluator::Evaluator;
use crate::handler::Handler;
use crate::hooks::RuntimeHooks;

use super::support::{invoke_value, scalar_str};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Condition,
    Transformer,
    Effect,
}

fn parse_kind(node: &AstNode) -> FunctionKind {
    match scalar_str(node.properties(), "functionKind") {
        Some("EFFECT") => FunctionKind::Effect,
        Some("TRANSFORMER") => FunctionKind::Transformer,
        _ => FunctionKind::Condition,
    }
}

fn argument_ids(node: &AstNode) -> Vec<NodeId> {
    match node.properties().get("arguments") {
        Some(PropertyValue::Child(id)) => vec![id.clone()],
        Some(PropertyValue::Children(ids)) => ids.clone(),
        _ => Vec::new(),
    }
}

#[derive(Debug)]
pub(crate) struct FunctionHandler {
    kind: FunctionKind,
    name: String,
    arguments: Vec<NodeId>,
}

impl FunctionHandler {
    pub(crate) fn new(node: &AstNode) -> Self {
        Self {
            kind: parse_kind(node),
            name: scalar_str(node.properties(), "name").unwrap_or_default().to_string(),
            arguments: argument_ids(node),
        }
    }

    async fn evaluated_arguments(&self, context: &EvalContext, invoker: &Evaluator) -> Result<Vec<Value>, wayform_core::EngineError> {
        let mut args = Vec::with_capacity(self.arguments.len());
        for argument in &self.arguments {
            args.push(invoke_value(invoker, context, argument).await?);
        }
        Ok(args)
    }

    /// `setAnswer`/`setData` invalidate the matching pseudo node (a versioned
    /// delete) so a subsequent `invoke` of any REFERENCE into that key sees
    /// the freshly written value rather than a stale cache hit.
    fn invalidate_answer(invoker: &Evaluator, code: &str) {
        if let Some(pseudo) = invoker.pseudo_for("answers", code) {
            invoker.cache.delete(&pseudo);
        }
    }

    fn invalidate_data(invoker: &Evaluator, key: &str) {
        if let Some(pseudo) = invoker.pseudo_for("data", key) {
            invoker.cache.delete(&pseudo);
        }
    }

    fn run_effect(&self, args: &[Value], context: &EvalContext, invoker: &Evaluator) -> Result<Value, wayform_core::EngineError> {
        match self.name.as_str() {
            "setAnswer" => {
                let code = args.first().and_then(Value::as_str).unwrap_or_default().to_string();
                let value = args.get(1).cloned().unwrap_or(Value::Null);
                context.global().set_answer(code.clone(), value);
                Self::invalidate_answer(invoker, &code);
                Ok(Value::Bool(true))
            }
            "setData" => {
                let key = args.first().and_then(Value::as_str).unwrap_or_default().to_string();
                let value = args.get(1).cloned().unwrap_or(Value::Null);
                context.global().set_data(key.clone(), value);
                Self::invalidate_data(invoker, &key);
                Ok(Value::Bool(true))
            }
            "getPost" => {
                let key = args.first().and_then(Value::as_str).unwrap_or_default();
                Ok(context.request().post.get(key).map_or(Value::Null, |value| value.to_json()))
            }
            "getQuery" => {
                let key = args.first().and_then(Value::as_str).unwrap_or_default();
                Ok(context.request().query.get(key).map_or(Value::Null, |value| value.to_json()))
            }
            "getParams" => {
                let key = args.first().and_then(Value::as_str).unwrap_or_default();
                Ok(context.request().params.get(key).map_or(Value::Null, |value| value.to_json()))
            }
            other => {
                tracing::trace!(function = other, "dispatching unnamed effect to the function registry");
                invoker.functions().call(other, args)
            }
        }
    }
}

#[async_trait]
impl Handler for FunctionHandler {
    async fn evaluate(&self, id: &NodeId, context: &EvalContext, invoker: &Evaluator, _hooks: &RuntimeHooks<'_>) -> ThunkResult {
        let args = match self.evaluated_arguments(context, invoker).await {
            Ok(args) => args,
            Err(err) => return ThunkResult::Error(err),
        };

        let outcome = match self.kind {
            FunctionKind::Effect => self.run_effect(&args, context, invoker),
            FunctionKind::Condition | FunctionKind::Transformer => invoker.functions().call(&self.name, &args),
        };

        match outcome {
            Ok(value) => ThunkResult::Value(value),
            Err(err) => {
                tracing::warn!(%id, function = %self.name, error = %err, "function invocation failed");
                ThunkResult::Error(err)
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
    use wayform_core::{NodeType, PropertyMap};

    #[test]
    fn defaults_to_condition_kind() {
        let node = AstNode::new(NodeId::new_for_test("compile_ast", 0), NodeType::Expression, "FUNCTION", PropertyMap::new());
        assert_eq!(parse_kind(&node), FunctionKind::Condition);
    }

    #[test]
    fn reads_effect_kind() {
        let mut props = PropertyMap::new();
        props.insert("functionKind", PropertyValue::Scalar(Value::String("EFFECT".to_string())));
        let node = AstNode::new(NodeId::new_for_test("compile_ast", 0), NodeType::Expression, "FUNCTION", props);
        assert_eq!(parse_kind(&node), FunctionKind::Effect);
    }
}
