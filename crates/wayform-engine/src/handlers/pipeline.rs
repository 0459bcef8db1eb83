//! `PIPELINE`: evaluate `input`, then fold each transformer function node in
//! order, pushing a `@type='pipeline'` scope frame carrying `@value` so a
//! transformer's arguments may reference the running value.

use async_trait::async_trait;
use serde_json::Value;

use wayform_core::{AstNode, NodeId, PropertyValue, ThunkResult};

use crate::context::EvalContext;
use crate::evaluator::Evaluator;
use crate::handler::Handler;
use crate::hooks::RuntimeHooks;
use crate::scope::ScopeFrame;

use super::support::invoke_value;

#[derive(Debug)]
pub(crate) struct PipelineHandler {
    input: Option<NodeId>,
    transformers: Vec<NodeId>,
}

impl PipelineHandler {
    pub(crate) fn new(node: &AstNode) -> Self {
        Self {
            input: match node.properties().get("input") {
                Some(PropertyValue::Child(id)) => Some(id.clone()),
                _ => None,
            },
            transformers: match node.properties().get("transformers") {
                Some(PropertyValue::Child(id)) => vec![id.clone()],
                Some(PropertyValue::Children(ids)) => ids.clone(),
                _ => Vec::new(),
            },
        }
    }
}

#[async_trait]
impl Handler for PipelineHandler {
    async fn evaluate(&self, _id: &NodeId, context: &EvalContext, invoker: &Evaluator, _hooks: &RuntimeHooks<'_>) -> ThunkResult {
        let mut value = match &self.input {
            Some(id) => match invoke_value(invoker, context, id).await {
                Ok(value) => value,
                Err(err) => return ThunkResult::Error(err),
            },
            None => Value::Null,
        };

        for transformer in &self.transformers {
            context.push_scope(ScopeFrame::pipeline(value.clone()));
            let outcome = invoke_value(invoker, context, transformer).await;
            context.pop_scope();
            match outcome {
                Ok(next) => value = next,
                Err(err) => return ThunkResult::Error(err),
            }
        }

        ThunkResult::Value(value)
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
    fn no_transformers_parses_to_empty_vec() {
        let mut props = PropertyMap::new();
        props.insert("input", PropertyValue::Scalar(Value::String("x".to_string())));
        let node = AstNode::new(NodeId::new_for_test("compile_ast", 0), NodeType::Expression, "PIPELINE", props);
        let handler = PipelineHandler::new(&node);
        assert!(handler.transformers.is_empty());
    }
}
