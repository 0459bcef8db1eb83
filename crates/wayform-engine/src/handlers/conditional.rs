//! `CONDITIONAL`: evaluate `predicate`, invoke `thenValue` if truthy else
//! `elseValue`; an absent `elseValue` yields undefined.

use async_trait::async_trait;
use serde_json::Value;

use wayform_core::{AstNode, NodeId, PropertyValue, ThunkResult};

use crate::context::EvalContext;
use crate::evaluator::Evaluator;
use crate::handler::Handler;
use crate::hooks::RuntimeHooks;

use super::support::{invoke_or_undefined, invoke_value, is_truthy};

#[derive(Debug)]
pub(crate) struct ConditionalHandler {
    predicate: Option<NodeId>,
    then_value: Option<NodeId>,
    else_value: Option<NodeId>,
}

impl ConditionalHandler {
    pub(crate) fn new(node: &AstNode) -> Self {
        let child = |name: &str| match node.properties().get(name) {
            Some(PropertyValue::Child(id)) => Some(id.clone()),
            _ => None,
        };
        Self {
            predicate: child("predicate"),
            then_value: child("thenValue"),
            else_value: child("elseValue"),
        }
    }
}

#[async_trait]
impl Handler for ConditionalHandler {
    async fn evaluate(&self, _id: &NodeId, context: &EvalContext, invoker: &Evaluator, _hooks: &RuntimeHooks<'_>) -> ThunkResult {
        let condition = match &self.predicate {
            Some(id) => match invoke_value(invoker, context, id).await {
                Ok(value) => is_truthy(&value),
                Err(err) => return ThunkResult::Error(err),
            },
            None => false,
        };

        let branch = if condition { &self.then_value } else { &self.else_value };

        let value = match branch {
            Some(id) => invoke_or_undefined(invoker, context, id).await,
            None => Value::Null,
        };
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
    fn missing_else_value_parses_to_none() {
        let node = AstNode::new(NodeId::new_for_test("compile_ast", 0), NodeType::Expression, "CONDITIONAL", PropertyMap::new());
        let handler = ConditionalHandler::new(&node);
        assert!(handler.else_value.is_none());
    }
}
