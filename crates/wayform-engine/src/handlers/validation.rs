//! `VALIDATION`: invokes `subject`, calls the named condition `function`
//! against it, and reports `{passed, message, details?}`. Used both
//! directly (a FIELD block's `validate` array) and transitively as a SUBMIT
//! gate (wired by `wayform_core::wiring::wire_submit_validation_gates`).

use async_trait::async_trait;
use serde_json::{Map, Value};

use wayform_core::{AstNode, NodeId, PropertyValue, ThunkResult};

use crate::context::EvalContext;
use crate::evaluator::Evaluator;
use crate::handler::Handler;
use crate::hooks::RuntimeHooks;

use super::support::{invoke_or_undefined, invoke_value, is_truthy, scalar_str};

/// Read a `{passed, message, details?}` result's `passed` flag back out.
/// Used by SUBMIT to decide whether a gating validation failed.
#[must_use]
pub(crate) fn validation_passed(result: &Value) -> bool {
    result.get("passed").is_some_and(is_truthy)
}

#[derive(Debug)]
pub(crate) struct ValidationHandler {
    subject: Option<NodeId>,
    function: String,
    arguments: Vec<NodeId>,
    message: Option<NodeId>,
    static_message: Option<String>,
}

impl ValidationHandler {
    pub(crate) fn new(node: &AstNode) -> Self {
        Self {
            subject: match node.properties().get("subject") {
                Some(PropertyValue::Child(id)) => Some(id.clone()),
                _ => None,
            },
            function: scalar_str(node.properties(), "function").unwrap_or_default().to_string(),
            arguments: match node.properties().get("arguments") {
                Some(PropertyValue::Child(id)) => vec![id.clone()],
                Some(PropertyValue::Children(ids)) => ids.clone(),
                _ => Vec::new(),
            },
            message: match node.properties().get("message") {
                Some(PropertyValue::Child(id)) => Some(id.clone()),
                _ => None,
            },
            static_message: scalar_str(node.properties(), "message").map(str::to_string),
        }
    }
}

#[async_trait]
impl Handler for ValidationHandler {
    async fn evaluate(&self, id: &NodeId, context: &EvalContext, invoker: &Evaluator, _hooks: &RuntimeHooks<'_>) -> ThunkResult {
        let subject = match &self.subject {
            Some(subject_id) => match invoke_value(invoker, context, subject_id).await {
                Ok(value) => value,
                Err(err) => return ThunkResult::Error(err),
            },
            None => Value::Null,
        };

        let mut args = Vec::with_capacity(self.arguments.len() + 1);
        args.push(subject);
        for argument in &self.arguments {
            match invoke_value(invoker, context, argument).await {
                Ok(value) => args.push(value),
                Err(err) => return ThunkResult::Error(err),
            }
        }

        let passed = match invoker.functions().call(&self.function, &args) {
            Ok(value) => is_truthy(&value),
            Err(err) => {
                tracing::warn!(%id, function = %self.function, error = %err, "validation function failed");
                return ThunkResult::Error(err);
            }
        };

        let message = match &self.message {
            Some(message_id) => invoke_or_undefined(invoker, context, message_id).await.as_str().map(str::to_string),
            None => self.static_message.clone(),
        };

        let mut result = Map::new();
        result.insert("passed".to_string(), Value::Bool(passed));
        result.insert("message".to_string(), message.map_or(Value::Null, Value::String));
        ThunkResult::Value(Value::Object(result))
    }

    fn compute_is_async(&self, dependency_is_async: &[bool]) -> bool {
        dependency_is_async.iter().any(|value| *value)
    }
}
