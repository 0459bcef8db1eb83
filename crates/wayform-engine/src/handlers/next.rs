//! `NEXT`: produces the navigation half of a transition's outcome —
//! `{outcome: 'continue'|'redirect', redirect?}` — gated by an optional
//! `when` predicate (absent ⇒ always takes the redirect).

use async_trait::async_trait;
use serde_json::{Map, Value};

use wayform_core::{AstNode, NodeId, PropertyValue, ThunkResult};

use crate::context::EvalContext;
use crate::evaluator::Evaluator;
use crate::handler::Handler;
use crate::hooks::RuntimeHooks;

use super::support::{invoke_or_undefined, invoke_value, is_truthy, scalar_str};

#[derive(Debug)]
pub(crate) struct NextHandler {
    when: Option<NodeId>,
    redirect: Option<NodeId>,
    static_redirect: Option<String>,
    error: bool,
    status: Option<u64>,
    message: Option<String>,
}

impl NextHandler {
    pub(crate) fn new(node: &AstNode) -> Self {
        Self {
            when: match node.properties().get("when") {
                Some(PropertyValue::Child(id)) => Some(id.clone()),
                _ => None,
            },
            redirect: match node.properties().get("redirect") {
                Some(PropertyValue::Child(id)) => Some(id.clone()),
                _ => None,
            },
            static_redirect: scalar_str(node.properties(), "redirect").map(str::to_string),
            error: super::support::scalar_bool(node.properties(), "error"),
            status: node
                .properties()
                .get("status")
                .and_then(PropertyValue::as_scalar)
                .and_then(Value::as_u64),
            message: scalar_str(node.properties(), "message").map(str::to_string),
        }
    }
}

#[async_trait]
impl Handler for NextHandler {
    async fn evaluate(&self, _id: &NodeId, context: &EvalContext, invoker: &Evaluator, _hooks: &RuntimeHooks<'_>) -> ThunkResult {
        let take = match &self.when {
            Some(id) => match invoke_value(invoker, context, id).await {
                Ok(value) => is_truthy(&value),
                Err(err) => return ThunkResult::Error(err),
            },
            None => true,
        };

        let mut outcome = Map::new();
        if !take {
            outcome.insert("outcome".to_string(), Value::String("continue".to_string()));
            return ThunkResult::Value(Value::Object(outcome));
        }

        if self.error {
            outcome.insert("outcome".to_string(), Value::String("error".to_string()));
            outcome.insert("status".to_string(), self.status.map_or(Value::Null, Value::from));
            outcome.insert("message".to_string(), self.message.clone().map_or(Value::Null, Value::String));
            return ThunkResult::Value(Value::Object(outcome));
        }

        let redirect = match &self.redirect {
            Some(id) => invoke_or_undefined(invoker, context, id).await.as_str().map(str::to_string),
            None => self.static_redirect.clone(),
        };

        outcome.insert("outcome".to_string(), Value::String("redirect".to_string()));
        outcome.insert("redirect".to_string(), redirect.map_or(Value::Null, Value::String));
        ThunkResult::Value(Value::Object(outcome))
    }

    fn compute_is_async(&self, dependency_is_async: &[bool]) -> bool {
        dependency_is_async.iter().any(|value| *value)
    }
}
