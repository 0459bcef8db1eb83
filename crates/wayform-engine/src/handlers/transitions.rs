//! ACCESS/ACTION/SUBMIT transition handlers. Each gates on a common `when`
//! predicate, runs its effects when executed, and (for SUBMIT) gates on the
//! step's validations before deciding `onValid`/`onInvalid`.
//!
//! Sub-object transition properties (`onValid.effects`, `onInvalid.next`,
//! ...) are flattened to top-level `onValidEffects`/`onValidNext`/
//! `onInvalidEffects`/`onInvalidNext`/`onAlwaysEffects` properties rather
//! than nested under a plain `onValid`/`onInvalid` object, since a plain
//! object has no `"type"` discriminator and the compiler's generic property
//! parser would store it (and everything nested in it) as an opaque JSON
//! scalar, losing the AST node identities inside.

use async_trait::async_trait;
use serde_json::{Map, Value};

use wayform_core::{AstNode, NodeId, PropertyValue, ThunkResult};

use crate::context::EvalContext;
use crate::evaluator::Evaluator;
use crate::handler::Handler;
use crate::hooks::RuntimeHooks;

use super::support::{invoke_or_undefined, invoke_value, is_truthy, scalar_bool};
use super::validation::validation_passed;

fn child(node: &AstNode, name: &str) -> Option<NodeId> {
    match node.properties().get(name) {
        Some(PropertyValue::Child(id)) => Some(id.clone()),
        _ => None,
    }
}

fn children(node: &AstNode, name: &str) -> Vec<NodeId> {
    match node.properties().get(name) {
        Some(PropertyValue::Child(id)) => vec![id.clone()],
        Some(PropertyValue::Children(ids)) => ids.clone(),
        _ => Vec::new(),
    }
}

async fn when_truthy(when: &Option<NodeId>, context: &EvalContext, invoker: &Evaluator) -> Result<bool, wayform_core::EngineError> {
    match when {
        Some(id) => invoke_value(invoker, context, id).await.map(|value| is_truthy(&value)),
        None => Ok(true),
    }
}

/// Run a list of EFFECT nodes in order. An effect's own evaluation failure
/// is logged and treated as `EVALUATION_FAILED`, but does not abort the
/// remaining effects or the transition (only an `outcome: 'error'` from a
/// `next` expression does that).
async fn run_effects(effects: &[NodeId], context: &EvalContext, invoker: &Evaluator) {
    for effect in effects {
        if let ThunkResult::Error(err) = invoker.invoke(effect, context).await {
            tracing::error!(%effect, error = %err, "transition effect failed");
        }
    }
}

fn continue_outcome() -> Value {
    let mut outcome = Map::new();
    outcome.insert("outcome".to_string(), Value::String("continue".to_string()));
    Value::Object(outcome)
}

async fn resolve_next(next: &Option<NodeId>, context: &EvalContext, invoker: &Evaluator) -> Value {
    match next {
        Some(id) => invoke_or_undefined(invoker, context, id).await,
        None => continue_outcome(),
    }
}

#[derive(Debug)]
pub(crate) struct AccessHandler {
    when: Option<NodeId>,
    effects: Vec<NodeId>,
    next: Option<NodeId>,
}

impl AccessHandler {
    pub(crate) fn new(node: &AstNode) -> Self {
        Self {
            when: child(node, "when"),
            effects: children(node, "effects"),
            next: child(node, "next"),
        }
    }
}

#[async_trait]
impl Handler for AccessHandler {
    async fn evaluate(&self, _id: &NodeId, context: &EvalContext, invoker: &Evaluator, _hooks: &RuntimeHooks<'_>) -> ThunkResult {
        let executed = match when_truthy(&self.when, context, invoker).await {
            Ok(value) => value,
            Err(err) => return ThunkResult::Error(err),
        };

        let mut result = Map::new();
        result.insert("executed".to_string(), Value::Bool(executed));
        if !executed {
            result.insert("outcome".to_string(), Value::String("continue".to_string()));
            return ThunkResult::Value(Value::Object(result));
        }

        run_effects(&self.effects, context, invoker).await;
        let next = resolve_next(&self.next, context, invoker).await;
        if let Value::Object(map) = next {
            result.extend(map);
        }
        ThunkResult::Value(Value::Object(result))
    }

    fn compute_is_async(&self, dependency_is_async: &[bool]) -> bool {
        dependency_is_async.iter().any(|value| *value)
    }
}

#[derive(Debug)]
pub(crate) struct ActionHandler {
    when: Option<NodeId>,
    effects: Vec<NodeId>,
    next: Option<NodeId>,
}

impl ActionHandler {
    pub(crate) fn new(node: &AstNode) -> Self {
        Self {
            when: child(node, "when"),
            effects: children(node, "effects"),
            next: child(node, "next"),
        }
    }
}

#[async_trait]
impl Handler for ActionHandler {
    async fn evaluate(&self, _id: &NodeId, context: &EvalContext, invoker: &Evaluator, _hooks: &RuntimeHooks<'_>) -> ThunkResult {
        let executed = match when_truthy(&self.when, context, invoker).await {
            Ok(value) => value,
            Err(err) => return ThunkResult::Error(err),
        };

        let mut result = Map::new();
        result.insert("executed".to_string(), Value::Bool(executed));
        if !executed {
            return ThunkResult::Value(Value::Object(result));
        }

        run_effects(&self.effects, context, invoker).await;
        let next = resolve_next(&self.next, context, invoker).await;
        if let Value::Object(map) = next {
            result.extend(map);
        }
        ThunkResult::Value(Value::Object(result))
    }

    fn compute_is_async(&self, dependency_is_async: &[bool]) -> bool {
        dependency_is_async.iter().any(|value| *value)
    }
}

#[derive(Debug)]
pub(crate) struct SubmitHandler {
    when: Option<NodeId>,
    validate: bool,
    on_always_effects: Vec<NodeId>,
    on_valid_effects: Vec<NodeId>,
    on_valid_next: Option<NodeId>,
    on_invalid_effects: Vec<NodeId>,
    on_invalid_next: Option<NodeId>,
}

impl SubmitHandler {
    pub(crate) fn new(node: &AstNode) -> Self {
        Self {
            when: child(node, "when"),
            validate: scalar_bool(node.properties(), "validate"),
            on_always_effects: children(node, "onAlwaysEffects"),
            on_valid_effects: children(node, "onValidEffects"),
            on_valid_next: child(node, "onValidNext"),
            on_invalid_effects: children(node, "onInvalidEffects"),
            on_invalid_next: child(node, "onInvalidNext"),
        }
    }

    /// Whether every VALIDATION node wired as this transition's gate (via
    /// `wire_submit_validation_gates`'s `property=validations` edges)
    /// passed. No gating edges at all (the `validate: false` common case)
    /// trivially passes.
    async fn validations_pass(&self, id: &NodeId, context: &EvalContext, invoker: &Evaluator) -> bool {
        let gates: Vec<NodeId> = invoker
            .graph
            .incoming(id)
            .into_iter()
            .filter(|edge| edge.property == "validations")
            .map(|edge| edge.from)
            .collect();

        for gate in gates {
            match invoker.invoke(&gate, context).await {
                ThunkResult::Value(result) if validation_passed(&result) => {}
                _ => return false,
            }
        }
        true
    }
}

#[async_trait]
impl Handler for SubmitHandler {
    async fn evaluate(&self, id: &NodeId, context: &EvalContext, invoker: &Evaluator, _hooks: &RuntimeHooks<'_>) -> ThunkResult {
        let executed = match when_truthy(&self.when, context, invoker).await {
            Ok(value) => value,
            Err(err) => return ThunkResult::Error(err),
        };

        let mut result = Map::new();
        result.insert("executed".to_string(), Value::Bool(executed));
        if !executed {
            result.insert("validated".to_string(), Value::Bool(false));
            result.insert("outcome".to_string(), Value::String("continue".to_string()));
            return ThunkResult::Value(Value::Object(result));
        }

        let passed = if self.validate {
            self.validations_pass(id, context, invoker).await
        } else {
            true
        };
        result.insert("validated".to_string(), Value::Bool(!passed));

        run_effects(&self.on_always_effects, context, invoker).await;

        let (effects, next) = if passed {
            (&self.on_valid_effects, &self.on_valid_next)
        } else {
            (&self.on_invalid_effects, &self.on_invalid_next)
        };
        run_effects(effects, context, invoker).await;

        if !passed {
            result.insert("outcome".to_string(), Value::String("continue".to_string()));
            if let Some(next_id) = next {
                if let Value::Object(map) = resolve_next(&Some(next_id.clone()), context, invoker).await {
                    result.extend(map);
                }
            }
            return ThunkResult::Value(Value::Object(result));
        }

        let outcome = resolve_next(next, context, invoker).await;
        if let Value::Object(map) = outcome {
            result.extend(map);
        }
        ThunkResult::Value(Value::Object(result))
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
    fn missing_when_parses_to_none() {
        let node = AstNode::new(NodeId::new_for_test("compile_ast", 0), NodeType::Transition, "ACCESS", PropertyMap::new());
        let handler = AccessHandler::new(&node);
        assert!(handler.when.is_none());
        assert!(handler.effects.is_empty());
    }
}
