//! Handlers for the six pseudo node kinds: POST/QUERY/PARAMS read straight
//! off the request, DATA reads the global data overlay, and ANSWER_LOCAL/
//! ANSWER_REMOTE resolve (and memoize into `global.answers`) a field's
//! current value. These are the pure-sync leaves the `isAsync` pass seeds
//! from, except ANSWER_REMOTE, which is unconditionally async.

use async_trait::async_trait;
use serde_json::Value;

use wayform_core::{NodeId, ThunkResult};

use crate::context::EvalContext;
use crate::evaluator::Evaluator;
use crate::handler::Handler;
use crate::hooks::RuntimeHooks;

use super::support::resolve_answer;

/// The field-code/param-name key a pseudo node is keyed by.
fn pseudo_key(node: &wayform_core::AstNode) -> String {
    super::support::scalar_str(node.properties(), "key").unwrap_or_default().to_string()
}

#[derive(Debug)]
pub(crate) struct PostHandler {
    key: String,
}

impl PostHandler {
    pub(crate) fn new(node: &wayform_core::AstNode) -> Self {
        Self { key: pseudo_key(node) }
    }
}

#[async_trait]
impl Handler for PostHandler {
    async fn evaluate(&self, id: &NodeId, context: &EvalContext, invoker: &Evaluator, _hooks: &RuntimeHooks<'_>) -> ThunkResult {
        self.evaluate_sync(id, context, invoker).expect("PostHandler is always sync")
    }

    fn evaluate_sync(&self, _id: &NodeId, context: &EvalContext, _invoker: &Evaluator) -> Option<ThunkResult> {
        let value = context.request().post.get(&self.key).map_or(Value::Null, |value| value.to_json());
        Some(ThunkResult::Value(value))
    }
}

#[derive(Debug)]
pub(crate) struct QueryHandler {
    key: String,
}

impl QueryHandler {
    pub(crate) fn new(node: &wayform_core::AstNode) -> Self {
        Self { key: pseudo_key(node) }
    }
}

#[async_trait]
impl Handler for QueryHandler {
    async fn evaluate(&self, id: &NodeId, context: &EvalContext, invoker: &Evaluator, _hooks: &RuntimeHooks<'_>) -> ThunkResult {
        self.evaluate_sync(id, context, invoker).expect("QueryHandler is always sync")
    }

    fn evaluate_sync(&self, _id: &NodeId, context: &EvalContext, _invoker: &Evaluator) -> Option<ThunkResult> {
        let value = context.request().query.get(&self.key).map_or(Value::Null, |value| value.to_json());
        Some(ThunkResult::Value(value))
    }
}

#[derive(Debug)]
pub(crate) struct ParamsHandler {
    key: String,
}

impl ParamsHandler {
    pub(crate) fn new(node: &wayform_core::AstNode) -> Self {
        Self { key: pseudo_key(node) }
    }
}

#[async_trait]
impl Handler for ParamsHandler {
    async fn evaluate(&self, id: &NodeId, context: &EvalContext, invoker: &Evaluator, _hooks: &RuntimeHooks<'_>) -> ThunkResult {
        self.evaluate_sync(id, context, invoker).expect("ParamsHandler is always sync")
    }

    fn evaluate_sync(&self, _id: &NodeId, context: &EvalContext, _invoker: &Evaluator) -> Option<ThunkResult> {
        let value = context.request().params.get(&self.key).map_or(Value::Null, |value| value.to_json());
        Some(ThunkResult::Value(value))
    }
}

#[derive(Debug)]
pub(crate) struct DataHandler {
    key: String,
}

impl DataHandler {
    pub(crate) fn new(node: &wayform_core::AstNode) -> Self {
        Self { key: pseudo_key(node) }
    }
}

#[async_trait]
impl Handler for DataHandler {
    async fn evaluate(&self, id: &NodeId, context: &EvalContext, invoker: &Evaluator, _hooks: &RuntimeHooks<'_>) -> ThunkResult {
        self.evaluate_sync(id, context, invoker).expect("DataHandler is always sync")
    }

    fn evaluate_sync(&self, _id: &NodeId, context: &EvalContext, _invoker: &Evaluator) -> Option<ThunkResult> {
        let value = context.global().data(&self.key).unwrap_or(Value::Null);
        Some(ThunkResult::Value(value))
    }
}

#[derive(Debug)]
pub(crate) struct AnswerLocalHandler {
    code: String,
}

impl AnswerLocalHandler {
    pub(crate) fn new(node: &wayform_core::AstNode) -> Self {
        Self { code: pseudo_key(node) }
    }
}

#[async_trait]
impl Handler for AnswerLocalHandler {
    async fn evaluate(&self, id: &NodeId, context: &EvalContext, invoker: &Evaluator, _hooks: &RuntimeHooks<'_>) -> ThunkResult {
        self.evaluate_sync(id, context, invoker).expect("AnswerLocalHandler is always sync")
    }

    fn evaluate_sync(&self, _id: &NodeId, context: &EvalContext, _invoker: &Evaluator) -> Option<ThunkResult> {
        Some(ThunkResult::Value(resolve_answer(&self.code, context)))
    }
}

/// An answer resolved via a remote lookup. The core has no remote service
/// collaborator of its own (see the specification's non-goals); this
/// handler resolves the same way `AnswerLocalHandler` does but is marked
/// unconditionally async so hosts that register an EFFECT-based remote
/// fetch can layer genuine I/O in without changing the graph's `isAsync`
/// shape.
#[derive(Debug)]
pub(crate) struct AnswerRemoteHandler {
    code: String,
}

impl AnswerRemoteHandler {
    pub(crate) fn new(node: &wayform_core::AstNode) -> Self {
        Self { code: pseudo_key(node) }
    }
}

#[async_trait]
impl Handler for AnswerRemoteHandler {
    async fn evaluate(&self, _id: &NodeId, context: &EvalContext, _invoker: &Evaluator, _hooks: &RuntimeHooks<'_>) -> ThunkResult {
        ThunkResult::Value(resolve_answer(&self.code, context))
    }

    fn compute_is_async(&self, _dependency_is_async: &[bool]) -> bool {
        true
    }
}
