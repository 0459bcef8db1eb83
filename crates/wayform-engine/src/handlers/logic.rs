//! PREDICATE handlers: the AND/OR/XOR/NOT logic combinators and the TEST
//! leaf predicate. Operand evaluation failures are treated as falsy rather
//! than propagated, per the handler contract's short-circuit rules.

use async_trait::async_trait;
use serde_json::Value;

use wayform_core::{AstNode, NodeId, PropertyValue, ThunkResult};

use crate::context::EvalContext;
use crate::evaluator::Evaluator;
use crate::handler::Handler;
use crate::hooks::RuntimeHooks;
use crate::scope::ScopeFrame;

use super::support::{is_truthy, scalar_bool, scalar_str};

/// Evaluate an operand to a boolean, treating any evaluation failure as
/// falsy rather than raising — "operand evaluation failure ⇒ treat as
/// falsy", shared by every logic combinator below.
async fn operand_truthy(invoker: &Evaluator, context: &EvalContext, id: &NodeId) -> bool {
    matches!(invoker.invoke(id, context).await, ThunkResult::Value(value) if is_truthy(&value))
}

fn operand_ids(node: &AstNode, property: &str) -> Vec<NodeId> {
    match node.properties().get(property) {
        Some(PropertyValue::Child(id)) => vec![id.clone()],
        Some(PropertyValue::Children(ids)) => ids.clone(),
        _ => Vec::new(),
    }
}

#[derive(Debug)]
pub(crate) struct AndHandler {
    operands: Vec<NodeId>,
}

impl AndHandler {
    pub(crate) fn new(node: &AstNode) -> Self {
        Self {
            operands: operand_ids(node, "operands"),
        }
    }
}

#[async_trait]
impl Handler for AndHandler {
    async fn evaluate(&self, _id: &NodeId, context: &EvalContext, invoker: &Evaluator, _hooks: &RuntimeHooks<'_>) -> ThunkResult {
        context.push_scope(ScopeFrame::predicate());
        let mut result = true;
        for operand in &self.operands {
            if !operand_truthy(invoker, context, operand).await {
                result = false;
                break;
            }
        }
        context.pop_scope();
        ThunkResult::Value(Value::Bool(result))
    }
}

#[derive(Debug)]
pub(crate) struct OrHandler {
    operands: Vec<NodeId>,
}

impl OrHandler {
    pub(crate) fn new(node: &AstNode) -> Self {
        Self {
            operands: operand_ids(node, "operands"),
        }
    }
}

#[async_trait]
impl Handler for OrHandler {
    async fn evaluate(&self, _id: &NodeId, context: &EvalContext, invoker: &Evaluator, _hooks: &RuntimeHooks<'_>) -> ThunkResult {
        context.push_scope(ScopeFrame::predicate());
        let mut result = false;
        for operand in &self.operands {
            if operand_truthy(invoker, context, operand).await {
                result = true;
                break;
            }
        }
        context.pop_scope();
        ThunkResult::Value(Value::Bool(result))
    }
}

#[derive(Debug)]
pub(crate) struct XorHandler {
    operands: Vec<NodeId>,
}

impl XorHandler {
    pub(crate) fn new(node: &AstNode) -> Self {
        Self {
            operands: operand_ids(node, "operands"),
        }
    }
}

#[async_trait]
impl Handler for XorHandler {
    async fn evaluate(&self, _id: &NodeId, context: &EvalContext, invoker: &Evaluator, _hooks: &RuntimeHooks<'_>) -> ThunkResult {
        context.push_scope(ScopeFrame::predicate());
        let mut truthy_count = 0usize;
        for operand in &self.operands {
            if operand_truthy(invoker, context, operand).await {
                truthy_count += 1;
            }
        }
        context.pop_scope();
        ThunkResult::Value(Value::Bool(truthy_count == 1))
    }
}

#[derive(Debug)]
pub(crate) struct NotHandler {
    operand: Option<NodeId>,
}

impl NotHandler {
    pub(crate) fn new(node: &AstNode) -> Self {
        Self {
            operand: match node.properties().get("operand") {
                Some(PropertyValue::Child(id)) => Some(id.clone()),
                _ => None,
            },
        }
    }
}

#[async_trait]
impl Handler for NotHandler {
    async fn evaluate(&self, _id: &NodeId, context: &EvalContext, invoker: &Evaluator, _hooks: &RuntimeHooks<'_>) -> ThunkResult {
        context.push_scope(ScopeFrame::predicate());
        let truthy = match &self.operand {
            Some(id) => operand_truthy(invoker, context, id).await,
            None => false,
        };
        context.pop_scope();
        ThunkResult::Value(Value::Bool(!truthy))
    }
}

/// `TEST`: invokes `subject`, then calls the named built-in/user `function`
/// with the subject's value followed by any extra `arguments`, and applies
/// `negate`.
#[derive(Debug)]
pub(crate) struct TestHandler {
    subject: Option<NodeId>,
    function: String,
    arguments: Vec<NodeId>,
    negate: bool,
}

impl TestHandler {
    pub(crate) fn new(node: &AstNode) -> Self {
        Self {
            subject: match node.properties().get("subject") {
                Some(PropertyValue::Child(id)) => Some(id.clone()),
                _ => None,
            },
            function: scalar_str(node.properties(), "function").unwrap_or_default().to_string(),
            arguments: operand_ids(node, "arguments"),
            negate: scalar_bool(node.properties(), "negate"),
        }
    }
}

#[async_trait]
impl Handler for TestHandler {
    async fn evaluate(&self, id: &NodeId, context: &EvalContext, invoker: &Evaluator, _hooks: &RuntimeHooks<'_>) -> ThunkResult {
        let subject = match &self.subject {
            Some(subject_id) => match invoker.invoke(subject_id, context).await {
                ThunkResult::Value(value) => value,
                ThunkResult::Error(err) => return ThunkResult::Error(err),
            },
            None => Value::Null,
        };

        let mut args = Vec::with_capacity(self.arguments.len() + 1);
        args.push(subject);
        for argument in &self.arguments {
            match invoker.invoke(argument, context).await {
                ThunkResult::Value(value) => args.push(value),
                ThunkResult::Error(err) => return ThunkResult::Error(err),
            }
        }

        match invoker.functions().call(&self.function, &args) {
            Ok(value) => {
                let truthy = is_truthy(&value) != self.negate;
                ThunkResult::Value(Value::Bool(truthy))
            }
            Err(err) => {
                tracing::debug!(%id, function = %self.function, error = %err, "TEST condition function failed");
                ThunkResult::Error(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayform_core::{NodeType, PropertyMap};

    fn predicate_operands(kind: &str, operands: Vec<NodeId>) -> AstNode {
        let mut props = PropertyMap::new();
        props.insert("operands", PropertyValue::Children(operands));
        AstNode::new(NodeId::new_for_test("compile_ast", 0), NodeType::Predicate, kind, props)
    }

    #[test]
    fn empty_and_operands_parse_to_empty_vec() {
        let node = predicate_operands("AND", Vec::new());
        let handler = AndHandler::new(&node);
        assert!(handler.operands.is_empty());
    }

    #[test]
    fn not_without_operand_parses_to_none() {
        let node = AstNode::new(NodeId::new_for_test("compile_ast", 0), NodeType::Predicate, "NOT", PropertyMap::new());
        let handler = NotHandler::new(&node);
        assert!(handler.operand.is_none());
    }
}
