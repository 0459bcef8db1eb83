//! Per-kind handler construction. `build_handler` is the single dispatch
//! point both compilation (registering every compiled node) and runtime
//! overlay hooks (registering a freshly materialized node) go through.

use std::sync::Arc;

use wayform_core::{AstNode, EngineError, NodeType};

use crate::handler::Handler;

pub(crate) mod conditional;
mod format;
mod function;
pub(crate) mod iterate;
mod logic;
mod next;
mod pipeline;
pub(crate) mod pseudo;
pub(crate) mod reference;
pub(crate) mod structural;
pub(crate) mod support;
mod transitions;
mod validation;

/// Build the handler for a single node, keyed off its `node_type()` and
/// `variant()` (and, for BLOCK, its `blockType` property).
///
/// # Errors
///
/// Returns `EngineError::HandlerRegistry` for an unrecognized node kind or
/// variant.
pub(crate) fn build_handler(node: &AstNode) -> Result<Arc<dyn Handler>, EngineError> {
    let handler: Arc<dyn Handler> = match node.node_type() {
        NodeType::Journey | NodeType::Step => Arc::new(structural::StructuralHandler::new(node)),
        NodeType::Block => {
            if support::scalar_str(node.properties(), "blockType") == Some("FIELD") {
                Arc::new(structural::FieldHandler::new(node))
            } else {
                Arc::new(structural::StructuralHandler::new(node))
            }
        }
        NodeType::Expression => build_expression_handler(node)?,
        NodeType::Predicate => build_predicate_handler(node)?,
        NodeType::Transition => build_transition_handler(node)?,
        NodeType::Pseudo => build_pseudo_handler(node)?,
    };
    Ok(handler)
}

fn build_expression_handler(node: &AstNode) -> Result<Arc<dyn Handler>, EngineError> {
    let handler: Arc<dyn Handler> = match node.variant() {
        "REFERENCE" => Arc::new(reference::ReferenceHandler::new(node)?),
        "PIPELINE" => Arc::new(pipeline::PipelineHandler::new(node)),
        "FORMAT" => Arc::new(format::FormatHandler::new(node)),
        "CONDITIONAL" => Arc::new(conditional::ConditionalHandler::new(node)),
        "ITERATE" => Arc::new(iterate::IterateHandler::new(node)),
        "VALIDATION" => Arc::new(validation::ValidationHandler::new(node)),
        "NEXT" => Arc::new(next::NextHandler::new(node)),
        "FUNCTION" => Arc::new(function::FunctionHandler::new(node)),
        other => {
            return Err(EngineError::handler_registry(format!(
                "{}: unknown expression variant '{other}'",
                node.id()
            )))
        }
    };
    Ok(handler)
}

fn build_predicate_handler(node: &AstNode) -> Result<Arc<dyn Handler>, EngineError> {
    let handler: Arc<dyn Handler> = match node.variant() {
        "AND" => Arc::new(logic::AndHandler::new(node)),
        "OR" => Arc::new(logic::OrHandler::new(node)),
        "XOR" => Arc::new(logic::XorHandler::new(node)),
        "NOT" => Arc::new(logic::NotHandler::new(node)),
        "TEST" => Arc::new(logic::TestHandler::new(node)),
        other => {
            return Err(EngineError::handler_registry(format!(
                "{}: unknown predicate variant '{other}'",
                node.id()
            )))
        }
    };
    Ok(handler)
}

fn build_transition_handler(node: &AstNode) -> Result<Arc<dyn Handler>, EngineError> {
    let handler: Arc<dyn Handler> = match node.variant() {
        "ACCESS" => Arc::new(transitions::AccessHandler::new(node)),
        "ACTION" => Arc::new(transitions::ActionHandler::new(node)),
        "SUBMIT" => Arc::new(transitions::SubmitHandler::new(node)),
        other => {
            return Err(EngineError::handler_registry(format!(
                "{}: unknown transition variant '{other}'",
                node.id()
            )))
        }
    };
    Ok(handler)
}

fn build_pseudo_handler(node: &AstNode) -> Result<Arc<dyn Handler>, EngineError> {
    let handler: Arc<dyn Handler> = match node.variant() {
        "POST" => Arc::new(pseudo::PostHandler::new(node)),
        "QUERY" => Arc::new(pseudo::QueryHandler::new(node)),
        "PARAMS" => Arc::new(pseudo::ParamsHandler::new(node)),
        "DATA" => Arc::new(pseudo::DataHandler::new(node)),
        "ANSWER_LOCAL" => Arc::new(pseudo::AnswerLocalHandler::new(node)),
        "ANSWER_REMOTE" => Arc::new(pseudo::AnswerRemoteHandler::new(node)),
        other => {
            return Err(EngineError::handler_registry(format!(
                "{}: unknown pseudo variant '{other}'",
                node.id()
            )))
        }
    };
    Ok(handler)
}
