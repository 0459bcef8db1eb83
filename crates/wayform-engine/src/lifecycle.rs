//! The per-request controller: walks a step's lifecycle ancestors (merging
//! static `data`, running `onAccess` transitions), expands iterators in
//! scope for the current step, pre-resolves answer pseudo nodes, and on POST
//! runs `onAction` then `onSubmission` transitions with first-match
//! semantics. Ends in a render, a redirect, or an HTTP error, matching how
//! the teacher's request handlers resolve to one of a small outcome enum
//! rather than writing directly to a response mid-flight.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Map, Value};

use wayform_core::{AstNode, NodeId, NodeMetadata, NodeType, PropertyValue, ReadRegistry, ThunkResult};

use crate::compile::Artefact;
use crate::context::{EvalContext, RequestData};
use crate::evaluator::Evaluator;
use crate::functions::FunctionRegistry;

/// Where a request's lifecycle ended up.
#[derive(Debug, Clone)]
pub enum RequestOutcome {
    /// Render the current step. Carries everything a framework adapter's
    /// `render` needs and nothing it would have to re-evaluate.
    Render(RenderContext),
    /// Redirect the client to another path.
    Redirect(String),
    /// Terminate with an HTTP error, raised by a transition's `outcome: 'error'`.
    Error {
        /// HTTP status code, when the transition specified one.
        status: Option<u64>,
        /// A human-readable message, when the transition specified one.
        message: Option<String>,
    },
}

/// Everything a framework adapter needs to render one step: the step's own
/// evaluated shape, its lifecycle ancestors, the blocks resolved for it,
/// outstanding validation failures, and snapshots of the request-scoped
/// answer/data maps. Built purely by reading already-evaluated shapes out of
/// the cache; never triggers a fresh evaluation itself.
#[derive(Debug, Clone)]
pub struct RenderContext {
    /// The current step's evaluated `{id, type, variant, properties}` shape.
    pub step: Value,
    /// Evaluated shapes for every lifecycle ancestor, outer journey first.
    pub ancestors: Vec<Value>,
    /// The current step's evaluated blocks, in document order.
    pub blocks: Vec<Value>,
    /// `{blockCode, message, details?}` entries for every failed FIELD validation.
    pub validation_errors: Vec<Value>,
    /// A snapshot of every resolved answer, by field code.
    pub answers: Map<String, Value>,
    /// A snapshot of the merged `data` overlay.
    pub data: Map<String, Value>,
    /// Whether the render was reached via a failed submission, in which case
    /// a host template typically surfaces `validation_errors` inline.
    pub show_validation_failures: bool,
    /// The journey/step tree rooted at the outermost ancestor, each node
    /// tagged `active` when it sits on the path to the current step, for a
    /// host to render a sidebar or breadcrumb without re-walking the AST.
    pub navigation: Value,
}

/// Drives one request's lifecycle against a compiled artefact. Built once
/// per host and shared (it owns nothing request-scoped); `handle_request`
/// builds a fresh `Evaluator` internally, matching `Evaluator` itself being
/// a per-request, drop-at-the-end construct.
pub struct LifecycleController {
    artefact: Arc<Artefact>,
    config: wayform_config::EngineConfig,
    functions: Arc<FunctionRegistry>,
}

impl LifecycleController {
    /// Build a controller over a compiled artefact, shared across requests.
    #[must_use]
    pub fn new(artefact: Arc<Artefact>, config: wayform_config::EngineConfig, functions: Arc<FunctionRegistry>) -> Self {
        Self { artefact, config, functions }
    }

    /// Run the full per-request lifecycle for `current_step_id`, using
    /// `request` as the framework-supplied request data.
    pub async fn handle_request(&self, request: RequestData, current_step_id: NodeId) -> RequestOutcome {
        let is_post = request.method.eq_ignore_ascii_case("POST");
        let evaluator = Evaluator::with_runtime_overlay(&self.artefact, self.config.clone(), Arc::clone(&self.functions));
        let context = EvalContext::new(request);

        let ancestors = ancestor_chain(&evaluator, &current_step_id);

        for ancestor in &ancestors {
            merge_ancestor_data(&evaluator, &context, ancestor);
            if let Some(outcome) = self.run_access_transitions(&evaluator, &context, ancestor).await {
                return outcome;
            }
        }

        expand_step_iterators(&evaluator, &context, &current_step_id).await;
        resolve_answer_pseudos(&evaluator, &context).await;

        let mut show_validation_failures = false;
        if is_post {
            if let Some(outcome) = self.run_first_match(&evaluator, &context, &current_step_id, "onAction").await {
                return outcome;
            }
            match self.run_submission(&evaluator, &context, &current_step_id).await {
                SubmissionOutcome::Ended(outcome) => return outcome,
                SubmissionOutcome::Validated => show_validation_failures = true,
                SubmissionOutcome::NoSubmit | SubmissionOutcome::NotValidated => {}
            }
        }

        for ancestor in &ancestors {
            let _ = evaluator.invoke(ancestor, &context).await;
        }

        let render_context = build_render_context(&evaluator, &context, &ancestors, &current_step_id, show_validation_failures);
        RequestOutcome::Render(render_context)
    }

    async fn run_access_transitions(&self, evaluator: &Evaluator, context: &EvalContext, ancestor: &NodeId) -> Option<RequestOutcome> {
        let node = evaluator.nodes.get(ancestor)?;
        for transition in children_of(&node, "onAccess") {
            let ThunkResult::Value(result) = evaluator.invoke(&transition, context).await else {
                continue;
            };
            if let Some(outcome) = outcome_from(&result) {
                return Some(outcome);
            }
        }
        None
    }

    /// Invoke `property`'s transitions on `step` in document order until the
    /// first one reports `executed: true` (first-match), then stop. Only a
    /// `redirect`/`error` outcome is terminal; `'continue'` or an absent
    /// outcome just means the matched transition ran its effects and the
    /// lifecycle proceeds to the next stage.
    async fn run_first_match(&self, evaluator: &Evaluator, context: &EvalContext, step: &NodeId, property: &str) -> Option<RequestOutcome> {
        let node = evaluator.nodes.get(step)?;
        for transition in children_of(&node, property) {
            let ThunkResult::Value(result) = evaluator.invoke(&transition, context).await else {
                continue;
            };
            if !executed(&result) {
                continue;
            }
            return outcome_from(&result);
        }
        None
    }

    async fn run_submission(&self, evaluator: &Evaluator, context: &EvalContext, step: &NodeId) -> SubmissionOutcome {
        let Some(node) = evaluator.nodes.get(step) else {
            return SubmissionOutcome::NoSubmit;
        };
        for transition in children_of(&node, "onSubmission") {
            let ThunkResult::Value(result) = evaluator.invoke(&transition, context).await else {
                continue;
            };
            if !executed(&result) {
                continue;
            }
            if let Some(outcome) = outcome_from(&result) {
                return SubmissionOutcome::Ended(outcome);
            }
            return if validated(&result) {
                SubmissionOutcome::Validated
            } else {
                SubmissionOutcome::NotValidated
            };
        }
        SubmissionOutcome::NoSubmit
    }
}

enum SubmissionOutcome {
    Ended(RequestOutcome),
    Validated,
    NotValidated,
    NoSubmit,
}

/// Whether a transition's result carries `executed: true`.
fn executed(result: &Value) -> bool {
    result.get("executed").and_then(Value::as_bool).unwrap_or(false)
}

/// Whether a SUBMIT result's gated validations all passed (`validated` is
/// `true` precisely when at least one validation failed, per the SUBMIT
/// handler's own contract).
fn validated(result: &Value) -> bool {
    result.get("validated").and_then(Value::as_bool).unwrap_or(false)
}

/// Build a `RequestOutcome` from a transition result's `outcome` field, if
/// it names a redirect or an error. `'continue'` (or an absent field) means
/// the lifecycle should keep walking, so this returns `None`.
fn outcome_from(result: &Value) -> Option<RequestOutcome> {
    match result.get("outcome").and_then(Value::as_str) {
        Some("redirect") => {
            let url = result.get("redirect").and_then(Value::as_str).unwrap_or_default().to_string();
            Some(RequestOutcome::Redirect(url))
        }
        Some("error") => Some(RequestOutcome::Error {
            status: result.get("status").and_then(Value::as_u64),
            message: result.get("message").and_then(Value::as_str).map(str::to_string),
        }),
        _ => None,
    }
}

fn children_of(node: &AstNode, name: &str) -> Vec<NodeId> {
    match node.properties().get(name) {
        Some(PropertyValue::Child(id)) => vec![id.clone()],
        Some(PropertyValue::Children(ids)) => ids.clone(),
        _ => Vec::new(),
    }
}

/// The lifecycle ancestor chain for a step: every JOURNEY/STEP node from the
/// outermost journey down to (and including) the step itself, walking
/// `attachedToParentNode` upward and reversing.
fn ancestor_chain(evaluator: &Evaluator, step_id: &NodeId) -> Vec<NodeId> {
    let mut chain = Vec::new();
    let mut current = Some(step_id.clone());
    while let Some(id) = current {
        if let Some(node) = evaluator.nodes.get(&id) {
            if matches!(node.node_type(), NodeType::Journey | NodeType::Step) {
                chain.push(id.clone());
            }
        }
        current = evaluator.metadata.get(&id).and_then(|meta| meta.attached_to_parent_node);
    }
    chain.reverse();
    chain
}

/// Shallow-merge an ancestor's static `data` property into the request's
/// global data overlay. Non-object or absent `data` is a no-op.
fn merge_ancestor_data(evaluator: &Evaluator, context: &EvalContext, ancestor: &NodeId) {
    let Some(node) = evaluator.nodes.get(ancestor) else {
        return;
    };
    if let Some(PropertyValue::Scalar(Value::Object(data))) = node.properties().get("data") {
        context.global().merge_data(data);
    }
}

/// Every ITERATE expression node whose nearest STEP ancestor is
/// `current_step`, walked up to its topmost ancestor still marked
/// `is_descendant_of_step` (the highest node under the step, never the step
/// itself). Invoking that topmost ancestor cascades down through it,
/// letting `IterateHandler` materialize runtime nodes for each element
/// before anything in the step is rendered.
async fn expand_step_iterators(evaluator: &Evaluator, context: &EvalContext, current_step: &NodeId) {
    let mut topmost_ids = Vec::new();
    for (id, node) in evaluator.nodes.entries() {
        if node.node_type() != NodeType::Expression || node.variant() != "ITERATE" {
            continue;
        }
        if !evaluator.metadata.get(&id).is_some_and(|meta: NodeMetadata| meta.is_descendant_of_step) {
            continue;
        }
        if nearest_step(evaluator, &id).as_ref() != Some(current_step) {
            continue;
        }
        let topmost = topmost_descendant_of_step(evaluator, &id);
        if !topmost_ids.contains(&topmost) {
            topmost_ids.push(topmost);
        }
    }
    for id in topmost_ids {
        let _ = evaluator.invoke(&id, context).await;
    }
}

fn nearest_step(evaluator: &Evaluator, id: &NodeId) -> Option<NodeId> {
    let mut current = evaluator.metadata.get(id)?.attached_to_parent_node;
    while let Some(candidate) = current {
        if let Some(node) = evaluator.nodes.get(&candidate) {
            if node.node_type() == NodeType::Step {
                return Some(candidate);
            }
        }
        current = evaluator.metadata.get(&candidate).and_then(|meta| meta.attached_to_parent_node);
    }
    None
}

fn topmost_descendant_of_step(evaluator: &Evaluator, id: &NodeId) -> NodeId {
    let mut topmost = id.clone();
    let mut current = evaluator.metadata.get(id).and_then(|meta| meta.attached_to_parent_node);
    while let Some(candidate) = current {
        if !evaluator.metadata.get(&candidate).is_some_and(|meta| meta.is_descendant_of_step) {
            break;
        }
        topmost = candidate.clone();
        current = evaluator.metadata.get(&candidate).and_then(|meta| meta.attached_to_parent_node);
    }
    topmost
}

/// Invoke every ANSWER_LOCAL/ANSWER_REMOTE pseudo node so subsequent
/// transitions see already-resolved answers rather than raw POST values.
async fn resolve_answer_pseudos(evaluator: &Evaluator, context: &EvalContext) {
    let ids: Vec<NodeId> = evaluator
        .nodes
        .entries()
        .into_iter()
        .filter(|(_, node)| node.node_type() == NodeType::Pseudo && matches!(node.variant(), "ANSWER_LOCAL" | "ANSWER_REMOTE"))
        .map(|(id, _)| id)
        .collect();
    for id in ids {
        let _ = evaluator.invoke(&id, context).await;
    }
}

fn build_render_context(
    evaluator: &Evaluator,
    context: &EvalContext,
    ancestors: &[NodeId],
    current_step: &NodeId,
    show_validation_failures: bool,
) -> RenderContext {
    let step = cached_value(evaluator, current_step);
    let ancestor_values = ancestors.iter().map(|id| cached_value(evaluator, id)).collect();
    let blocks = step
        .get("properties")
        .and_then(|props| props.get("blocks"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let validation_errors = collect_validation_errors(&blocks);
    let active_ids: HashSet<String> = ancestors.iter().map(NodeId::to_string).collect();
    let navigation = ancestor_values
        .first()
        .and_then(|root| navigation_node(root, &active_ids))
        .unwrap_or(Value::Null);

    RenderContext {
        step,
        ancestors: ancestor_values,
        blocks,
        validation_errors,
        answers: context.global().answers_snapshot(),
        data: context.global().data_snapshot(),
        show_validation_failures,
        navigation,
    }
}

/// Turn one already-evaluated JOURNEY/STEP shape (as produced by
/// `StructuralHandler`) into a navigation tree node, recursing into
/// `properties.steps`. Any other evaluated shape (a BLOCK, say) is not a
/// navigation node and yields `None`.
fn navigation_node(value: &Value, active_ids: &HashSet<String>) -> Option<Value> {
    let id = value.get("id").and_then(Value::as_str)?;
    let node_type = value.get("type").and_then(Value::as_str)?;
    let tag = match node_type {
        "JOURNEY" => "journey",
        "STEP" => "step",
        _ => return None,
    };
    let properties = value.get("properties");
    let path = properties.and_then(|props| props.get("path")).and_then(Value::as_str).unwrap_or_default();
    let children: Vec<Value> = properties
        .and_then(|props| props.get("steps"))
        .and_then(Value::as_array)
        .map(|steps| steps.iter().filter_map(|step| navigation_node(step, active_ids)).collect())
        .unwrap_or_default();

    let mut out = Map::new();
    out.insert("type".to_string(), Value::String(tag.to_string()));
    if let Some(title) = properties.and_then(|props| props.get("title")) {
        out.insert("title".to_string(), title.clone());
    }
    out.insert("path".to_string(), Value::String(path.to_string()));
    out.insert("active".to_string(), Value::Bool(active_ids.contains(id)));
    if let Some(hidden) = properties.and_then(|props| props.get("hiddenFromNavigation")) {
        out.insert("hiddenFromNavigation".to_string(), hidden.clone());
    }
    if !children.is_empty() {
        out.insert("children".to_string(), Value::Array(children));
    }
    Some(Value::Object(out))
}

fn cached_value(evaluator: &Evaluator, id: &NodeId) -> Value {
    match evaluator.cache.get(id) {
        Some(ThunkResult::Value(value)) => value,
        _ => Value::Null,
    }
}

/// Walk every block's evaluated `validate` array for `{passed: false, ...}`
/// entries, tagging each with the owning block's `code`.
fn collect_validation_errors(blocks: &[Value]) -> Vec<Value> {
    let mut errors = Vec::new();
    for block in blocks {
        let Some(properties) = block.get("properties") else {
            continue;
        };
        let code = properties.get("code").and_then(Value::as_str).unwrap_or_default();
        let Some(validations) = properties.get("validate").and_then(Value::as_array) else {
            continue;
        };
        for validation in validations {
            let passed = validation.get("passed").and_then(Value::as_bool).unwrap_or(true);
            if passed {
                continue;
            }
            let mut entry = Map::new();
            entry.insert("blockCode".to_string(), Value::String(code.to_string()));
            if let Some(message) = validation.get("message") {
                entry.insert("message".to_string(), message.clone());
            }
            if let Some(details) = validation.get("details") {
                entry.insert("details".to_string(), details.clone());
            }
            errors.push(Value::Object(entry));
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile;
    use serde_json::json;
    use wayform_config::EngineConfig;

    fn journey() -> Value {
        json!({
            "type": "JOURNEY",
            "code": "apply",
            "path": "/apply",
            "data": {"programme": "general"},
            "steps": [{
                "type": "STEP",
                "path": "/apply/name",
                "blocks": [{
                    "type": "BLOCK",
                    "blockType": "FIELD",
                    "variant": "text-input",
                    "code": "fullName",
                    "label": "Full name"
                }],
                "onSubmission": [{
                    "type": "TRANSITION",
                    "transitionType": "SUBMIT",
                    "validate": false,
                    "onValidNext": {
                        "type": "EXPRESSION",
                        "expressionType": "NEXT",
                        "redirect": "/apply/done"
                    }
                }]
            }]
        })
    }

    fn step_id(artefact: &Artefact) -> NodeId {
        artefact
            .nodes
            .find_where(|n| n.node_type() == NodeType::Step)
            .into_iter()
            .next()
            .unwrap()
            .0
    }

    #[tokio::test]
    async fn get_request_renders_the_current_step() {
        let artefact = Arc::new(compile(&journey()).unwrap());
        let step = step_id(&artefact);
        let controller = LifecycleController::new(Arc::clone(&artefact), EngineConfig::default(), Arc::new(FunctionRegistry::with_builtins()));

        let request = RequestData {
            method: "GET".to_string(),
            path: "/apply/name".to_string(),
            ..Default::default()
        };
        let outcome = controller.handle_request(request, step).await;
        match outcome {
            RequestOutcome::Render(render) => {
                assert_eq!(render.data.get("programme"), Some(&Value::String("general".to_string())));
                assert_eq!(render.blocks.len(), 1);
                assert!(!render.show_validation_failures);
                assert_eq!(render.navigation.get("type"), Some(&Value::String("journey".to_string())));
                let children = render.navigation.get("children").and_then(Value::as_array).unwrap();
                assert_eq!(children.len(), 1);
                assert_eq!(children[0].get("active"), Some(&Value::Bool(true)));
            }
            other => panic!("expected a render outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn post_with_unconditional_submit_redirects() {
        let artefact = Arc::new(compile(&journey()).unwrap());
        let step = step_id(&artefact);
        let controller = LifecycleController::new(Arc::clone(&artefact), EngineConfig::default(), Arc::new(FunctionRegistry::with_builtins()));

        let mut post = std::collections::HashMap::new();
        post.insert("fullName".to_string(), crate::context::RequestValue::Single("Ada".to_string()));
        let request = RequestData {
            method: "POST".to_string(),
            path: "/apply/name".to_string(),
            post,
            ..Default::default()
        };
        let outcome = controller.handle_request(request, step).await;
        match outcome {
            RequestOutcome::Redirect(url) => assert_eq!(url, "/apply/done"),
            other => panic!("expected a redirect outcome, got {other:?}"),
        }
    }
}
