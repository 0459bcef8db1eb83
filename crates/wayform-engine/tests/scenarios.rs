//! End-to-end scenarios exercising the compiler, evaluator, and lifecycle
//! controller together against literal documents and requests, rather than
//! any single handler in isolation.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use wayform_config::EngineConfig;
use wayform_core::NodeType;
use wayform_engine::{compile_document, EvalContext, Evaluator, FunctionRegistry, LifecycleController, RequestData, RequestOutcome, RequestValue};

fn controller(document: &Value) -> (LifecycleController, Arc<wayform_engine::Artefact>) {
    let artefact = Arc::new(compile_document(document).unwrap());
    let controller = LifecycleController::new(Arc::clone(&artefact), EngineConfig::default(), Arc::new(FunctionRegistry::with_builtins()));
    (controller, artefact)
}

fn step_id(artefact: &wayform_engine::Artefact) -> wayform_core::NodeId {
    artefact.find_where(|n| n.node_type() == NodeType::Step).into_iter().next().unwrap().0
}

fn post(fields: &[(&str, &str)]) -> HashMap<String, RequestValue> {
    fields.iter().map(|(k, v)| (k.to_string(), RequestValue::Single(v.to_string()))).collect()
}

/// (1) Simple echo: a POST body field, with no formatting or transition in
/// the way, comes back out of the render context's answer snapshot and the
/// field's own evaluated `value` unchanged.
#[tokio::test]
async fn simple_echo() {
    let document = json!({
        "type": "JOURNEY",
        "code": "echo",
        "path": "/echo",
        "steps": [{
            "type": "STEP",
            "path": "/echo/message",
            "blocks": [{
                "type": "BLOCK",
                "blockType": "FIELD",
                "variant": "text-input",
                "code": "message"
            }]
        }]
    });
    let (controller, artefact) = controller(&document);
    let step = step_id(&artefact);

    let request = RequestData {
        method: "POST".to_string(),
        path: "/echo/message".to_string(),
        post: post(&[("message", "hello world")]),
        ..Default::default()
    };
    match controller.handle_request(request, step).await {
        RequestOutcome::Render(render) => {
            assert_eq!(render.answers.get("message"), Some(&Value::String("hello world".to_string())));
            let value = render.blocks[0].get("properties").and_then(|p| p.get("value"));
            assert_eq!(value, Some(&Value::String("hello world".to_string())));
        }
        other => panic!("expected a render outcome, got {other:?}"),
    }
}

/// (2) Cross-field Format reference: a display block's `content` is
/// `Format('Hello, %1!', Answer('firstName'))`, resolved against the POST
/// value of a sibling field in the same request.
#[tokio::test]
async fn cross_field_format_reference() {
    let document = json!({
        "type": "JOURNEY",
        "code": "apply",
        "path": "/apply",
        "steps": [{
            "type": "STEP",
            "path": "/apply/greeting",
            "blocks": [
                {
                    "type": "BLOCK",
                    "blockType": "FIELD",
                    "variant": "text-input",
                    "code": "firstName"
                },
                {
                    "type": "BLOCK",
                    "blockType": "display",
                    "code": "greeting",
                    "content": {
                        "type": "EXPRESSION",
                        "expressionType": "FORMAT",
                        "template": "Hello, %1!",
                        "arguments": {
                            "type": "EXPRESSION",
                            "expressionType": "REFERENCE",
                            "namespace": "answers",
                            "key": "firstName"
                        }
                    }
                }
            ]
        }]
    });
    let (controller, artefact) = controller(&document);
    let step = step_id(&artefact);

    let request = RequestData {
        method: "POST".to_string(),
        path: "/apply/greeting".to_string(),
        post: post(&[("firstName", "Ada")]),
        ..Default::default()
    };
    match controller.handle_request(request, step).await {
        RequestOutcome::Render(render) => {
            let greeting = render.blocks.iter().find(|b| b.get("properties").and_then(|p| p.get("code")) == Some(&Value::String("greeting".to_string()))).unwrap();
            let content = greeting.get("properties").and_then(|p| p.get("content"));
            assert_eq!(content, Some(&Value::String("Hello, Ada!".to_string())));
        }
        other => panic!("expected a render outcome, got {other:?}"),
    }
}

fn validation_cycle_document() -> Value {
    json!({
        "type": "JOURNEY",
        "code": "apply",
        "path": "/apply",
        "steps": [{
            "type": "STEP",
            "path": "/apply/name",
            "blocks": [{
                "type": "BLOCK",
                "blockType": "FIELD",
                "variant": "text-input",
                "code": "fullName",
                "validate": [{
                    "type": "EXPRESSION",
                    "expressionType": "VALIDATION",
                    "function": "matches",
                    "message": "Full name is required",
                    "subject": {
                        "type": "EXPRESSION",
                        "expressionType": "REFERENCE",
                        "namespace": "answers",
                        "key": "fullName"
                    },
                    "arguments": [{
                        "type": "EXPRESSION",
                        "expressionType": "FORMAT",
                        "template": "^.+$"
                    }]
                }]
            }],
            "onSubmission": [{
                "type": "TRANSITION",
                "transitionType": "SUBMIT",
                "validate": true,
                "onValidNext": {
                    "type": "EXPRESSION",
                    "expressionType": "NEXT",
                    "redirect": "/apply/done"
                }
            }]
        }]
    })
}

/// (3) Validation cycle, failing half: a blank required field fails its
/// gated validation, so the submission reports `validated: true` and the
/// lifecycle renders the step again with `showValidationFailures: true`
/// instead of redirecting.
#[tokio::test]
async fn validation_cycle_reports_failures_without_redirecting() {
    let (controller, artefact) = controller(&validation_cycle_document());
    let step = step_id(&artefact);

    let request = RequestData {
        method: "POST".to_string(),
        path: "/apply/name".to_string(),
        post: post(&[("fullName", "")]),
        ..Default::default()
    };
    match controller.handle_request(request, step).await {
        RequestOutcome::Render(render) => {
            assert!(render.show_validation_failures);
            assert_eq!(render.validation_errors.len(), 1);
            let error = &render.validation_errors[0];
            assert_eq!(error.get("blockCode"), Some(&Value::String("fullName".to_string())));
            assert_eq!(error.get("message"), Some(&Value::String("Full name is required".to_string())));
        }
        other => panic!("expected a render outcome with validation failures, got {other:?}"),
    }
}

/// (3) Validation cycle, passing half: the same document, submitted with a
/// non-blank value, passes its gated validation and redirects.
#[tokio::test]
async fn validation_cycle_redirects_once_valid() {
    let (controller, artefact) = controller(&validation_cycle_document());
    let step = step_id(&artefact);

    let request = RequestData {
        method: "POST".to_string(),
        path: "/apply/name".to_string(),
        post: post(&[("fullName", "Ada Lovelace")]),
        ..Default::default()
    };
    match controller.handle_request(request, step).await {
        RequestOutcome::Redirect(url) => assert_eq!(url, "/apply/done"),
        other => panic!("expected a redirect outcome, got {other:?}"),
    }
}

fn scope_reference(level: u64, path: &[&str]) -> Value {
    json!({
        "type": "EXPRESSION",
        "expressionType": "REFERENCE",
        "namespace": "@scope",
        "level": level,
        "path": path
    })
}

/// (4) Iterator expansion: a MAP over `Data('items')` projects, per element,
/// a string combining that element's own index and value — the scope-level
/// contract every dynamically keyed per-iteration identifier (the spec's
/// `item_N_name` field codes) is built on. Per-iteration FIELD answer
/// binding is a separate, request-lifecycle-level concern not exercised
/// here (see DESIGN.md).
#[tokio::test]
async fn iterator_expansion_projects_index_and_value_per_element() {
    let document = json!({
        "type": "JOURNEY",
        "code": "apply",
        "path": "/apply",
        "steps": [{
            "type": "STEP",
            "path": "/apply/names",
            "projection": {
                "type": "EXPRESSION",
                "expressionType": "ITERATE",
                "iterateKind": "MAP",
                "input": {
                    "type": "EXPRESSION",
                    "expressionType": "REFERENCE",
                    "namespace": "data",
                    "key": "items"
                },
                "template": {
                    "type": "EXPRESSION",
                    "expressionType": "FORMAT",
                    "template": "item_%1_name=%2",
                    "arguments": [scope_reference(0, &["@index"]), scope_reference(0, &["@item"])]
                }
            }
        }]
    });

    let artefact = Arc::new(compile_document(&document).unwrap());
    let evaluator = Evaluator::with_runtime_overlay(&artefact, EngineConfig::default(), Arc::new(FunctionRegistry::with_builtins()));
    let context = EvalContext::new(RequestData::default());

    let mut data = Map::new();
    data.insert("items".to_string(), json!(["Alice", "Bob", "Cara"]));
    context.global().merge_data(&data);

    let iterate_id = artefact
        .find_where(|n| n.variant() == "ITERATE")
        .into_iter()
        .map(|(id, _)| id)
        .min()
        .unwrap();

    let result = match evaluator.invoke(&iterate_id, &context).await {
        wayform_core::ThunkResult::Value(value) => value,
        wayform_core::ThunkResult::Error(err) => panic!("iterator expansion failed: {err}"),
    };
    assert_eq!(
        result,
        json!(["item_0_name=Alice", "item_1_name=Bob", "item_2_name=Cara"])
    );
}

/// (6) Nested iterator scopes: a MAP over groups whose own per-group
/// template is itself a MAP over that group's items, where each innermost
/// element formats its own name (`@scope` level 0) alongside its parent
/// group's name (`@scope` level 1, skipping over no intervening frame since
/// the inner MAP pushes exactly one frame per level).
#[tokio::test]
async fn nested_iterator_scopes_navigate_by_level() {
    let document = json!({
        "type": "JOURNEY",
        "code": "apply",
        "path": "/apply",
        "steps": [{
            "type": "STEP",
            "path": "/apply/groups",
            "projection": {
                "type": "EXPRESSION",
                "expressionType": "ITERATE",
                "iterateKind": "MAP",
                "input": {
                    "type": "EXPRESSION",
                    "expressionType": "REFERENCE",
                    "namespace": "data",
                    "key": "groups"
                },
                "template": {
                    "type": "EXPRESSION",
                    "expressionType": "ITERATE",
                    "iterateKind": "MAP",
                    "input": scope_reference(0, &["@item", "items"]),
                    "template": {
                        "type": "EXPRESSION",
                        "expressionType": "FORMAT",
                        "template": "%1 (%2)",
                        "arguments": [
                            scope_reference(0, &["@item", "name"]),
                            scope_reference(1, &["@item", "groupName"])
                        ]
                    }
                }
            }
        }]
    });

    let artefact = Arc::new(compile_document(&document).unwrap());
    let evaluator = Evaluator::with_runtime_overlay(&artefact, EngineConfig::default(), Arc::new(FunctionRegistry::with_builtins()));
    let context = EvalContext::new(RequestData::default());

    let mut data = Map::new();
    data.insert(
        "groups".to_string(),
        json!([
            {"groupName": "A", "items": [{"name": "Alice"}, {"name": "Bob"}]},
            {"groupName": "B", "items": [{"name": "Cara"}]}
        ]),
    );
    context.global().merge_data(&data);

    let outer_id = artefact
        .find_where(|n| n.variant() == "ITERATE")
        .into_iter()
        .map(|(id, _)| id)
        .min()
        .unwrap();

    let result = match evaluator.invoke(&outer_id, &context).await {
        wayform_core::ThunkResult::Value(value) => value,
        wayform_core::ThunkResult::Error(err) => panic!("nested iterator expansion failed: {err}"),
    };
    assert_eq!(result, json!([["Alice (A)", "Bob (A)"], ["Cara (B)"]]));
}

/// (5) Access redirect: an anonymous request (no `token` query parameter)
/// hits the journey's `onAccess` transition and is redirected before any
/// step content is evaluated.
#[tokio::test]
async fn access_redirect_for_anonymous_request() {
    let document = json!({
        "type": "JOURNEY",
        "code": "apply",
        "path": "/apply",
        "onAccess": [{
            "type": "TRANSITION",
            "transitionType": "ACCESS",
            "when": {
                "type": "PREDICATE",
                "predicateType": "NOT",
                "operand": {
                    "type": "EXPRESSION",
                    "expressionType": "REFERENCE",
                    "namespace": "query",
                    "key": "token"
                }
            },
            "next": {
                "type": "EXPRESSION",
                "expressionType": "NEXT",
                "redirect": "/login"
            }
        }],
        "steps": [{
            "type": "STEP",
            "path": "/apply/name",
            "blocks": [{
                "type": "BLOCK",
                "blockType": "FIELD",
                "variant": "text-input",
                "code": "fullName"
            }]
        }]
    });
    let (controller, artefact) = controller(&document);
    let step = step_id(&artefact);

    let request = RequestData {
        method: "GET".to_string(),
        path: "/apply/name".to_string(),
        ..Default::default()
    };
    match controller.handle_request(request, step).await {
        RequestOutcome::Redirect(url) => assert_eq!(url, "/login"),
        other => panic!("expected a redirect outcome, got {other:?}"),
    }
}

/// The same anonymous-access journey lets a request carrying `?token=...`
/// straight through to a render.
#[tokio::test]
async fn access_redirect_does_not_fire_with_a_token() {
    let document = json!({
        "type": "JOURNEY",
        "code": "apply",
        "path": "/apply",
        "onAccess": [{
            "type": "TRANSITION",
            "transitionType": "ACCESS",
            "when": {
                "type": "PREDICATE",
                "predicateType": "NOT",
                "operand": {
                    "type": "EXPRESSION",
                    "expressionType": "REFERENCE",
                    "namespace": "query",
                    "key": "token"
                }
            },
            "next": {
                "type": "EXPRESSION",
                "expressionType": "NEXT",
                "redirect": "/login"
            }
        }],
        "steps": [{
            "type": "STEP",
            "path": "/apply/name",
            "blocks": [{
                "type": "BLOCK",
                "blockType": "FIELD",
                "variant": "text-input",
                "code": "fullName"
            }]
        }]
    });
    let (controller, artefact) = controller(&document);
    let step = step_id(&artefact);

    let request = RequestData {
        method: "GET".to_string(),
        path: "/apply/name".to_string(),
        query: post(&[("token", "abc123")]),
        ..Default::default()
    };
    match controller.handle_request(request, step).await {
        RequestOutcome::Render(render) => assert_eq!(render.blocks.len(), 1),
        other => panic!("expected a render outcome, got {other:?}"),
    }
}

/// A PIPELINE's transformer arguments can reference the value being piped
/// through `@value`, the frame `PipelineHandler` pushes before invoking each
/// transformer in turn.
#[tokio::test]
async fn pipeline_transformer_reads_the_piped_value() {
    let document = json!({
        "type": "JOURNEY",
        "code": "apply",
        "path": "/apply",
        "steps": [{
            "type": "STEP",
            "path": "/apply/names",
            "projection": {
                "type": "EXPRESSION",
                "expressionType": "PIPELINE",
                "input": {
                    "type": "EXPRESSION",
                    "expressionType": "REFERENCE",
                    "namespace": "data",
                    "key": "name"
                },
                "transformers": [{
                    "type": "EXPRESSION",
                    "expressionType": "FUNCTION",
                    "functionKind": "TRANSFORMER",
                    "name": "uppercase",
                    "arguments": [{
                        "type": "EXPRESSION",
                        "expressionType": "REFERENCE",
                        "namespace": "@value"
                    }]
                }]
            }
        }]
    });

    let artefact = Arc::new(compile_document(&document).unwrap());
    let evaluator = Evaluator::with_runtime_overlay(&artefact, EngineConfig::default(), Arc::new(FunctionRegistry::with_builtins()));
    let context = EvalContext::new(RequestData::default());

    let mut data = Map::new();
    data.insert("name".to_string(), json!("ada"));
    context.global().merge_data(&data);

    let pipeline_id = artefact.find_where(|n| n.variant() == "PIPELINE").into_iter().next().unwrap().0;
    let result = match evaluator.invoke(&pipeline_id, &context).await {
        wayform_core::ThunkResult::Value(value) => value,
        wayform_core::ThunkResult::Error(err) => panic!("pipeline evaluation failed: {err}"),
    };
    assert_eq!(result, json!("ADA"));
}

/// MAP over an object-shaped input preserves object kind and keys, rather
/// than flattening them into a positional array.
#[tokio::test]
async fn map_over_object_container_preserves_keys() {
    let document = json!({
        "type": "JOURNEY",
        "code": "apply",
        "path": "/apply",
        "steps": [{
            "type": "STEP",
            "path": "/apply/scores",
            "projection": {
                "type": "EXPRESSION",
                "expressionType": "ITERATE",
                "iterateKind": "MAP",
                "input": {
                    "type": "EXPRESSION",
                    "expressionType": "REFERENCE",
                    "namespace": "data",
                    "key": "scores"
                },
                "template": {
                    "type": "EXPRESSION",
                    "expressionType": "FORMAT",
                    "template": "score=%1",
                    "arguments": [scope_reference(0, &["@item"])]
                }
            }
        }]
    });

    let artefact = Arc::new(compile_document(&document).unwrap());
    let evaluator = Evaluator::with_runtime_overlay(&artefact, EngineConfig::default(), Arc::new(FunctionRegistry::with_builtins()));
    let context = EvalContext::new(RequestData::default());

    let mut data = Map::new();
    data.insert("scores".to_string(), json!({"alice": 1, "bob": 2}));
    context.global().merge_data(&data);

    let iterate_id = artefact
        .find_where(|n| n.variant() == "ITERATE")
        .into_iter()
        .map(|(id, _)| id)
        .min()
        .unwrap();

    let result = match evaluator.invoke(&iterate_id, &context).await {
        wayform_core::ThunkResult::Value(value) => value,
        wayform_core::ThunkResult::Error(err) => panic!("map over object failed: {err}"),
    };
    assert_eq!(result, json!({"alice": "score=1", "bob": "score=2"}));
}
