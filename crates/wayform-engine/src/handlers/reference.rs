//! The REFERENCE expression handler: resolves a namespace-tagged path
//! (`post`/`query`/`params`/`data`/`answers`/`@scope`/`@value`/`@self`)
//! against the request, the global answer/data maps, the scope stack, the
//! innermost pipeline frame, or the enclosing field, then navigates any
//! remaining dot-path segments.

use async_trait::async_trait;
use serde_json::Value;

use wayform_core::{AstNode, EngineError, NodeId, PropertyValue, ReadRegistry, ThunkResult};

use crate::context::EvalContext;
use crate::evaluator::Evaluator;
use crate::handler::Handler;
use crate::hooks::RuntimeHooks;

use super::support::{navigate, resolve_answer, resolve_path_segments, scalar_bool, scalar_str, scalar_usize};

/// The namespace a REFERENCE resolves its base value against.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Namespace {
    Post,
    Query,
    Params,
    Data,
    Answers { remote: bool },
    Scope { level: usize },
    PipelineValue,
    SelfField,
}

fn parse_namespace(node: &AstNode) -> Result<Namespace, EngineError> {
    let raw = scalar_str(node.properties(), "namespace")
        .ok_or_else(|| EngineError::evaluation_failed(format!("{}: REFERENCE missing 'namespace'", node.id())))?;
    match raw {
        "post" => Ok(Namespace::Post),
        "query" => Ok(Namespace::Query),
        "params" => Ok(Namespace::Params),
        "data" => Ok(Namespace::Data),
        "answers" => Ok(Namespace::Answers {
            remote: scalar_bool(node.properties(), "remote"),
        }),
        "@scope" => {
            let level = scalar_usize(node.properties(), "level")
                .ok_or_else(|| EngineError::evaluation_failed(format!("{}: @scope REFERENCE missing 'level'", node.id())))?;
            Ok(Namespace::Scope { level })
        }
        "@value" => Ok(Namespace::PipelineValue),
        "@self" => Ok(Namespace::SelfField),
        other => Err(EngineError::evaluation_failed(format!("{}: unknown reference namespace '{other}'", node.id()))),
    }
}

#[derive(Debug)]
pub(crate) struct ReferenceHandler {
    namespace: Namespace,
    key: Option<String>,
}

impl ReferenceHandler {
    pub(crate) fn new(node: &AstNode) -> Result<Self, EngineError> {
        Ok(Self {
            namespace: parse_namespace(node)?,
            key: scalar_str(node.properties(), "key").map(str::to_string),
        })
    }
}

#[async_trait]
impl Handler for ReferenceHandler {
    async fn evaluate(&self, id: &NodeId, context: &EvalContext, invoker: &Evaluator, _hooks: &RuntimeHooks<'_>) -> ThunkResult {
        let node = match invoker.nodes.get(id) {
            Some(node) => node,
            None => return ThunkResult::Error(EngineError::lookup_failed(format!("{id}: reference node not registered"))),
        };
        let path = resolve_path_segments(invoker, context, node.properties().get("path")).await;

        if let Namespace::Scope { level } = self.namespace {
            return ThunkResult::Value(Self::resolve_scope(context, level, &path));
        }
        if self.namespace == Namespace::PipelineValue {
            return ThunkResult::Value(Self::resolve_pipeline_value(context, &path));
        }

        let base = match &self.namespace {
            Namespace::Post | Namespace::Query | Namespace::Params | Namespace::Data => {
                self.resolve_request_namespace(invoker, context).await
            }
            Namespace::Answers { remote } => self.resolve_answer_namespace(invoker, context, *remote).await,
            Namespace::Scope { .. } | Namespace::PipelineValue => unreachable!("handled above"),
            Namespace::SelfField => Ok(Self::resolve_self(invoker, context, id)),
        };

        match base {
            Ok(value) => {
                let segments: Vec<&str> = path.iter().map(String::as_str).collect();
                ThunkResult::Value(navigate(&value, segments))
            }
            Err(err) => {
                if invoker.config().strict_type_mismatch {
                    ThunkResult::Error(err)
                } else {
                    ThunkResult::Value(Value::Null)
                }
            }
        }
    }

    fn compute_is_async(&self, dependency_is_async: &[bool]) -> bool {
        dependency_is_async.iter().any(|value| *value)
    }
}

impl ReferenceHandler {
    fn namespace_tag(&self) -> &'static str {
        match self.namespace {
            Namespace::Post => "post",
            Namespace::Query => "query",
            Namespace::Params => "params",
            Namespace::Data => "data",
            Namespace::Answers { .. } | Namespace::Scope { .. } | Namespace::PipelineValue | Namespace::SelfField => {
                unreachable!("handled separately")
            }
        }
    }

    async fn resolve_request_namespace(&self, invoker: &Evaluator, context: &EvalContext) -> Result<Value, EngineError> {
        let key = self
            .key
            .as_deref()
            .ok_or_else(|| EngineError::evaluation_failed("reference missing 'key'"))?;
        if let Some(pseudo) = invoker.pseudo_for(self.namespace_tag(), key) {
            return match invoker.invoke(&pseudo, context).await {
                ThunkResult::Value(value) => Ok(value),
                ThunkResult::Error(err) => Err(err),
            };
        }
        // No compile-time pseudo was generated for this (namespace, key) pair
        // (e.g. a runtime-created reference); fall back to reading the
        // request/global state directly, per the handler contract's
        // "or directly from request/context for paths with no registered
        // pseudo node" clause.
        Ok(match self.namespace {
            Namespace::Post => context.request().post.get(key).map_or(Value::Null, |v| v.to_json()),
            Namespace::Query => context.request().query.get(key).map_or(Value::Null, |v| v.to_json()),
            Namespace::Params => context.request().params.get(key).map_or(Value::Null, |v| v.to_json()),
            Namespace::Data => context.global().data(key).unwrap_or(Value::Null),
            Namespace::Answers { .. } | Namespace::Scope { .. } | Namespace::PipelineValue | Namespace::SelfField => {
                unreachable!("handled separately")
            }
        })
    }

    async fn resolve_answer_namespace(&self, invoker: &Evaluator, context: &EvalContext, _remote: bool) -> Result<Value, EngineError> {
        let key = self
            .key
            .as_deref()
            .ok_or_else(|| EngineError::evaluation_failed("answer reference missing 'key'"))?;
        if let Some(pseudo) = invoker.pseudo_for("answers", key) {
            return match invoker.invoke(&pseudo, context).await {
                ThunkResult::Value(value) => Ok(value),
                ThunkResult::Error(err) => Err(err),
            };
        }
        Ok(resolve_answer(key, context))
    }

    /// Empty `path` resolves to the frame's `@item`; otherwise the frame
    /// itself (`{@item, @index, @key}`) is navigated by `path`, so
    /// `["@index"]`/`["@key"]` reach the iteration index/key and
    /// `["@item", ...]` reaches into the item's own fields.
    fn resolve_scope(context: &EvalContext, level: usize, path: &[String]) -> Value {
        let Some(frame) = context.iterator_frame_at_level(level) else {
            return Value::Null;
        };
        if path.is_empty() {
            return frame.get("@item").cloned().unwrap_or(Value::Null);
        }
        let segments: Vec<&str> = path.iter().map(String::as_str).collect();
        navigate(&frame.as_value(), segments)
    }

    /// Empty `path` resolves to the innermost pipeline frame's `@value`
    /// itself; a non-empty `path` navigates into it. `None` (no pipeline
    /// frame currently pushed) resolves to `Value::Null`, same as any other
    /// out-of-scope reference.
    fn resolve_pipeline_value(context: &EvalContext, path: &[String]) -> Value {
        let Some(value) = context.current_frame_value("@value") else {
            return Value::Null;
        };
        if path.is_empty() {
            return value;
        }
        let segments: Vec<&str> = path.iter().map(String::as_str).collect();
        navigate(&value, segments)
    }

    fn resolve_self(invoker: &Evaluator, context: &EvalContext, id: &NodeId) -> Value {
        match invoker.enclosing_field_code(id) {
            Some(code) => resolve_answer(&code, context),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayform_core::{NodeType, PropertyMap};

    fn reference_node(namespace: &str, key: Option<&str>) -> AstNode {
        let mut props = PropertyMap::new();
        props.insert("namespace", PropertyValue::Scalar(Value::String(namespace.to_string())));
        if let Some(key) = key {
            props.insert("key", PropertyValue::Scalar(Value::String(key.to_string())));
        }
        AstNode::new(NodeId::new_for_test("compile_ast", 0), NodeType::Expression, "REFERENCE", props)
    }

    #[test]
    fn parses_post_namespace() {
        let node = reference_node("post", Some("name"));
        let namespace = parse_namespace(&node).unwrap();
        assert_eq!(namespace, Namespace::Post);
    }

    #[test]
    fn scope_namespace_requires_level() {
        let node = reference_node("@scope", None);
        assert!(parse_namespace(&node).is_err());
    }

    #[test]
    fn parses_pipeline_value_namespace() {
        let node = reference_node("@value", None);
        let namespace = parse_namespace(&node).unwrap();
        assert_eq!(namespace, Namespace::PipelineValue);
    }

    #[test]
    fn unknown_namespace_is_rejected() {
        let node = reference_node("carrier-pigeon", Some("x"));
        assert!(parse_namespace(&node).is_err());
    }
}
