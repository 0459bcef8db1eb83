//! Shared helpers used by several handler implementations: property access
//! on `PropertyMap`, the undefined-on-failure substitution policy, and
//! dot-path navigation over a resolved JSON value.

use serde_json::Value;

use wayform_core::{EngineError, NodeId, PropertyMap, PropertyValue, ThunkResult};

use crate::context::EvalContext;
use crate::evaluator::Evaluator;

/// Read a scalar string property.
pub(crate) fn scalar_str<'a>(properties: &'a PropertyMap, name: &str) -> Option<&'a str> {
    properties.get(name).and_then(PropertyValue::as_scalar).and_then(Value::as_str)
}

/// Read a scalar bool property, defaulting to `false` when absent or not a bool.
pub(crate) fn scalar_bool(properties: &PropertyMap, name: &str) -> bool {
    properties
        .get(name)
        .and_then(PropertyValue::as_scalar)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Read a scalar unsigned integer property.
pub(crate) fn scalar_usize(properties: &PropertyMap, name: &str) -> Option<usize> {
    properties
        .get(name)
        .and_then(PropertyValue::as_scalar)
        .and_then(Value::as_u64)
        .and_then(|value| usize::try_from(value).ok())
}

/// JS-style truthiness: everything is truthy except `null`, `false`, `0`,
/// `""`, and empty arrays/objects. Used by logic combinators and
/// conditionals, which treat an arbitrary evaluated value as a boolean
/// rather than requiring a strict `Value::Bool`.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(value) => *value,
        Value::Number(number) => number.as_f64().is_some_and(|value| value != 0.0),
        Value::String(value) => !value.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Invoke a single node and surface its error rather than substituting.
/// Used where the specification requires strict propagation (predicate
/// operands, pipeline input, transition `when`).
pub(crate) async fn invoke_value(invoker: &Evaluator, context: &EvalContext, id: &NodeId) -> Result<Value, EngineError> {
    match invoker.invoke(id, context).await {
        ThunkResult::Value(value) => Ok(value),
        ThunkResult::Error(err) => Err(err),
    }
}

/// Invoke a single node, substituting JSON `null` ("undefined") on error.
/// Used by structural/Format evaluation, which prefers partial output to an
/// aborted render.
pub(crate) async fn invoke_or_undefined(invoker: &Evaluator, context: &EvalContext, id: &NodeId) -> Value {
    match invoker.invoke(id, context).await {
        ThunkResult::Value(value) => value,
        ThunkResult::Error(_) => Value::Null,
    }
}

/// Resolve a property value to plain JSON, invoking any child node(s) it
/// references and substituting `null` for evaluation failures.
pub(crate) async fn resolve_property(invoker: &Evaluator, context: &EvalContext, value: &PropertyValue) -> Value {
    match value {
        PropertyValue::Scalar(value) => value.clone(),
        PropertyValue::Child(id) => invoke_or_undefined(invoker, context, id).await,
        PropertyValue::Children(ids) => {
            let mut out = Vec::with_capacity(ids.len());
            for id in ids {
                out.push(invoke_or_undefined(invoker, context, id).await);
            }
            Value::Array(out)
        }
    }
}

/// Navigate a JSON value by an already-resolved dot-path of string segments.
/// A missing intermediate segment (object key absent, array index absent or
/// out of range, or navigating into a scalar) yields `Value::Null`
/// ("undefined") rather than an error.
pub(crate) fn navigate<'a>(start: &'a Value, segments: impl IntoIterator<Item = &'a str>) -> Value {
    let mut current = start;
    for segment in segments {
        current = match current {
            Value::Object(map) => match map.get(segment) {
                Some(next) => next,
                None => return Value::Null,
            },
            Value::Array(items) => match segment.parse::<usize>().ok().and_then(|index| items.get(index)) {
                Some(next) => next,
                None => return Value::Null,
            },
            _ => return Value::Null,
        };
    }
    current.clone()
}

/// Split a dot-path string into its segments, ignoring empty segments from a
/// leading/trailing/doubled `.`.
pub(crate) fn split_path(raw: &str) -> Vec<&str> {
    raw.split('.').filter(|segment| !segment.is_empty()).collect()
}

/// Resolve a reference's `path` property (the segments after the namespace's
/// key) into owned string segments. A `path` given as a literal array of
/// strings/numbers is split further on `.` within each element; a `path`
/// given as a list of AST nodes (a fully dynamic path, e.g. `Answer(Format(...))`
/// style segment construction) has each node invoked first and the resulting
/// value stringified, per "dynamic path segments evaluated first". A
/// non-string dynamic segment stringifies numbers and otherwise yields no
/// segment (rather than panicking), matching "non-string dynamic segment
/// where string required ⇒ undefined" applied at the segment level.
pub(crate) async fn resolve_path_segments(invoker: &Evaluator, context: &EvalContext, value: Option<&PropertyValue>) -> Vec<String> {
    match value {
        None => Vec::new(),
        Some(PropertyValue::Scalar(Value::Array(items))) => items
            .iter()
            .flat_map(|item| match item {
                Value::String(segment) => split_path(segment).into_iter().map(str::to_string).collect(),
                Value::Number(number) => vec![number.to_string()],
                _ => Vec::new(),
            })
            .collect(),
        Some(PropertyValue::Scalar(Value::String(raw))) => split_path(raw).into_iter().map(str::to_string).collect(),
        Some(PropertyValue::Scalar(_)) => Vec::new(),
        Some(PropertyValue::Child(id)) => dynamic_segment(invoker, context, id).await.into_iter().collect(),
        Some(PropertyValue::Children(ids)) => {
            let mut segments = Vec::with_capacity(ids.len());
            for id in ids {
                segments.extend(dynamic_segment(invoker, context, id).await);
            }
            segments
        }
    }
}

async fn dynamic_segment(invoker: &Evaluator, context: &EvalContext, id: &NodeId) -> Option<String> {
    match invoke_or_undefined(invoker, context, id).await {
        Value::String(segment) => Some(segment),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Resolve (and memoize into `global.answers`) a field code's current
/// answer: an already-recorded answer wins, otherwise the matching POST
/// field seeds it. Shared by `AnswerLocalHandler`/`AnswerRemoteHandler` and
/// the `@self` reference case, which both resolve "this field's value" the
/// same way.
pub(crate) fn resolve_answer(code: &str, context: &EvalContext) -> Value {
    if let Some(existing) = context.global().answer(code) {
        return existing;
    }
    let from_post = context.request().post.get(code).map_or(Value::Null, |value| value.to_json());
    context.global().set_answer(code.to_string(), from_post.clone());
    from_post
}
