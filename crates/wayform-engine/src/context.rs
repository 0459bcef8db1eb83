//! The evaluation context: request data, the mutable `global.answers` /
//! `global.data` maps, and the scope stack a single request's evaluator
//! hands to every handler invocation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use serde_json::Value;

use crate::scope::{ScopeFrame, ScopeFrameType, ScopeStack};

/// A single request/query/params value: either one string or a repeated
/// parameter's list of strings, matching the request data surface in §6.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestValue {
    /// A single value.
    Single(String),
    /// A repeated parameter's values, in submission order.
    Multi(Vec<String>),
}

impl RequestValue {
    /// This value as JSON, the shape a REFERENCE handler resolves to.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Single(value) => Value::String(value.clone()),
            Self::Multi(values) => Value::Array(values.iter().cloned().map(Value::String).collect()),
        }
    }
}

/// Framework-supplied request data for one GET/POST, matching
/// `EvaluatorRequestData` in §4.5/§4.6.
#[derive(Debug, Clone, Default)]
pub struct RequestData {
    /// The HTTP method (`"GET"` or `"POST"`, typically).
    pub method: String,
    /// The request path.
    pub path: String,
    /// POST body fields.
    pub post: HashMap<String, RequestValue>,
    /// Query string parameters.
    pub query: HashMap<String, RequestValue>,
    /// Path parameters.
    pub params: HashMap<String, RequestValue>,
    /// Opaque session data, when the host framework provides a session.
    pub session: Option<Value>,
    /// Opaque app/request state, when the host framework provides one.
    pub state: Option<Value>,
}

/// One field's resolved answer: the current value plus any mutations
/// recorded by effects during this request (§3's `{current, mutations}`
/// shape for `global.answers`).
#[derive(Debug, Clone, Default)]
pub struct AnswerSlot {
    /// The field's current value, as last resolved or overwritten.
    pub current: Option<Value>,
    /// Values an effect has written via `setAnswer` this request, oldest first.
    pub mutations: Vec<Value>,
}

/// The mutable state shared by every invocation within one request: the
/// answer map and the static `data` overlay built up by the lifecycle
/// controller's ancestor walk. Shared (not cloned) across scope-isolated
/// context derivations, since §5 states these are request-scoped, not
/// invocation-scoped.
#[derive(Debug, Default)]
pub struct GlobalState {
    answers: RwLock<HashMap<String, AnswerSlot>>,
    data: RwLock<serde_json::Map<String, Value>>,
}

impl GlobalState {
    /// An empty global state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The current value for a field code, if any answer has been resolved
    /// or set.
    #[must_use]
    pub fn answer(&self, code: &str) -> Option<Value> {
        let guard = self.answers.read().unwrap_or_else(|poison| poison.into_inner());
        guard.get(code).and_then(|slot| slot.current.clone())
    }

    /// Record a resolved or effect-written answer for a field code.
    pub fn set_answer(&self, code: impl Into<String>, value: Value) {
        let mut guard = self.answers.write().unwrap_or_else(|poison| poison.into_inner());
        let slot = guard.entry(code.into()).or_default();
        slot.mutations.push(value.clone());
        slot.current = Some(value);
    }

    /// Every field code with a recorded answer.
    #[must_use]
    pub fn answer_codes(&self) -> Vec<String> {
        let guard = self.answers.read().unwrap_or_else(|poison| poison.into_inner());
        guard.keys().cloned().collect()
    }

    /// All current answers, as a plain JSON object.
    #[must_use]
    pub fn answers_snapshot(&self) -> serde_json::Map<String, Value> {
        let guard = self.answers.read().unwrap_or_else(|poison| poison.into_inner());
        guard
            .iter()
            .filter_map(|(code, slot)| slot.current.clone().map(|value| (code.clone(), value)))
            .collect()
    }

    /// A top-level `data` property, if set by a journey/step's static `data`
    /// or overwritten by an effect's `setData`.
    #[must_use]
    pub fn data(&self, key: &str) -> Option<Value> {
        let guard = self.data.read().unwrap_or_else(|poison| poison.into_inner());
        guard.get(key).cloned()
    }

    /// Shallow-merge a static `data` mapping into global data, with incoming
    /// keys overriding existing ones. Used by the lifecycle controller's
    /// per-ancestor merge (§4.6 step 3a).
    pub fn merge_data(&self, incoming: &serde_json::Map<String, Value>) {
        let mut guard = self.data.write().unwrap_or_else(|poison| poison.into_inner());
        for (key, value) in incoming {
            guard.insert(key.clone(), value.clone());
        }
    }

    /// Set a single top-level data key, used by `setData` effects.
    pub fn set_data(&self, key: impl Into<String>, value: Value) {
        let mut guard = self.data.write().unwrap_or_else(|poison| poison.into_inner());
        guard.insert(key.into(), value);
    }

    /// All current data, as a plain JSON object.
    #[must_use]
    pub fn data_snapshot(&self) -> serde_json::Map<String, Value> {
        let guard = self.data.read().unwrap_or_else(|poison| poison.into_inner());
        guard.clone()
    }
}

/// The per-invocation evaluation context: request data and global state are
/// shared (via `Arc`) across every isolated derivation of a request's
/// context; the scope stack is the one thing `with_isolated_scope` forks so
/// concurrent invocations don't observe each other's pushed frames.
#[derive(Clone)]
pub struct EvalContext {
    request: Arc<RequestData>,
    global: Arc<GlobalState>,
    scope: Arc<Mutex<ScopeStack>>,
}

impl EvalContext {
    /// Build a fresh context for a request, with an empty scope stack.
    #[must_use]
    pub fn new(request: RequestData) -> Self {
        Self {
            request: Arc::new(request),
            global: Arc::new(GlobalState::new()),
            scope: Arc::new(Mutex::new(ScopeStack::new())),
        }
    }

    /// The request data this context was built from.
    #[must_use]
    pub fn request(&self) -> &RequestData {
        &self.request
    }

    /// The shared mutable global state (answers, data) for this request.
    #[must_use]
    pub fn global(&self) -> &GlobalState {
        &self.global
    }

    /// Derive a context sharing this one's request/global state but with an
    /// independent copy of the current scope stack, per §4.5 step 2. Handlers
    /// invoked through the derived context may push/pop frames without the
    /// caller (or concurrent siblings) observing the mutation.
    #[must_use]
    pub fn with_isolated_scope(&self) -> Self {
        let snapshot = self.scope.lock().unwrap_or_else(|poison| poison.into_inner()).clone();
        Self {
            request: Arc::clone(&self.request),
            global: Arc::clone(&self.global),
            scope: Arc::new(Mutex::new(snapshot)),
        }
    }

    /// Push a scope frame. Callers must pop it on every exit path, including
    /// error paths (§5's scope discipline).
    pub fn push_scope(&self, frame: ScopeFrame) {
        self.scope.lock().unwrap_or_else(|poison| poison.into_inner()).push(frame);
    }

    /// Pop the most recently pushed scope frame.
    pub fn pop_scope(&self) {
        self.scope.lock().unwrap_or_else(|poison| poison.into_inner()).pop();
    }

    /// The iterator frame `level` steps out from the innermost one.
    #[must_use]
    pub fn iterator_frame_at_level(&self, level: usize) -> Option<ScopeFrame> {
        self.scope
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .iterator_frame_at_level(level)
            .cloned()
    }

    /// The innermost scope frame's tag, if any frame is pushed.
    #[must_use]
    pub fn current_frame_type(&self) -> Option<ScopeFrameType> {
        self.scope
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .current()
            .map(ScopeFrame::frame_type)
    }

    /// A bound value (e.g. `"@value"`) from the innermost scope frame.
    #[must_use]
    pub fn current_frame_value(&self, key: &str) -> Option<Value> {
        self.scope
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .current()
            .and_then(|frame| frame.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolated_scope_does_not_leak_pushes_back_to_parent() {
        let ctx = EvalContext::new(RequestData::default());
        let child = ctx.with_isolated_scope();
        child.push_scope(ScopeFrame::pipeline(Value::from(1)));
        assert!(ctx.current_frame_type().is_none());
        assert_eq!(child.current_frame_value("@value"), Some(Value::from(1)));
    }

    #[test]
    fn global_state_is_shared_across_isolated_derivations() {
        let ctx = EvalContext::new(RequestData::default());
        let child = ctx.with_isolated_scope();
        child.global().set_answer("name", Value::String("Alice".to_string()));
        assert_eq!(ctx.global().answer("name"), Some(Value::String("Alice".to_string())));
    }
}
