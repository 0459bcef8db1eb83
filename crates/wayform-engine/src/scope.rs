//! The scope stack: ordered, tagged frames pushed by iterator/predicate/
//! pipeline handlers so nested expressions can navigate back to an
//! enclosing `@item`, `@value`, or similar via `@scope` references.

use serde_json::{Map, Value};

/// The three frame tags the specification names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeFrameType {
    /// Pushed by MAP/FILTER/FIND for each element under evaluation.
    Iterator,
    /// Pushed while evaluating a predicate's operands.
    Predicate,
    /// Pushed by a pipeline while folding a transformer over `@value`.
    Pipeline,
}

/// One entry on the scope stack.
#[derive(Debug, Clone)]
pub struct ScopeFrame {
    frame_type: ScopeFrameType,
    values: Map<String, Value>,
}

impl ScopeFrame {
    /// Build an iterator frame carrying `@item`, and optionally `@index`/`@key`.
    #[must_use]
    pub fn iterator(item: Value, index: Option<i64>, key: Option<String>) -> Self {
        let mut values = Map::new();
        values.insert("@item".to_string(), item);
        if let Some(index) = index {
            values.insert("@index".to_string(), Value::from(index));
        }
        if let Some(key) = key {
            values.insert("@key".to_string(), Value::String(key));
        }
        Self {
            frame_type: ScopeFrameType::Iterator,
            values,
        }
    }

    /// Build a pipeline frame carrying `@value`.
    #[must_use]
    pub fn pipeline(value: Value) -> Self {
        let mut values = Map::new();
        values.insert("@value".to_string(), value);
        Self {
            frame_type: ScopeFrameType::Pipeline,
            values,
        }
    }

    /// Build a bare predicate frame (tag only, no bound values).
    #[must_use]
    pub fn predicate() -> Self {
        Self {
            frame_type: ScopeFrameType::Predicate,
            values: Map::new(),
        }
    }

    /// This frame's tag.
    #[must_use]
    pub const fn frame_type(&self) -> ScopeFrameType {
        self.frame_type
    }

    /// Look up a bound value (e.g. `"@item"`, `"@value"`) within this frame.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// The frame's bound values (`@item`/`@index`/`@key`, or `@value`) as a
    /// plain JSON object, for `@scope` references that navigate into the
    /// frame itself rather than just its `@item`.
    #[must_use]
    pub fn as_value(&self) -> Value {
        Value::Object(self.values.clone())
    }
}

/// An ordered, append-only-within-an-invocation stack of scope frames.
#[derive(Debug, Clone, Default)]
pub struct ScopeStack {
    frames: Vec<ScopeFrame>,
}

impl ScopeStack {
    /// An empty scope stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a frame. Callers must pop it on every exit path.
    pub fn push(&mut self, frame: ScopeFrame) {
        self.frames.push(frame);
    }

    /// Pop the most recently pushed frame.
    pub fn pop(&mut self) {
        self.frames.pop();
    }

    /// The innermost frame, if any.
    #[must_use]
    pub fn current(&self) -> Option<&ScopeFrame> {
        self.frames.last()
    }

    /// Navigate to the iterator frame `level` steps out from the innermost
    /// one, counting only frames tagged `Iterator` (predicate/pipeline
    /// frames are transparent to `@scope` navigation).
    #[must_use]
    pub fn iterator_frame_at_level(&self, level: usize) -> Option<&ScopeFrame> {
        self.frames
            .iter()
            .rev()
            .filter(|frame| frame.frame_type() == ScopeFrameType::Iterator)
            .nth(level)
    }

    /// A deep clone used to give each top-level `invoke` call an isolated
    /// view of the scope, so concurrent evaluations sharing one context
    /// don't observe each other's pushes.
    #[must_use]
    pub fn isolated_clone(&self) -> Self {
        self.clone()
    }

    /// Number of frames currently on the stack.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_reference_counts_only_iterator_frames() {
        let mut scope = ScopeStack::new();
        scope.push(ScopeFrame::iterator(Value::from(1), Some(0), None));
        scope.push(ScopeFrame::predicate());
        scope.push(ScopeFrame::iterator(Value::from(2), Some(0), None));

        let level0 = scope.iterator_frame_at_level(0).unwrap();
        assert_eq!(level0.get("@item"), Some(&Value::from(2)));

        let level1 = scope.iterator_frame_at_level(1).unwrap();
        assert_eq!(level1.get("@item"), Some(&Value::from(1)));
    }

    #[test]
    fn pop_restores_previous_frame_view() {
        let mut scope = ScopeStack::new();
        scope.push(ScopeFrame::pipeline(Value::from("a")));
        scope.pop();
        assert!(scope.current().is_none());
    }
}
