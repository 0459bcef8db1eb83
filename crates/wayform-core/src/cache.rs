//! The evaluator's memoization cache: a `ThunkResult` sum type per node plus
//! a monotonically increasing version counter used to detect mid-evaluation
//! invalidation (§5's retry loop compares versions before/after an await).

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::EngineError;
use crate::ids::NodeId;

/// The result of evaluating a node: exactly one of a value or an error.
/// Represented as an enum (rather than `Result<T, E>` wrapped in metadata)
/// so the sum-type invariant in the specification's testable properties is
/// structurally enforced rather than merely conventional.
#[derive(Debug, Clone)]
pub enum ThunkResult {
    /// The node evaluated successfully to this value.
    Value(serde_json::Value),
    /// The node's evaluation failed with this error.
    Error(EngineError),
}

impl ThunkResult {
    /// Whether this result is a value.
    #[must_use]
    pub const fn is_value(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    /// Whether this result is an error.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// The value, if this is `Value`.
    #[must_use]
    pub const fn value(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::Error(_) => None,
        }
    }

    /// The error, if this is `Error`.
    #[must_use]
    pub const fn error(&self) -> Option<&EngineError> {
        match self {
            Self::Value(_) => None,
            Self::Error(err) => Some(err),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result: Option<ThunkResult>,
    version: u64,
}

impl Default for CacheEntry {
    fn default() -> Self {
        Self {
            result: None,
            version: 0,
        }
    }
}

/// A per-request memoization cache. Fresh for every evaluator instance.
#[derive(Debug, Default)]
pub struct Cache {
    entries: RwLock<HashMap<NodeId, CacheEntry>>,
}

impl Cache {
    /// An empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached result for `id`, if any evaluation has completed and not
    /// since been invalidated.
    #[must_use]
    pub fn get(&self, id: &NodeId) -> Option<ThunkResult> {
        let guard = self.entries.read().unwrap_or_else(|poison| poison.into_inner());
        guard.get(id).and_then(|entry| entry.result.clone())
    }

    /// The node's current version counter (0 if never touched).
    #[must_use]
    pub fn version(&self, id: &NodeId) -> u64 {
        let guard = self.entries.read().unwrap_or_else(|poison| poison.into_inner());
        guard.get(id).map_or(0, |entry| entry.version)
    }

    /// Record a result for `id`. Does not change the version counter:
    /// versions only advance on `delete`/`invalidate`, since a plain write
    /// is the expected completion of an evaluation, not an invalidation.
    pub fn set(&self, id: NodeId, result: ThunkResult) {
        let mut guard = self.entries.write().unwrap_or_else(|poison| poison.into_inner());
        let entry = guard.entry(id).or_default();
        entry.result = Some(result);
    }

    /// Invalidate `id`: clears any cached result and bumps the version
    /// counter so in-flight evaluators that captured the prior version can
    /// detect the change and retry.
    pub fn delete(&self, id: &NodeId) {
        let mut guard = self.entries.write().unwrap_or_else(|poison| poison.into_inner());
        let entry = guard.entry(id.clone()).or_default();
        entry.result = None;
        entry.version = entry.version.saturating_add(1);
    }

    /// Whether `id` currently has a cached result.
    #[must_use]
    pub fn has(&self, id: &NodeId) -> bool {
        let guard = self.entries.read().unwrap_or_else(|poison| poison.into_inner());
        guard.get(id).is_some_and(|entry| entry.result.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::NodeCategory;

    fn id(n: u64) -> NodeId {
        NodeId::new(NodeCategory::CompileAst, n)
    }

    #[test]
    fn set_then_get_round_trips_value() {
        let cache = Cache::new();
        cache.set(id(1), ThunkResult::Value(serde_json::json!("hello")));
        let result = cache.get(&id(1)).unwrap();
        assert!(result.is_value());
        assert_eq!(result.value(), Some(&serde_json::json!("hello")));
    }

    #[test]
    fn delete_bumps_version_and_clears_result() {
        let cache = Cache::new();
        cache.set(id(1), ThunkResult::Value(serde_json::json!(1)));
        assert_eq!(cache.version(&id(1)), 0);

        cache.delete(&id(1));
        assert_eq!(cache.version(&id(1)), 1);
        assert!(!cache.has(&id(1)));

        cache.delete(&id(1));
        assert_eq!(cache.version(&id(1)), 2);
    }

    #[test]
    fn thunk_result_is_a_sum() {
        let value = ThunkResult::Value(serde_json::json!(null));
        let error = ThunkResult::Error(EngineError::unknown("x"));
        assert!(value.is_value() && !value.is_error());
        assert!(error.is_error() && !error.is_value());
    }
}
