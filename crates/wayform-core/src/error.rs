//! Error taxonomy for compilation, registration, and evaluation failures.

use crate::ids::NodeId;

/// Convenience alias used throughout the crate.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// A single compilation problem, collected into `EngineError::Compilation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileIssue {
    /// Node the issue concerns, when one is identifiable.
    pub node: Option<NodeId>,
    /// Human-readable description.
    pub message: String,
}

impl CompileIssue {
    /// Build an issue tied to a specific node.
    #[must_use]
    pub fn at(node: NodeId, message: impl Into<String>) -> Self {
        Self {
            node: Some(node),
            message: message.into(),
        }
    }

    /// Build an issue with no specific node (e.g. a malformed top-level document).
    #[must_use]
    pub fn global(message: impl Into<String>) -> Self {
        Self {
            node: None,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for CompileIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.node {
            Some(node) => write!(f, "{node}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// The engine's single error enum. Every kind named in the specification's
/// error taxonomy has a matching variant here.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// No handler is registered for a node, or a duplicate registration was
    /// attempted against an identity that is already taken.
    #[error("handler registry error: {0}")]
    HandlerRegistry(String),

    /// A reference resolved to a missing pseudo node or path segment where
    /// strict resolution was requested.
    #[error("lookup failed: {0}")]
    LookupFailed(String),

    /// A value's shape was incompatible with what a strict handler required
    /// (for example, invoking an async handler through the sync fast path).
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// A handler raised during evaluation, including retry exhaustion.
    #[error("evaluation failed: {0}")]
    EvaluationFailed(String),

    /// Reserved for disallowed namespace/segment access.
    #[error("security violation: {0}")]
    Security(String),

    /// All compilation problems detected in one pass.
    #[error("compilation failed with {} issue(s): {}", .0.len(), render_issues(.0))]
    Compilation(Vec<CompileIssue>),

    /// Fallback for conditions that don't fit another variant.
    #[error("unknown engine error: {0}")]
    Unknown(String),
}

fn render_issues(issues: &[CompileIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl EngineError {
    /// Build a [`EngineError::HandlerRegistry`].
    #[must_use]
    pub fn handler_registry(msg: impl Into<String>) -> Self {
        Self::HandlerRegistry(msg.into())
    }

    /// Build a [`EngineError::LookupFailed`].
    #[must_use]
    pub fn lookup_failed(msg: impl Into<String>) -> Self {
        Self::LookupFailed(msg.into())
    }

    /// Build a [`EngineError::TypeMismatch`].
    #[must_use]
    pub fn type_mismatch(msg: impl Into<String>) -> Self {
        Self::TypeMismatch(msg.into())
    }

    /// Build a [`EngineError::EvaluationFailed`].
    #[must_use]
    pub fn evaluation_failed(msg: impl Into<String>) -> Self {
        Self::EvaluationFailed(msg.into())
    }

    /// Build the specific `maxRetriesExceeded` evaluation failure.
    #[must_use]
    pub fn max_retries_exceeded(node: &NodeId, attempts: u32) -> Self {
        Self::EvaluationFailed(format!(
            "maxRetriesExceeded: node {node} did not stabilize after {attempts} attempt(s)"
        ))
    }

    /// Build a [`EngineError::Security`].
    #[must_use]
    pub fn security(msg: impl Into<String>) -> Self {
        Self::Security(msg.into())
    }

    /// Build a [`EngineError::Unknown`].
    #[must_use]
    pub fn unknown(msg: impl Into<String>) -> Self {
        Self::Unknown(msg.into())
    }

    /// Aggregate compilation issues into a single error. Panics in debug if
    /// called with an empty vector, since that indicates a logic error in
    /// the caller (an aggregate error with nothing to report).
    #[must_use]
    pub fn compilation(issues: Vec<CompileIssue>) -> Self {
        Self::Compilation(issues)
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Unknown(format!("json error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compilation_error_renders_all_issues() {
        let err = EngineError::compilation(vec![
            CompileIssue::global("bad document"),
            CompileIssue::at(NodeId::new_for_test("compile_ast", 1), "missing path"),
        ]);
        let rendered = err.to_string();
        assert!(rendered.contains("bad document"));
        assert!(rendered.contains("missing path"));
    }
}
