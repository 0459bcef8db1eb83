//! Node identity: `<category>:<monotonic-integer>`, allocated by a per-program
//! sequence. Categories distinguish compile-time nodes from nodes created at
//! runtime by iterator expansion, and structural nodes from pseudo nodes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// The four identity categories named by the specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeCategory {
    /// AST node produced directly by compilation.
    CompileAst,
    /// Pseudo node (POST/QUERY/PARAMS/DATA/ANSWER_*) produced by compilation.
    CompilePseudo,
    /// AST node created at runtime by an iterator handler.
    RuntimeAst,
    /// Pseudo node created at runtime.
    RuntimePseudo,
}

impl NodeCategory {
    /// The wire prefix used in a `NodeId`'s string form.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::CompileAst => "compile_ast",
            Self::CompilePseudo => "compile_pseudo",
            Self::RuntimeAst => "runtime_ast",
            Self::RuntimePseudo => "runtime_pseudo",
        }
    }

    /// Whether this category was allocated after compilation finished.
    #[must_use]
    pub const fn is_runtime(self) -> bool {
        matches!(self, Self::RuntimeAst | Self::RuntimePseudo)
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "compile_ast" => Some(Self::CompileAst),
            "compile_pseudo" => Some(Self::CompilePseudo),
            "runtime_ast" => Some(Self::RuntimeAst),
            "runtime_pseudo" => Some(Self::RuntimePseudo),
            _ => None,
        }
    }
}

/// An opaque, program-unique node identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId {
    category: NodeCategory,
    sequence: u64,
}

impl NodeId {
    /// Construct directly from a category and sequence number. Exposed for
    /// allocators; handler and test code should prefer `IdAllocator::next`.
    #[must_use]
    pub const fn new(category: NodeCategory, sequence: u64) -> Self {
        Self { category, sequence }
    }

    /// Build an identity from a prefix string, for test fixtures and fixed
    /// well-known pseudo identities.
    #[must_use]
    pub fn new_for_test(prefix: &str, sequence: u64) -> Self {
        let category = NodeCategory::from_prefix(prefix).unwrap_or(NodeCategory::CompileAst);
        Self::new(category, sequence)
    }

    /// This node's category.
    #[must_use]
    pub const fn category(&self) -> NodeCategory {
        self.category
    }

    /// Whether this identity was allocated at runtime (by iterator expansion)
    /// rather than at compile time.
    #[must_use]
    pub const fn is_runtime(&self) -> bool {
        self.category.is_runtime()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category.prefix(), self.sequence)
    }
}

impl TryFrom<String> for NodeId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let (prefix, seq) = value
            .rsplit_once(':')
            .ok_or_else(|| format!("malformed node id '{value}'"))?;
        let category = NodeCategory::from_prefix(prefix)
            .ok_or_else(|| format!("unknown node id category '{prefix}'"))?;
        let sequence: u64 = seq
            .parse()
            .map_err(|_err| format!("malformed node id sequence in '{value}'"))?;
        Ok(Self::new(category, sequence))
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.to_string()
    }
}

/// Allocates unique, monotonically increasing identities within a category.
/// One allocator instance is shared by the compiler; a second, independent
/// allocator (seeded at zero) is used by a request's runtime overlay so that
/// runtime ids never collide with each other within that request.
#[derive(Debug, Default)]
pub struct IdAllocator {
    compile_ast: AtomicU64,
    compile_pseudo: AtomicU64,
    runtime_ast: AtomicU64,
    runtime_pseudo: AtomicU64,
}

impl IdAllocator {
    /// Create a fresh allocator with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next identity in the given category.
    pub fn next(&self, category: NodeCategory) -> NodeId {
        let counter = match category {
            NodeCategory::CompileAst => &self.compile_ast,
            NodeCategory::CompilePseudo => &self.compile_pseudo,
            NodeCategory::RuntimeAst => &self.runtime_ast,
            NodeCategory::RuntimePseudo => &self.runtime_pseudo,
        };
        let sequence = counter.fetch_add(1, Ordering::Relaxed);
        NodeId::new(category, sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_within_a_category_are_unique_and_monotonic() {
        let allocator = IdAllocator::new();
        let a = allocator.next(NodeCategory::CompileAst);
        let b = allocator.next(NodeCategory::CompileAst);
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "compile_ast:0");
        assert_eq!(b.to_string(), "compile_ast:1");
    }

    #[test]
    fn display_and_parse_round_trip() {
        let id = NodeId::new(NodeCategory::RuntimePseudo, 42);
        let rendered = id.to_string();
        let parsed = NodeId::try_from(rendered).unwrap();
        assert_eq!(parsed, id);
        assert!(parsed.is_runtime());
    }

    #[test]
    fn categories_are_independent_sequences() {
        let allocator = IdAllocator::new();
        let ast = allocator.next(NodeCategory::CompileAst);
        let pseudo = allocator.next(NodeCategory::CompilePseudo);
        assert_eq!(ast.to_string(), "compile_ast:0");
        assert_eq!(pseudo.to_string(), "compile_pseudo:0");
    }
}
