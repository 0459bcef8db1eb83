//! Compile-time scaffolding for the wayform form engine: node identity, the
//! AST node shape, registries (plain and overlay), the dependency graph, the
//! memoization cache, the error taxonomy, and the parse/wiring halves of the
//! compilation pipeline.
//!
//! Evaluation semantics (handlers, the evaluator, the lifecycle controller)
//! live in `wayform-engine`, which depends on this crate.

pub mod ast;
pub mod cache;
pub mod compiler;
pub mod error;
pub mod graph;
pub mod ids;
pub mod metadata;
pub mod registry;
pub mod wiring;

pub use ast::{AstNode, NodeType, PropertyMap, PropertyValue};
pub use cache::{Cache, ThunkResult};
pub use compiler::{
    ParsedProgram, PseudoKind, generate_pseudo_nodes, mark_step_descendants, parse_document, parse_runtime_node,
};
pub use error::{CompileIssue, EngineError, Result};
pub use graph::{DependencyGraph, Edge, EdgeKind, OverlayGraph};
pub use ids::{IdAllocator, NodeCategory, NodeId};
pub use metadata::NodeMetadata;
pub use registry::{OverlayRegistry, ReadRegistry, Registry, WriteRegistry};
