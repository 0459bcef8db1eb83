//! Evaluation semantics for the wayform form engine: the request-scoped
//! evaluator, every node kind's handler, the function registry, the request
//! lifecycle controller, and the host adapter surface.
//!
//! Compile-time scaffolding (node identity, the AST shape, registries, the
//! dependency graph, the memoization cache) lives in `wayform-core`, which
//! this crate depends on.

pub mod adapter;
pub mod compile;
pub mod context;
pub mod evaluator;
pub mod functions;
pub mod handler;
mod handlers;
pub mod hooks;
pub mod lifecycle;
pub mod scope;

pub use compile::{Artefact, compile as compile_document};
pub use context::{EvalContext, GlobalState, RequestData, RequestValue};
pub use evaluator::Evaluator;
pub use functions::{FunctionImpl, FunctionRegistry};
pub use handler::Handler;
pub use lifecycle::{LifecycleController, RenderContext, RequestOutcome};
pub use scope::{ScopeFrame, ScopeFrameType, ScopeStack};
