//! The handler contract every compiled AST node dispatches through at
//! evaluation time. Mirrors the teacher's hook-chain shape (one trait, a
//! registry keyed by identity, async dispatch by default) but keyed by
//! `NodeId` rather than a named hook point, and with exactly one handler per
//! node rather than a priority chain.

use async_trait::async_trait;

use wayform_core::ThunkResult;

use crate::context::EvalContext;
use crate::evaluator::Evaluator;
use crate::hooks::RuntimeHooks;

/// A node's evaluation behavior. Every compiled node variant (REFERENCE,
/// FORMAT, AND, STEP, SUBMIT, ...) has exactly one `Handler` impl registered
/// against its id.
///
/// Most handlers only need `evaluate`; `evaluate_sync` is a narrow fast path
/// for nodes statically known not to need the scheduler (constants, scalar
/// reads) so the evaluator can skip scope-stack bookkeeping and the in-flight
/// dedup map for the overwhelming majority of invocations in a typical form.
#[async_trait]
pub trait Handler: Send + Sync + std::fmt::Debug {
    /// Evaluate this node, given the shared cache already checked by the
    /// caller, the request's context, the evaluator (to resolve this node's
    /// dependencies via `invoke`), and the hooks surface iterator/conditional
    /// handlers use to materialize runtime nodes.
    async fn evaluate(
        &self,
        id: &wayform_core::NodeId,
        context: &EvalContext,
        invoker: &Evaluator,
        hooks: &RuntimeHooks<'_>,
    ) -> ThunkResult;

    /// A synchronous fast path. Returning `Some` lets the evaluator skip the
    /// async machinery entirely; the default `None` means "always go through
    /// `evaluate`". Only handlers whose `compute_is_async` is unconditionally
    /// `false` should implement this.
    fn evaluate_sync(&self, _id: &wayform_core::NodeId, _context: &EvalContext, _invoker: &Evaluator) -> Option<ThunkResult> {
        None
    }

    /// Whether this node's evaluation is asynchronous, given whether each of
    /// its direct dependencies (in dependency-graph order) was found to be
    /// async. The default propagates: a node is async if anything it reads
    /// from is async. Leaf handlers that perform I/O themselves (a remote
    /// answer lookup, say) override this to return `true` unconditionally.
    fn compute_is_async(&self, dependency_is_async: &[bool]) -> bool {
        dependency_is_async.iter().any(|value| *value)
    }
}
