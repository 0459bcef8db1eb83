//! The request-scoped evaluator: overlays the compiled program's registries
//! and graph, memoizes results in a fresh `Cache`, and drives each node's
//! handler through the cache-check / isolated-scope / dedup / retry
//! algorithm described for evaluation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;
use tracing::{debug, warn};

use wayform_core::{
    Cache, EngineError, IdAllocator, NodeCategory, NodeId, NodeMetadata, OverlayGraph, OverlayRegistry, ReadRegistry, ThunkResult,
};

use crate::compile::Artefact;
use crate::context::EvalContext;
use crate::functions::FunctionRegistry;
use crate::handler::Handler;
use crate::hooks::RuntimeHooks;

/// One request's view of a compiled form: the compiled artefact's registries
/// and graph overlaid with a fresh pending layer, plus a fresh cache and
/// runtime id allocator. Dropped at the end of a request; nothing here ever
/// mutates the shared artefact.
pub struct Evaluator {
    pub(crate) nodes: OverlayRegistry<wayform_core::AstNode>,
    pub(crate) metadata: OverlayRegistry<NodeMetadata>,
    pub(crate) handlers: OverlayRegistry<Arc<dyn Handler>>,
    pub(crate) graph: OverlayGraph,
    pub(crate) cache: Cache,
    pub(crate) allocator: IdAllocator,
    pub(crate) config: wayform_config::EngineConfig,
    pub(crate) functions: Arc<FunctionRegistry>,
    pseudo_index: Arc<HashMap<(String, String), NodeId>>,
    in_flight: Mutex<HashMap<NodeId, Arc<OnceCell<ThunkResult>>>>,
    root: NodeId,
}

impl Evaluator {
    /// Build a fresh request-scoped evaluator over a compiled artefact.
    #[must_use]
    pub fn with_runtime_overlay(artefact: &Arc<Artefact>, config: wayform_config::EngineConfig, functions: Arc<FunctionRegistry>) -> Self {
        Self {
            nodes: OverlayRegistry::new("nodes", Arc::clone(&artefact.nodes)),
            metadata: OverlayRegistry::new("metadata", Arc::clone(&artefact.metadata)),
            handlers: OverlayRegistry::new("handlers", Arc::clone(&artefact.handlers)),
            graph: OverlayGraph::new(Arc::clone(&artefact.graph)),
            cache: Cache::new(),
            allocator: IdAllocator::new(),
            config,
            functions,
            pseudo_index: Arc::clone(&artefact.pseudo_index),
            in_flight: Mutex::new(HashMap::new()),
            root: artefact.root.clone(),
        }
    }

    /// The compile-time pseudo node registered for `(namespace, key)`, if
    /// any was generated during compilation. `None` for `@scope`/`@self`
    /// (which never get a pseudo node) and for references whose pseudo node
    /// generation, for some reason, did not cover this pair.
    #[must_use]
    pub(crate) fn pseudo_for(&self, namespace: &str, key: &str) -> Option<NodeId> {
        self.pseudo_index.get(&(namespace.to_string(), key.to_string())).cloned()
    }

    /// The function registry (built-ins plus host registrations) this
    /// evaluator resolves CONDITION/TRANSFORMER/EFFECT names against.
    #[must_use]
    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// This node's nearest FIELD-block ancestor's field code, walking the
    /// `attachedToParentNode` chain. Used by `@self` references.
    #[must_use]
    pub(crate) fn enclosing_field_code(&self, id: &NodeId) -> Option<String> {
        let mut current = self.metadata.get(id)?.attached_to_parent_node;
        while let Some(candidate) = current {
            if let Some(node) = self.nodes.get(&candidate) {
                if node.node_type() == wayform_core::NodeType::Block && node.variant() == "FIELD" {
                    return crate::handlers::support::scalar_str(node.properties(), "code").map(str::to_string);
                }
            }
            current = self.metadata.get(&candidate).and_then(|meta| meta.attached_to_parent_node);
        }
        None
    }

    /// The compiled program's root JOURNEY id.
    #[must_use]
    pub fn root(&self) -> &NodeId {
        &self.root
    }

    /// The engine configuration this evaluator was built with.
    #[must_use]
    pub fn config(&self) -> &wayform_config::EngineConfig {
        &self.config
    }

    /// The fresh, per-request runtime id allocator, used by `RuntimeHooks`
    /// when creating new AST/pseudo nodes.
    #[must_use]
    pub fn allocator(&self) -> &IdAllocator {
        &self.allocator
    }

    /// Evaluate the compiled program's root node within `context`.
    pub async fn evaluate(&self, context: &EvalContext) -> ThunkResult {
        let root = self.root.clone();
        self.invoke(&root, context).await
    }

    /// Resolve `id`'s value, consulting the cache first and otherwise
    /// dispatching to its registered handler.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::HandlerRegistry` if no handler is registered for
    /// `id`, and propagates `maxRetriesExceeded` if the node's cached version
    /// keeps changing underneath a retry loop.
    pub async fn invoke(&self, id: &NodeId, context: &EvalContext) -> ThunkResult {
        if let Some(cached) = self.cache.get(id) {
            return cached;
        }

        let isolated = context.with_isolated_scope();

        let Some(handler) = self.handlers.get(id) else {
            let err = EngineError::handler_registry(format!("no handler registered for {id}"));
            return ThunkResult::Error(err);
        };

        let is_async = self.metadata.get(id).is_some_and(|meta| meta.is_async);

        if !is_async {
            if let Some(result) = handler.evaluate_sync(id, &isolated, self) {
                self.cache.set(id.clone(), result.clone());
                return result;
            }
        }

        if self.config.dedup_in_flight {
            self.invoke_deduped(id, &isolated, &handler).await
        } else {
            self.invoke_with_retry(id, &isolated, handler.as_ref()).await
        }
    }

    async fn invoke_deduped(&self, id: &NodeId, context: &EvalContext, handler: &Arc<dyn Handler>) -> ThunkResult {
        let cell = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|poison| poison.into_inner());
            Arc::clone(in_flight.entry(id.clone()).or_insert_with(|| Arc::new(OnceCell::new())))
        };

        let result = cell
            .get_or_init(|| async { self.invoke_with_retry(id, context, handler.as_ref()).await })
            .await
            .clone();

        self.in_flight.lock().unwrap_or_else(|poison| poison.into_inner()).remove(id);
        result
    }

    async fn invoke_with_retry(&self, id: &NodeId, context: &EvalContext, handler: &dyn Handler) -> ThunkResult {
        let hooks = RuntimeHooks::new(self, id.clone());
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let version_before = self.cache.version(id);
            let result = handler.evaluate(id, context, self, &hooks).await;
            let version_after = self.cache.version(id);

            if version_before == version_after {
                self.cache.set(id.clone(), result.clone());
                return result;
            }

            if attempts >= self.config.max_retries {
                warn!(%id, attempts, "node did not stabilize within the retry budget");
                let err = EngineError::max_retries_exceeded(id, attempts);
                self.cache.set(id.clone(), ThunkResult::Error(err.clone()));
                return ThunkResult::Error(err);
            }

            debug!(%id, attempts, "dependency version changed mid-evaluation, retrying");
        }
    }

    /// Allocate a fresh runtime node identity in `category`.
    pub(crate) fn next_id(&self, category: NodeCategory) -> NodeId {
        self.allocator.next(category)
    }
}
