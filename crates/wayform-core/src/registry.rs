//! Generic, thread-safe registries keyed by `NodeId`, plus the overlay
//! wrapper that lets a request extend a compiled program's registries
//! without mutating them. One `Registry<T>` instantiation backs each of
//! `NodeRegistry`, `MetadataRegistry`, and a downstream crate's
//! `HandlerRegistry`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::error::EngineError;
use crate::ids::NodeId;

/// Read-only surface shared by `Registry<T>` and `OverlayRegistry<T>`, so
/// callers (the compiler, the wiring pass, the evaluator) can be generic
/// over whether they're looking at a plain registry or an overlaid one.
pub trait ReadRegistry<T: Clone> {
    /// Fetch a value by id.
    fn get(&self, id: &NodeId) -> Option<T>;
    /// Whether an id is registered.
    fn has(&self, id: &NodeId) -> bool;
    /// All registered ids, in no particular order.
    fn ids(&self) -> Vec<NodeId>;
    /// Number of registered entries.
    fn size(&self) -> usize;
    /// All entries, as an id/value snapshot.
    fn entries(&self) -> Vec<(NodeId, T)>;
}

/// Write surface shared by `Registry<T>` and `OverlayRegistry<T>`, so the
/// compiler's node-parsing logic can target either a plain registry (at
/// compile time) or an overlay (when an iterator handler creates runtime
/// nodes) without duplicating its traversal.
pub trait WriteRegistry<T: Clone>: ReadRegistry<T> {
    /// Register a value under `id`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::HandlerRegistry` if `id` is already registered.
    fn try_register(&self, id: NodeId, value: T) -> Result<(), EngineError>;
}

/// A plain registry: one `RwLock<HashMap<..>>`, shared cheaply via `Arc`
/// once compiled, consistent with the teacher's plugin registry shape.
#[derive(Debug)]
pub struct Registry<T> {
    label: &'static str,
    entries: RwLock<HashMap<NodeId, T>>,
}

impl<T: Clone> Registry<T> {
    /// Create an empty registry. `label` is used only for log messages.
    #[must_use]
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Register a value under `id`. Fails if `id` is already present.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::HandlerRegistry` when `id` is already registered.
    pub fn register(&self, id: NodeId, value: T) -> Result<(), EngineError> {
        let mut guard = self.entries.write().unwrap_or_else(|poison| poison.into_inner());
        if guard.contains_key(&id) {
            warn!(registry = self.label, %id, "duplicate registration rejected");
            return Err(EngineError::handler_registry(format!(
                "{}: duplicate registration for {id}",
                self.label
            )));
        }
        debug!(registry = self.label, %id, "registered");
        guard.insert(id, value);
        Ok(())
    }

    /// Remove a value, returning it if present.
    pub fn remove(&self, id: &NodeId) -> Option<T> {
        let mut guard = self.entries.write().unwrap_or_else(|poison| poison.into_inner());
        guard.remove(id)
    }

    /// Mutate an already-registered value in place. Returns `false` if `id`
    /// is not present. Used by the compiler's metadata-marking passes, which
    /// update records created during the initial parse.
    pub fn update(&self, id: &NodeId, f: impl FnOnce(&mut T)) -> bool {
        let mut guard = self.entries.write().unwrap_or_else(|poison| poison.into_inner());
        match guard.get_mut(id) {
            Some(value) => {
                f(value);
                true
            }
            None => false,
        }
    }

    /// Find all entries whose value matches `predicate`.
    pub fn find_where(&self, predicate: impl Fn(&T) -> bool) -> Vec<(NodeId, T)> {
        let guard = self.entries.read().unwrap_or_else(|poison| poison.into_inner());
        guard
            .iter()
            .filter(|(_, value)| predicate(value))
            .map(|(id, value)| (id.clone(), value.clone()))
            .collect()
    }

    /// A shallow snapshot sharing this registry's contents via a fresh map.
    /// Valid because entries themselves are treated as immutable once
    /// registered (any internal sharing is the caller's concern, typically
    /// via `Arc<dyn Trait>` values).
    #[must_use]
    pub fn snapshot(&self) -> Self
    where
        T: Send + Sync,
    {
        let guard = self.entries.read().unwrap_or_else(|poison| poison.into_inner());
        Self {
            label: self.label,
            entries: RwLock::new(guard.clone()),
        }
    }
}

impl<T: Clone> ReadRegistry<T> for Registry<T> {
    fn get(&self, id: &NodeId) -> Option<T> {
        let guard = self.entries.read().unwrap_or_else(|poison| poison.into_inner());
        guard.get(id).cloned()
    }

    fn has(&self, id: &NodeId) -> bool {
        let guard = self.entries.read().unwrap_or_else(|poison| poison.into_inner());
        guard.contains_key(id)
    }

    fn ids(&self) -> Vec<NodeId> {
        let guard = self.entries.read().unwrap_or_else(|poison| poison.into_inner());
        guard.keys().cloned().collect()
    }

    fn size(&self) -> usize {
        let guard = self.entries.read().unwrap_or_else(|poison| poison.into_inner());
        guard.len()
    }

    fn entries(&self) -> Vec<(NodeId, T)> {
        let guard = self.entries.read().unwrap_or_else(|poison| poison.into_inner());
        guard.iter().map(|(id, value)| (id.clone(), value.clone())).collect()
    }
}

/// Two-layer registry pair: `pending` holds runtime-registered entries for
/// the current request, `main` is the shared compiled registry. Lookups try
/// `pending` first. `flushIntoMain` is intentionally not exposed here on the
/// generic `main: Arc<Registry<T>>`, since main is shared read-only state;
/// instead overlays are discarded at request end and pending simply never
/// reaches main. Downstream code that genuinely needs to promote pending
/// entries into a fresh compiled program does so by rebuilding a `Registry`
/// from `entries()`.
#[derive(Debug)]
pub struct OverlayRegistry<T> {
    label: &'static str,
    main: Arc<Registry<T>>,
    pending: Registry<T>,
}

impl<T: Clone> OverlayRegistry<T> {
    /// Wrap a shared compiled registry with a fresh, empty pending layer.
    #[must_use]
    pub fn new(label: &'static str, main: Arc<Registry<T>>) -> Self {
        Self {
            label,
            main,
            pending: Registry::new(label),
        }
    }

    /// Register into the pending layer. Fails if the id is already present
    /// in either layer, mirroring `Registry::register`'s duplicate policy.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::HandlerRegistry` if `id` is already registered
    /// in the main layer or the pending layer.
    pub fn register(&self, id: NodeId, value: T) -> Result<(), EngineError> {
        if self.main.has(&id) {
            return Err(EngineError::handler_registry(format!(
                "{}: {id} already present in main layer",
                self.label
            )));
        }
        self.pending.register(id, value)
    }

    /// Merge pending entries into a *new* main registry and return it,
    /// clearing this overlay's pending layer. The caller is responsible for
    /// installing the returned registry as the new shared main (typically
    /// only meaningful for long-lived compiler-side overlays, not per
    /// request overlays, which are simply dropped).
    #[must_use]
    pub fn flush_into_main(&mut self) -> Registry<T>
    where
        T: Send + Sync,
    {
        let merged = self.main.snapshot();
        for (id, value) in self.pending.entries() {
            // Ignore duplicate errors here: flush is only ever called with a
            // pending layer that was built against this same main snapshot.
            let _ = merged.register(id, value);
        }
        self.pending = Registry::new(self.label);
        merged
    }

    /// The pending-layer-only entries, useful for wiring newly created
    /// runtime nodes without re-walking the whole overlay.
    #[must_use]
    pub fn pending_entries(&self) -> Vec<(NodeId, T)> {
        self.pending.entries()
    }
}

impl<T: Clone> ReadRegistry<T> for OverlayRegistry<T> {
    fn get(&self, id: &NodeId) -> Option<T> {
        self.pending.get(id).or_else(|| self.main.get(id))
    }

    fn has(&self, id: &NodeId) -> bool {
        self.pending.has(id) || self.main.has(id)
    }

    fn ids(&self) -> Vec<NodeId> {
        let mut ids = self.main.ids();
        ids.extend(self.pending.ids());
        ids
    }

    fn size(&self) -> usize {
        self.main.size().saturating_add(self.pending.size())
    }

    fn entries(&self) -> Vec<(NodeId, T)> {
        let mut entries = self.main.entries();
        entries.extend(self.pending.entries());
        entries
    }
}

impl<T: Clone> WriteRegistry<T> for Registry<T> {
    fn try_register(&self, id: NodeId, value: T) -> Result<(), EngineError> {
        self.register(id, value)
    }
}

impl<T: Clone> WriteRegistry<T> for OverlayRegistry<T> {
    fn try_register(&self, id: NodeId, value: T) -> Result<(), EngineError> {
        self.register(id, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::NodeCategory;

    #[test]
    fn duplicate_registration_fails() {
        let registry: Registry<i32> = Registry::new("test");
        let id = NodeId::new(NodeCategory::CompileAst, 0);
        registry.register(id.clone(), 1).unwrap();
        let err = registry.register(id, 2).unwrap_err();
        assert!(matches!(err, EngineError::HandlerRegistry(_)));
    }

    #[test]
    fn overlay_prefers_pending_and_does_not_mutate_main() {
        let main = Arc::new(Registry::new("main"));
        let id_main = NodeId::new(NodeCategory::CompileAst, 0);
        main.register(id_main.clone(), "main-value".to_string()).unwrap();

        let overlay = OverlayRegistry::new("overlay", Arc::clone(&main));
        let id_runtime = NodeId::new(NodeCategory::RuntimeAst, 0);
        overlay.register(id_runtime.clone(), "runtime-value".to_string()).unwrap();

        assert!(!main.has(&id_runtime), "registering in overlay must not mutate main");
        assert_eq!(overlay.get(&id_runtime), Some("runtime-value".to_string()));
        assert_eq!(overlay.get(&id_main), Some("main-value".to_string()));
        assert_eq!(overlay.size(), 2);
    }

    #[test]
    fn overlay_register_rejects_id_already_in_main() {
        let main = Arc::new(Registry::new("main"));
        let id = NodeId::new(NodeCategory::CompileAst, 0);
        main.register(id.clone(), 1).unwrap();
        let overlay = OverlayRegistry::new("overlay", Arc::clone(&main));
        assert!(overlay.register(id, 2).is_err());
    }

    #[test]
    fn flush_into_main_merges_and_clears_pending() {
        let main = Arc::new(Registry::new("main"));
        let mut overlay = OverlayRegistry::new("overlay", Arc::clone(&main));
        let id = NodeId::new(NodeCategory::RuntimeAst, 0);
        overlay.register(id.clone(), 99).unwrap();

        let merged = overlay.flush_into_main();
        assert!(merged.has(&id));
        assert!(overlay.pending_entries().is_empty());
    }
}
