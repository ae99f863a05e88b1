//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects cells, derived
//! cells, and effects. It owns the dependency graph and propagates
//! invalidation when cells change.
//!
//! # How It Works
//!
//! 1. When a derived cell or effect reads a cell inside its tracking scope,
//!    the runtime records the dependency edge.
//!
//! 2. When a cell's value changes, the runtime walks the dependent edges
//!    breadth-first:
//!    a. every dependent is marked "maybe dirty"
//!    b. derived cells forward the walk through their own output cell, so
//!       transitive dependents are reached
//!    c. eager dependents (effects) are collected and run exactly once
//!       after all marking is done
//!
//! 3. Derived cells stay lazy: they recompute on next access, not here.
//!
//! # Thread Safety
//!
//! Registries are concurrent maps keyed by id; dependents are held weakly so
//! the registry never extends the lifetime of a computation.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;

use super::cell::CellId;
use super::SubscriberId;

/// A computation that can be invalidated when a cell it read changes.
///
/// Implemented by the internals of derived cells and effects.
pub(crate) trait Dependent: Send + Sync {
    /// Mark this computation as potentially stale.
    fn mark_maybe_dirty(&self);

    /// Eager dependents (effects) re-run during the notification pass;
    /// lazy ones (derived cells) recompute on next access.
    fn is_eager(&self) -> bool;

    /// Re-run the computation (effects only).
    fn run(&self);

    /// The output cell through which invalidation continues, if any.
    ///
    /// Derived cells return their own id here so that computations reading
    /// them are reached transitively.
    fn forward_cell(&self) -> Option<CellId>;
}

// Registered computations, held weakly.
static REGISTRY: OnceLock<DashMap<SubscriberId, Weak<dyn Dependent>>> = OnceLock::new();
// cell id -> dependent subscribers.
static CELL_DEPENDENTS: OnceLock<DashMap<CellId, Vec<SubscriberId>>> = OnceLock::new();
// subscriber -> cells it currently depends on (for cheap teardown).
static SUBSCRIBER_DEPS: OnceLock<DashMap<SubscriberId, Vec<CellId>>> = OnceLock::new();

fn registry() -> &'static DashMap<SubscriberId, Weak<dyn Dependent>> {
    REGISTRY.get_or_init(DashMap::new)
}

fn cell_dependents() -> &'static DashMap<CellId, Vec<SubscriberId>> {
    CELL_DEPENDENTS.get_or_init(DashMap::new)
}

fn subscriber_deps() -> &'static DashMap<SubscriberId, Vec<CellId>> {
    SUBSCRIBER_DEPS.get_or_init(DashMap::new)
}

/// The global reactive runtime.
pub struct Runtime;

impl Runtime {
    /// Register a computation with the runtime.
    ///
    /// The runtime holds a weak reference; the caller unregisters on drop.
    pub(crate) fn register(id: SubscriberId, dependent: Weak<dyn Dependent>) {
        registry().insert(id, dependent);
    }

    /// Unregister a computation and tear down its dependency edges.
    pub(crate) fn unregister(id: SubscriberId) {
        registry().remove(&id);
        Self::clear_dependencies(id);
    }

    /// Record that `subscriber` depends on `cell_id`.
    ///
    /// Called automatically on tracked cell reads. Duplicate edges from the
    /// same evaluation are collapsed.
    pub fn add_dependency(cell_id: CellId, subscriber: SubscriberId) {
        let mut deps = cell_dependents().entry(cell_id).or_default();
        if !deps.contains(&subscriber) {
            deps.push(subscriber);
            drop(deps);
            subscriber_deps().entry(subscriber).or_default().push(cell_id);
        }
    }

    /// Remove every dependency edge of a subscriber.
    ///
    /// Called before a computation re-runs, so its dependency set is rebuilt
    /// from scratch (dynamic dependency tracking).
    pub fn clear_dependencies(subscriber: SubscriberId) {
        if let Some((_, cells)) = subscriber_deps().remove(&subscriber) {
            for cell_id in cells {
                if let Some(mut deps) = cell_dependents().get_mut(&cell_id) {
                    deps.retain(|s| *s != subscriber);
                }
            }
        }
    }

    /// Propagate a change from the given cells to every transitive
    /// dependent.
    ///
    /// This is the single notification pass used both for direct writes and
    /// for batched write sets.
    pub fn notify_cells_changed(cell_ids: &[CellId]) {
        let mut visited_cells: HashSet<CellId> = HashSet::new();
        let mut seen_subscribers: HashSet<SubscriberId> = HashSet::new();
        let mut queue: Vec<CellId> = cell_ids.to_vec();
        let mut effects_to_run: Vec<Arc<dyn Dependent>> = Vec::new();

        while let Some(cell_id) = queue.pop() {
            if !visited_cells.insert(cell_id) {
                continue;
            }
            let subscribers = cell_dependents()
                .get(&cell_id)
                .map(|deps| deps.clone())
                .unwrap_or_default();

            for subscriber in subscribers {
                if !seen_subscribers.insert(subscriber) {
                    continue;
                }
                let upgraded = registry().get(&subscriber).and_then(|w| w.upgrade());
                match upgraded {
                    Some(dependent) => {
                        dependent.mark_maybe_dirty();
                        if let Some(forward) = dependent.forward_cell() {
                            queue.push(forward);
                        }
                        if dependent.is_eager() {
                            effects_to_run.push(dependent);
                        }
                    }
                    None => {
                        // Stale weak entry; drop it.
                        registry().remove(&subscriber);
                    }
                }
            }
        }

        // Run collected effects after all marking is done, each exactly once.
        for effect in effects_to_run {
            effect.run();
        }
    }

    /// Number of dependents currently recorded for a cell (test support).
    pub fn dependent_count(cell_id: CellId) -> usize {
        cell_dependents().get(&cell_id).map(|d| d.len()).unwrap_or(0)
    }
}
