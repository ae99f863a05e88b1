//! Derived Cell Implementation
//!
//! A derived cell is a cached, lazily-recomputed value derived from other
//! cells.
//!
//! # How Derived Cells Work
//!
//! 1. On first access, the computation runs inside a fresh tracking scope
//!    and the result is cached.
//!
//! 2. Reading again while clean returns the cached value.
//!
//! 3. When a dependency changes, the runtime marks the derived cell "maybe
//!    dirty" and forwards the invalidation through the derived cell's own
//!    id, so readers of the derived cell are invalidated too.
//!
//! 4. The next access recomputes, rebuilding the dependency set from
//!    whatever the computation actually read this time (dependencies are
//!    dynamic, not a fixed edge list).
//!
//! Derived cells that are never read stay dirty at zero cost.

use std::fmt::Debug;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::cell::CellId;
use super::runtime::{Dependent, Runtime};
use super::scope::TrackingScope;
use super::SubscriberId;

/// Dirty state of a derived cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyState {
    /// The cached value is up-to-date.
    Clean,
    /// A dependency may have changed; recompute on next access.
    MaybeDirty,
    /// Never computed, or explicitly invalidated.
    Dirty,
}

struct DerivedInner<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Cell identity seen by readers of this derived cell.
    id: CellId,
    /// Subscriber identity used when this derived cell reads others.
    subscriber: SubscriberId,
    compute: Box<dyn Fn() -> T + Send + Sync>,
    value: RwLock<Option<T>>,
    state: RwLock<DirtyState>,
}

impl<T> Dependent for DerivedInner<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn mark_maybe_dirty(&self) {
        let mut state = self.state.write();
        if *state == DirtyState::Clean {
            *state = DirtyState::MaybeDirty;
        }
    }

    fn is_eager(&self) -> bool {
        false
    }

    fn run(&self) {}

    fn forward_cell(&self) -> Option<CellId> {
        Some(self.id)
    }
}

impl<T> Drop for DerivedInner<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn drop(&mut self) {
        Runtime::unregister(self.subscriber);
    }
}

/// A cached derived value that recomputes lazily when dependencies change.
///
/// The `PartialEq` bound lets an unchanged recomputation keep the previous
/// cached clone instead of replacing it.
///
/// # Example
///
/// ```rust,ignore
/// let count = cell(2);
/// let doubled = derived(move || count.get() * 2);
/// assert_eq!(doubled.get(), 4);
/// ```
pub struct Derived<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    inner: Arc<DerivedInner<T>>,
}

impl<T> Derived<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Create a new derived cell. The computation does not run until the
    /// first access.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let inner = Arc::new(DerivedInner {
            id: CellId::new(),
            subscriber: SubscriberId::new(),
            compute: Box::new(compute),
            value: RwLock::new(None),
            state: RwLock::new(DirtyState::Dirty),
        });
        let weak: Weak<dyn Dependent> = Arc::downgrade(&(inner.clone() as Arc<dyn Dependent>));
        Runtime::register(inner.subscriber, weak);
        Self { inner }
    }

    /// The cell id readers of this derived cell depend on.
    pub fn id(&self) -> CellId {
        self.inner.id
    }

    /// Tracked read, recomputing first if not clean.
    pub fn get(&self) -> T {
        if let Some(subscriber) = TrackingScope::current_subscriber() {
            TrackingScope::track(self.inner.id);
            Runtime::add_dependency(self.inner.id, subscriber);
        }
        let state = *self.inner.state.read();
        match state {
            DirtyState::Clean => self
                .inner
                .value
                .read()
                .clone()
                .expect("clean derived cell holds a value"),
            DirtyState::MaybeDirty | DirtyState::Dirty => self.recompute(),
        }
    }

    /// Untracked read of the cached value, recomputing first if needed.
    pub fn peek(&self) -> T {
        let state = *self.inner.state.read();
        match state {
            DirtyState::Clean => self
                .inner
                .value
                .read()
                .clone()
                .expect("clean derived cell holds a value"),
            DirtyState::MaybeDirty | DirtyState::Dirty => {
                super::scope::untracked(|| self.recompute())
            }
        }
    }

    /// Current dirty state.
    pub fn state(&self) -> DirtyState {
        *self.inner.state.read()
    }

    /// Has the computation run at least once?
    pub fn has_value(&self) -> bool {
        self.inner.value.read().is_some()
    }

    fn recompute(&self) -> T {
        // Rebuild dependencies from scratch; the computation may read a
        // different set of cells this time.
        Runtime::clear_dependencies(self.inner.subscriber);
        let new_value = {
            let _scope = TrackingScope::enter(self.inner.subscriber);
            (self.inner.compute)()
        };

        let mut value = self.inner.value.write();
        let unchanged = value.as_ref() == Some(&new_value);
        if !unchanged {
            *value = Some(new_value.clone());
        }
        drop(value);

        *self.inner.state.write() = DirtyState::Clean;
        new_value
    }
}

impl<T> Clone for Derived<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Derived<T>
where
    T: Clone + Send + Sync + PartialEq + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Derived")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("has_value", &self.has_value())
            .finish()
    }
}

/// Create a new derived cell from a pure computation.
pub fn derived<T, F>(compute: F) -> Derived<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    Derived::new(compute)
}
