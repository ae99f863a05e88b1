//! Cell Implementation
//!
//! A Cell is the fundamental reactive primitive. It holds one value and
//! tracks which computations depend on it.
//!
//! # How Cells Work
//!
//! 1. When a cell is read inside a tracked evaluation (derived cell or
//!    effect), the cell registers that evaluation as a dependent through the
//!    runtime.
//!
//! 2. When a cell's value changes, all dependents are invalidated; eager
//!    dependents (effects) re-run.
//!
//! 3. Inside `batch`, invalidation is deferred until the outermost batch
//!    exits, so N writes produce one notification pass.
//!
//! Notification is unconditional: writing an equal value still notifies.
//!
//! # Thread Safety
//!
//! The value sits behind a `parking_lot::RwLock`; dependency bookkeeping
//! lives in the runtime's concurrent registries. Tracking itself is
//! thread-local.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Result, TrellisError};

use super::batch;
use super::runtime::Runtime;
use super::scope::TrackingScope;

/// Unique identifier for a cell.
///
/// Minted from a process-wide atomic counter; used as the key for
/// dependency edges in the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellId(u64);

impl CellId {
    /// Generate a new unique cell ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for CellId {
    fn default() -> Self {
        Self::new()
    }
}

/// A writable reactive slot holding a value of type `T`.
///
/// # Example
///
/// ```rust,ignore
/// let count = Cell::new(0);
///
/// // Tracked read
/// let value = count.get();
///
/// // Write (notifies dependents)
/// count.set(5);
/// ```
pub struct Cell<T>
where
    T: Clone + Send + Sync + 'static,
{
    id: CellId,
    value: Arc<RwLock<T>>,
}

impl<T> Cell<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new cell with the given initial value.
    pub fn new(value: T) -> Self {
        Self {
            id: CellId::new(),
            value: Arc::new(RwLock::new(value)),
        }
    }

    /// The cell's unique ID.
    pub fn id(&self) -> CellId {
        self.id
    }

    /// Tracked read.
    ///
    /// If called inside a tracked evaluation, registers the evaluation as a
    /// dependent of this cell, then returns a clone of the value.
    pub fn get(&self) -> T {
        if let Some(subscriber) = TrackingScope::current_subscriber() {
            TrackingScope::track(self.id);
            Runtime::add_dependency(self.id, subscriber);
        }
        self.value.read().clone()
    }

    /// Untracked read.
    pub fn peek(&self) -> T {
        self.value.read().clone()
    }

    /// Replace the value and notify dependents.
    ///
    /// Inside `batch`, notification is deferred until the batch exits.
    pub fn set(&self, value: T) {
        {
            let mut guard = self.value.write();
            *guard = value;
        }
        if !batch::defer(self.id) {
            Runtime::notify_cells_changed(&[self.id]);
        }
    }

    /// Update the value using a function of the current value.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let new_value = {
            let guard = self.value.read();
            f(&guard)
        };
        self.set(new_value);
    }

    /// A read-only view over this cell.
    pub fn readonly(&self) -> ReadonlyCell<T> {
        ReadonlyCell {
            inner: self.clone(),
        }
    }
}

impl<T> Clone for Cell<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            value: Arc::clone(&self.value),
        }
    }
}

impl<T> Debug for Cell<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.id)
            .field("value", &self.peek())
            .finish()
    }
}

/// A read-only handle over a [`Cell`].
///
/// Reads pass through; writes fail with
/// [`TrellisError::IllegalMutation`]. This is the handle type surfaced by
/// the array index-cell view and by `ObjectNode::cell`.
pub struct ReadonlyCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Cell<T>,
}

impl<T> ReadonlyCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// The underlying cell's ID.
    pub fn id(&self) -> CellId {
        self.inner.id()
    }

    /// Tracked read.
    pub fn get(&self) -> T {
        self.inner.get()
    }

    /// Untracked read.
    pub fn peek(&self) -> T {
        self.inner.peek()
    }

    /// Always fails: handles from a cell view are read-only.
    pub fn set(&self, _value: T) -> Result<()> {
        Err(TrellisError::IllegalMutation)
    }
}

impl<T> Clone for ReadonlyCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Create a new writable cell.
pub fn cell<T>(initial: T) -> Cell<T>
where
    T: Clone + Send + Sync + 'static,
{
    Cell::new(initial)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_get_and_set() {
        let c = Cell::new(0);
        assert_eq!(c.get(), 0);

        c.set(42);
        assert_eq!(c.get(), 42);
    }

    #[test]
    fn cell_update() {
        let c = Cell::new(10);
        c.update(|v| v + 5);
        assert_eq!(c.get(), 15);
    }

    #[test]
    fn cell_clone_shares_state() {
        let c1 = Cell::new(0);
        let c2 = c1.clone();

        c1.set(42);
        assert_eq!(c2.get(), 42);

        c2.set(100);
        assert_eq!(c1.get(), 100);
    }

    #[test]
    fn cell_ids_are_unique() {
        let c1 = Cell::new(0);
        let c2 = Cell::new(0);
        let c3 = Cell::new(0);

        assert_ne!(c1.id(), c2.id());
        assert_ne!(c2.id(), c3.id());
        assert_ne!(c1.id(), c3.id());
    }

    #[test]
    fn readonly_cell_rejects_writes() {
        let c = Cell::new(1);
        let view = c.readonly();

        assert_eq!(view.get(), 1);
        assert_eq!(view.set(2), Err(TrellisError::IllegalMutation));

        // The underlying cell is untouched.
        assert_eq!(c.get(), 1);

        // Writes through the owning cell remain visible.
        c.set(7);
        assert_eq!(view.peek(), 7);
    }
}
