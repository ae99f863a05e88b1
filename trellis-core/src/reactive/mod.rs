//! Primitive Cell Layer
//!
//! This module implements the core reactive system: cells, derived cells,
//! and effects. These primitives underlie every reactive read in the deep
//! wrapping engine.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A [`Cell`] is a container for one mutable value. When a cell is read
//! within a tracking scope (such as a derived cell or effect evaluation),
//! the cell automatically registers that evaluation as a dependent. When
//! the cell's value changes, all dependents are invalidated.
//!
//! ## Derived Cells
//!
//! A [`Derived`] is a cached value computed from other cells. It
//! re-evaluates lazily, only when one of its dependencies has changed and
//! the value is read again.
//!
//! ## Effects
//!
//! An [`Effect`] is an eager side-effecting computation that re-runs
//! synchronously when its dependencies change.
//!
//! ## Batching
//!
//! [`batch`] suspends dependent notification while a closure runs, so many
//! writes coalesce into a single notification pass.
//!
//! # Implementation Notes
//!
//! Dependency detection is automatic: a thread-local tracking scope records
//! which computation is evaluating, and cells register edges with the
//! global runtime on tracked reads. Dependencies are rebuilt on every
//! re-run, so a computation's edges always match what it actually read.

use std::sync::atomic::{AtomicU64, Ordering};

mod batch;
mod cell;
mod derived;
mod effect;
mod runtime;
mod scope;

pub use batch::batch;
pub use cell::{cell, Cell, CellId, ReadonlyCell};
pub use derived::{derived, Derived, DirtyState};
pub use effect::Effect;
pub use runtime::Runtime;
pub use scope::{untracked, TrackingScope};

/// Unique identifier for a computation that depends on cells.
///
/// Each derived cell and effect gets one when created; the runtime keys its
/// dependency edges on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_ids_are_unique() {
        let a = SubscriberId::new();
        let b = SubscriberId::new();
        let c = SubscriberId::new();

        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }
}
