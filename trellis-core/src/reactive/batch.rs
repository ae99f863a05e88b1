//! Write Batching
//!
//! `batch` executes a closure synchronously while suspending downstream
//! notification: every cell written inside the batch records its id, and a
//! single notification pass runs when the outermost batch exits. N writes
//! to M cells produce exactly one run per affected dependent.
//!
//! Batches nest; only the outermost exit flushes. Patch queueing is
//! independent of this mechanism and stays per-mutation.

use std::cell::RefCell;

use indexmap::IndexSet;

use super::cell::CellId;
use super::runtime::Runtime;

thread_local! {
    static BATCH_DEPTH: RefCell<usize> = const { RefCell::new(0) };
    static CHANGED_CELLS: RefCell<IndexSet<CellId>> = RefCell::new(IndexSet::new());
}

/// Record a changed cell if a batch is active.
///
/// Returns true when the notification was deferred; the caller notifies
/// immediately otherwise. Order-preserving and deduplicated.
pub(crate) fn defer(cell_id: CellId) -> bool {
    BATCH_DEPTH.with(|depth| {
        if *depth.borrow() == 0 {
            return false;
        }
        CHANGED_CELLS.with(|cells| {
            cells.borrow_mut().insert(cell_id);
        });
        true
    })
}

/// Execute `f` with cell notification suspended.
///
/// Writes inside `f` take effect immediately (reads observe them), but
/// dependents are notified once, after the outermost batch returns.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    BATCH_DEPTH.with(|depth| *depth.borrow_mut() += 1);
    let result = f();
    let flushed = BATCH_DEPTH.with(|depth| {
        let mut d = depth.borrow_mut();
        *d -= 1;
        if *d == 0 {
            Some(CHANGED_CELLS.with(|cells| {
                cells.borrow_mut().drain(..).collect::<Vec<_>>()
            }))
        } else {
            None
        }
    });
    if let Some(changed) = flushed {
        if !changed.is_empty() {
            Runtime::notify_cells_changed(&changed);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::cell::Cell;
    use crate::reactive::effect::Effect;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn batch_returns_closure_result() {
        assert_eq!(batch(|| 41 + 1), 42);
    }

    #[test]
    fn writes_inside_batch_are_visible_immediately() {
        let c = Cell::new(0);
        batch(|| {
            c.set(1);
            assert_eq!(c.peek(), 1);
            c.set(2);
            assert_eq!(c.peek(), 2);
        });
        assert_eq!(c.get(), 2);
    }

    #[test]
    fn batch_coalesces_notifications() {
        let a = Cell::new(0);
        let b = Cell::new(0);
        let runs = Arc::new(AtomicI32::new(0));

        let a2 = a.clone();
        let b2 = b.clone();
        let runs2 = runs.clone();
        let _effect = Effect::new(move || {
            let _ = a2.get() + b2.get();
            runs2.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        batch(|| {
            a.set(1);
            a.set(2);
            b.set(3);
        });

        // Three writes, one re-run.
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn nested_batches_flush_once() {
        let c = Cell::new(0);
        let runs = Arc::new(AtomicI32::new(0));

        let c2 = c.clone();
        let runs2 = runs.clone();
        let _effect = Effect::new(move || {
            let _ = c2.get();
            runs2.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        batch(|| {
            c.set(1);
            batch(|| {
                c.set(2);
            });
            // Inner batch exit must not notify yet.
            assert_eq!(runs.load(Ordering::SeqCst), 1);
            c.set(3);
        });

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(c.get(), 3);
    }
}
