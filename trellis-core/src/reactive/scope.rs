//! Tracking Scope
//!
//! The tracking scope records which computation is currently evaluating.
//! This enables automatic dependency tracking: when a cell is read, we can
//! register the current computation as a dependent of that cell.
//!
//! # Implementation
//!
//! We use a thread-local stack of frames. When a derived cell or effect
//! starts evaluating, it pushes a frame carrying its subscriber id; cells
//! that are read while the frame is on top record themselves into it. When
//! the evaluation completes, the frame is popped.
//!
//! A frame can also be a *suppression* frame (no subscriber). Reads under a
//! suppression frame are untracked, which is how `untracked` and the
//! peek-style accessors are implemented even when a computation is active
//! further down the stack.

use std::cell::RefCell;

use super::cell::CellId;
use super::SubscriberId;

thread_local! {
    static SCOPE_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// One entry on the tracking stack.
#[derive(Debug)]
struct Frame {
    /// The subscriber evaluating in this frame, or `None` for a
    /// suppression frame.
    subscriber: Option<SubscriberId>,
    /// Cell ids read while this frame was innermost.
    reads: Vec<CellId>,
}

/// RAII guard for one tracked evaluation.
///
/// Pops the frame on drop, so the stack stays consistent even when the
/// evaluation panics.
pub struct TrackingScope {
    subscriber: Option<SubscriberId>,
}

impl TrackingScope {
    /// Enter a tracked evaluation for the given subscriber.
    ///
    /// While the returned guard is alive, cell reads on this thread register
    /// the subscriber as a dependent.
    pub fn enter(subscriber: SubscriberId) -> Self {
        SCOPE_STACK.with(|stack| {
            stack.borrow_mut().push(Frame {
                subscriber: Some(subscriber),
                reads: Vec::new(),
            });
        });
        Self {
            subscriber: Some(subscriber),
        }
    }

    /// Enter a suppression frame: reads become untracked until the guard
    /// drops.
    pub fn enter_untracked() -> Self {
        SCOPE_STACK.with(|stack| {
            stack.borrow_mut().push(Frame {
                subscriber: None,
                reads: Vec::new(),
            });
        });
        Self { subscriber: None }
    }

    /// The subscriber of the innermost frame, if tracking is active.
    ///
    /// Returns `None` when the stack is empty or the innermost frame is a
    /// suppression frame.
    pub fn current_subscriber() -> Option<SubscriberId> {
        SCOPE_STACK.with(|stack| stack.borrow().last().and_then(|f| f.subscriber))
    }

    /// Is any frame active (tracking or suppressing)?
    pub fn is_active() -> bool {
        SCOPE_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// Record a cell read into the innermost frame.
    ///
    /// Called by cells on tracked reads.
    pub fn track(cell_id: CellId) {
        SCOPE_STACK.with(|stack| {
            if let Some(frame) = stack.borrow_mut().last_mut() {
                if frame.subscriber.is_some() {
                    frame.reads.push(cell_id);
                }
            }
        });
    }

    /// The cell ids recorded by the innermost frame so far.
    pub fn recorded_reads() -> Vec<CellId> {
        SCOPE_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .map(|f| f.reads.clone())
                .unwrap_or_default()
        })
    }
}

impl Drop for TrackingScope {
    fn drop(&mut self) {
        SCOPE_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            if let Some(frame) = popped {
                debug_assert_eq!(
                    frame.subscriber, self.subscriber,
                    "TrackingScope mismatch: expected {:?}, got {:?}",
                    self.subscriber, frame.subscriber
                );
            }
        });
    }
}

/// Run `f` with dependency tracking suppressed.
///
/// Reads inside `f` do not register dependencies, even when a derived cell
/// or effect is currently evaluating.
pub fn untracked<T>(f: impl FnOnce() -> T) -> T {
    let _guard = TrackingScope::enter_untracked();
    f()
}
