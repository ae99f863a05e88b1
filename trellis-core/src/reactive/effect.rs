//! Effect Implementation
//!
//! An effect is an eager side-effecting computation that re-runs whenever a
//! dependency changes.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs once to establish its initial
//!    dependencies (unless created with `new_lazy`).
//!
//! 2. When any dependency changes, the runtime re-runs the effect
//!    synchronously during the notification pass, exactly once per pass.
//!
//! 3. Before re-running, the old dependency edges are torn down and new
//!    ones are recorded during execution.
//!
//! # Differences from Derived
//!
//! - Derived cells return a value; effects do not.
//! - Derived cells are lazy (compute on access); effects are eager.
//!
//! `dispose()` stops the effect permanently.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use super::cell::CellId;
use super::runtime::{Dependent, Runtime};
use super::scope::TrackingScope;
use super::SubscriberId;

struct EffectInner {
    subscriber: SubscriberId,
    run: Box<dyn Fn() + Send + Sync>,
    disposed: AtomicBool,
    run_count: AtomicUsize,
}

impl EffectInner {
    fn execute(&self) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        Runtime::clear_dependencies(self.subscriber);
        {
            let _scope = TrackingScope::enter(self.subscriber);
            (self.run)();
        }
        self.run_count.fetch_add(1, Ordering::SeqCst);
    }
}

impl Dependent for EffectInner {
    fn mark_maybe_dirty(&self) {}

    fn is_eager(&self) -> bool {
        true
    }

    fn run(&self) {
        self.execute();
    }

    fn forward_cell(&self) -> Option<CellId> {
        None
    }
}

impl Drop for EffectInner {
    fn drop(&mut self) {
        Runtime::unregister(self.subscriber);
    }
}

/// An eagerly scheduled reaction.
///
/// # Example
///
/// ```rust,ignore
/// let count = cell(0);
/// let count2 = count.clone();
/// let effect = Effect::new(move || {
///     println!("count is {}", count2.get());
/// });
/// count.set(5); // prints "count is 5"
/// ```
pub struct Effect {
    inner: Arc<EffectInner>,
}

impl Effect {
    /// Create a new effect and run it once to establish dependencies.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let effect = Self::new_lazy(run);
        effect.execute();
        effect
    }

    /// Create a new effect without running it.
    ///
    /// No dependencies exist until the first `execute`.
    pub fn new_lazy<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let inner = Arc::new(EffectInner {
            subscriber: SubscriberId::new(),
            run: Box::new(run),
            disposed: AtomicBool::new(false),
            run_count: AtomicUsize::new(0),
        });
        let weak: Weak<dyn Dependent> = Arc::downgrade(&(inner.clone() as Arc<dyn Dependent>));
        Runtime::register(inner.subscriber, weak);
        Self { inner }
    }

    /// The subscriber id of this effect.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.inner.subscriber
    }

    /// Run the effect now, rebuilding its dependency set.
    pub fn execute(&self) {
        self.inner.execute();
    }

    /// Stop the effect permanently.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
        Runtime::clear_dependencies(self.inner.subscriber);
    }

    /// Has the effect been disposed?
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Number of completed runs.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::SeqCst)
    }
}

impl Clone for Effect {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("run_count", &self.run_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
