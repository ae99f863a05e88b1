//! Watchers
//!
//! `watch` observes a wrapped root and delivers mutation events to a
//! callback, either per flushed batch (with version and before/after
//! snapshots) or just-in-time per mutation group.
//!
//! Cleanups registered on a watcher run exactly once, immediately before
//! the next delivery to that watcher or when it stops, whichever comes
//! first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::graph::{snapshot_value, Node, Value};
use crate::reactive::untracked;

use super::registry::{self, Subscription};
use super::types::DeepPatch;

/// Delivery configuration for [`watch`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    /// One synchronous call at registration, with empty patches and the
    /// current snapshot.
    pub immediate: bool,
    /// Stop after the first delivery (the immediate call counts).
    pub once: bool,
    /// Just-in-time mode: fire synchronously per mutation group instead of
    /// per flushed batch. No version, no snapshots.
    pub trigger_instantly: bool,
}

/// What a watcher callback receives.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub patches: Vec<DeepPatch>,
    /// The root version of the delivered batch; `None` for immediate and
    /// just-in-time calls.
    pub version: Option<u64>,
    /// Snapshot from the previous delivery, `None` before the first.
    pub old_value: Option<Value>,
    /// Deep snapshot of the root taken at delivery; plain data with getter
    /// properties evaluated.
    pub new_value: Option<Value>,
}

struct WatchInner {
    stopped: AtomicBool,
    cleanups: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    subscription: Mutex<Option<Subscription>>,
    prev: Mutex<Option<Value>>,
}

impl WatchInner {
    fn run_cleanups(&self) {
        let cleanups = std::mem::take(&mut *self.cleanups.lock());
        for cleanup in cleanups {
            cleanup();
        }
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(sub) = self.subscription.lock().take() {
            sub.unsubscribe();
        }
        self.run_cleanups();
    }
}

impl Drop for WatchInner {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Handle to an active watch.
#[derive(Clone)]
pub struct Watcher {
    inner: Arc<WatchInner>,
}

impl Watcher {
    /// Stop immediately and idempotently: no delivery happens after this
    /// returns, even one already scheduled for the current tick.
    pub fn stop_listening(&self) {
        self.inner.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Run `f` once, immediately before the next delivery or on stop,
    /// whichever comes first. Registering on a stopped watcher runs `f`
    /// now.
    pub fn register_cleanup(&self, f: impl FnOnce() + Send + 'static) {
        if self.is_stopped() {
            f();
            return;
        }
        self.inner.cleanups.lock().push(Box::new(f));
    }
}

/// Observe a wrapped root.
///
/// Batched watchers receive one [`WatchEvent`] per flushed batch with the
/// root version and before/after snapshots. With
/// `WatchOptions::trigger_instantly` the callback instead fires
/// synchronously once per mutation, in mutation order, with only that
/// mutation's patch group.
pub fn watch<F>(node: &Node, callback: F, options: WatchOptions) -> Watcher
where
    F: Fn(&WatchEvent) + Send + Sync + 'static,
{
    let inner = Arc::new(WatchInner {
        stopped: AtomicBool::new(false),
        cleanups: Mutex::new(Vec::new()),
        subscription: Mutex::new(None),
        prev: Mutex::new(None),
    });
    let watcher = Watcher {
        inner: Arc::clone(&inner),
    };
    let callback = Arc::new(callback);

    if options.immediate {
        let snapshot = untracked(|| snapshot_value(&node.raw()));
        *inner.prev.lock() = Some(snapshot.clone());
        callback(&WatchEvent {
            patches: Vec::new(),
            version: None,
            old_value: None,
            new_value: Some(snapshot),
        });
        if options.once {
            watcher.stop_listening();
            return watcher;
        }
    }

    let subscription = if options.trigger_instantly {
        let weak = Arc::downgrade(&inner);
        let callback = Arc::clone(&callback);
        let once = options.once;
        registry::register_jit(node.root_id(), move |patches: &[DeepPatch]| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.stopped.load(Ordering::SeqCst) {
                return;
            }
            inner.run_cleanups();
            callback(&WatchEvent {
                patches: patches.to_vec(),
                version: None,
                old_value: None,
                new_value: None,
            });
            if once {
                inner.stop();
            }
        })
    } else {
        let weak = Arc::downgrade(&inner);
        let raw = node.raw();
        let once = options.once;
        registry::subscribe_deep_mutations_by_id(node.root_id(), move |batch| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.stopped.load(Ordering::SeqCst) {
                return;
            }
            inner.run_cleanups();
            let snapshot = untracked(|| snapshot_value(&raw));
            let old_value = inner.prev.lock().replace(snapshot.clone());
            callback(&WatchEvent {
                patches: batch.patches.clone(),
                version: Some(batch.version),
                old_value,
                new_value: Some(snapshot),
            });
            if once {
                inner.stop();
            }
        })
    };
    *inner.subscription.lock() = Some(subscription);
    watcher
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{wrap, ObjectRef, Value};
    use crate::patch::scheduler::{flush, flush_test_lock};
    use std::sync::atomic::AtomicUsize;

    fn fresh_root() -> Node {
        wrap(Value::Object(ObjectRef::new())).unwrap()
    }

    #[test]
    fn immediate_delivers_a_snapshot_synchronously() {
        let _guard = flush_test_lock();
        let node = fresh_root();
        node.as_object().unwrap().set("a", Value::Int(1)).unwrap();
        flush();

        let events = Arc::new(Mutex::new(Vec::new()));
        let events2 = Arc::clone(&events);
        let _watcher = watch(
            &node,
            move |event| events2.lock().push(event.clone()),
            WatchOptions {
                immediate: true,
                ..Default::default()
            },
        );

        let seen = events.lock();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].patches.is_empty());
        assert_eq!(seen[0].version, None);
        let Some(Value::Object(snap)) = &seen[0].new_value else {
            panic!("expected snapshot");
        };
        assert_eq!(snap.get_raw("a"), Some(Value::Int(1)));
    }

    #[test]
    fn batched_events_carry_version_and_snapshots() {
        let _guard = flush_test_lock();
        let node = fresh_root();
        let view = node.as_object().unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let events2 = Arc::clone(&events);
        let _watcher = watch(
            &node,
            move |event| events2.lock().push(event.clone()),
            WatchOptions::default(),
        );

        view.set("n", Value::Int(1)).unwrap();
        flush();
        view.set("n", Value::Int(2)).unwrap();
        flush();

        let seen = events.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].version, Some(1));
        assert_eq!(seen[0].old_value, None);
        assert_eq!(seen[1].version, Some(2));

        let Some(Value::Object(old)) = &seen[1].old_value else {
            panic!("expected previous snapshot");
        };
        assert_eq!(old.get_raw("n"), Some(Value::Int(1)));
        let Some(Value::Object(new)) = &seen[1].new_value else {
            panic!("expected snapshot");
        };
        assert_eq!(new.get_raw("n"), Some(Value::Int(2)));
    }

    #[test]
    fn once_stops_after_first_delivery() {
        let _guard = flush_test_lock();
        let node = fresh_root();
        let view = node.as_object().unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        let watcher = watch(
            &node,
            move |_| {
                calls2.fetch_add(1, Ordering::SeqCst);
            },
            WatchOptions {
                once: true,
                ..Default::default()
            },
        );

        view.set("a", Value::Int(1)).unwrap();
        flush();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(watcher.is_stopped());

        view.set("b", Value::Int(2)).unwrap();
        flush();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_listening_blocks_scheduled_deliveries() {
        let _guard = flush_test_lock();
        let node = fresh_root();
        let view = node.as_object().unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        let watcher = watch(
            &node,
            move |_| {
                calls2.fetch_add(1, Ordering::SeqCst);
            },
            WatchOptions::default(),
        );

        view.set("a", Value::Int(1)).unwrap();
        // Patches are queued for this tick; stopping must still win.
        watcher.stop_listening();
        flush();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        watcher.stop_listening();
        assert!(watcher.is_stopped());
    }

    #[test]
    fn cleanups_run_before_next_delivery_and_on_stop() {
        let _guard = flush_test_lock();
        let node = fresh_root();
        let view = node.as_object().unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let order2 = Arc::clone(&order);
        let watcher = watch(
            &node,
            move |_| order2.lock().push("deliver"),
            WatchOptions::default(),
        );

        let order3 = Arc::clone(&order);
        watcher.register_cleanup(move || order3.lock().push("cleanup"));

        view.set("a", Value::Int(1)).unwrap();
        flush();
        assert_eq!(*order.lock(), vec!["cleanup", "deliver"]);

        let order4 = Arc::clone(&order);
        watcher.register_cleanup(move || order4.lock().push("stop-cleanup"));
        watcher.stop_listening();
        assert_eq!(*order.lock(), vec!["cleanup", "deliver", "stop-cleanup"]);

        // A stopped watcher runs new cleanups immediately.
        let order5 = Arc::clone(&order);
        watcher.register_cleanup(move || order5.lock().push("late"));
        assert_eq!(
            *order.lock(),
            vec!["cleanup", "deliver", "stop-cleanup", "late"]
        );
    }
}
