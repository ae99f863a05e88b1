//! Flush Scheduling
//!
//! Every mutation appends its patch group to the owning root's pending
//! queue and hands the same group, synchronously, to any just-in-time
//! listeners. The first append in an idle period schedules exactly one
//! flush via an atomic flag and a `tokio::sync::Notify`.
//!
//! `flush()` is synchronous and public: tests call it directly for
//! determinism, and async programs spawn the driver task instead, which
//! waits on the notify, yields once so the mutating task finishes its
//! current step, then flushes.
//!
//! Mutations performed inside a delivered callback re-enter the queue and
//! re-schedule; they belong to the next batch, never the current one.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, error, trace};

use crate::graph::{is_strictly_under, PathSegment, RootId};

use super::registry;
use super::types::{DeepPatch, DeepPatchBatch, PatchKind};

static SCHEDULED: AtomicBool = AtomicBool::new(false);

fn notify() -> &'static Arc<Notify> {
    static NOTIFY: OnceLock<Arc<Notify>> = OnceLock::new();
    NOTIFY.get_or_init(|| Arc::new(Notify::new()))
}

/// Roots with queued patches, in first-dirtied order.
fn dirty_roots() -> &'static Mutex<Vec<RootId>> {
    static DIRTY: OnceLock<Mutex<Vec<RootId>>> = OnceLock::new();
    DIRTY.get_or_init(|| Mutex::new(Vec::new()))
}

/// Queue one mutation's patch group for its root.
///
/// Just-in-time listeners are called here, synchronously, before the group
/// enters the pending queue.
pub(crate) fn emit(root: RootId, patches: Vec<DeepPatch>) {
    if patches.is_empty() {
        return;
    }
    trace!(?root, count = patches.len(), "queueing patch group");
    let state = registry::state_for(root);

    let jit: Vec<registry::JitListener> = state.jit.lock().clone();
    for listener in jit {
        if !listener.active.load(Ordering::SeqCst) {
            continue;
        }
        if catch_unwind(AssertUnwindSafe(|| (listener.callback)(&patches))).is_err() {
            error!(?root, "just-in-time subscriber panicked");
        }
    }

    state.pending.lock().extend(patches);
    {
        let mut dirty = dirty_roots().lock();
        if !dirty.contains(&root) {
            dirty.push(root);
        }
    }
    if !SCHEDULED.swap(true, Ordering::SeqCst) {
        notify().notify_one();
    }
}

/// Drop pending patches superseded by a Set clear: everything strictly
/// under the Set's path, plus Set membership patches at the path itself.
pub(crate) fn retract_under(root: RootId, set_path: &[PathSegment]) {
    if let Some(state) = registry::get(root) {
        state.pending.lock().retain(|patch| {
            !(is_strictly_under(&patch.path, set_path)
                || (patch.path == set_path && patch.kind == Some(PatchKind::Set)))
        });
    }
}

/// Deliver every dirty root's pending patches to its batched subscribers.
///
/// Per non-empty root: the version increments once, the drained patches
/// ship as one `DeepPatchBatch`, and a panicking subscriber is logged
/// without affecting the others. Empty queues deliver and bump nothing.
pub fn flush() {
    SCHEDULED.store(false, Ordering::SeqCst);
    let roots: Vec<RootId> = {
        let mut dirty = dirty_roots().lock();
        dirty.drain(..).collect()
    };
    for root in roots {
        let Some(state) = registry::get(root) else {
            continue;
        };
        let patches = std::mem::take(&mut *state.pending.lock());
        if patches.is_empty() {
            continue;
        }
        let version = state.version.fetch_add(1, Ordering::SeqCst) + 1;
        let batch = DeepPatchBatch { version, patches };
        debug!(
            ?root,
            version,
            count = batch.patches.len(),
            "delivering patch batch"
        );
        let listeners: Vec<registry::BatchedListener> = state.batched.lock().clone();
        for listener in listeners {
            if !listener.active.load(Ordering::SeqCst) {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| (listener.callback)(&batch))).is_err() {
                error!(?root, version, "patch subscriber panicked");
            }
        }
    }
}

/// Spawn the ambient flush driver: waits for the first queued patch, lets
/// the current task yield, then flushes. Runs until aborted.
pub fn spawn_flush_driver() -> tokio::task::JoinHandle<()> {
    let notify = Arc::clone(notify());
    tokio::spawn(async move {
        loop {
            notify.notified().await;
            tokio::task::yield_now().await;
            flush();
        }
    })
}

/// Serializes tests that assert on flush-delivered batch shapes; `flush`
/// drains every dirty root, so concurrent tests would split each other's
/// batches.
#[cfg(test)]
pub(crate) fn flush_test_lock() -> parking_lot::MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(())).lock()
}
