//! Root Registry
//!
//! Process-wide map from `RootId` to that root's delivery state: version
//! counter, pending patch queue, and subscriber lists. Roots are fully
//! isolated; state is reclaimed once a root has no listeners, no pending
//! patches, and no live nodes.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::trace;

use crate::graph::{Node, RootId};

use super::types::{DeepPatch, DeepPatchBatch};

pub(crate) type BatchedCallback = Arc<dyn Fn(&DeepPatchBatch) + Send + Sync>;
pub(crate) type JitCallback = Arc<dyn Fn(&[DeepPatch]) + Send + Sync>;

#[derive(Clone)]
pub(crate) struct BatchedListener {
    pub active: Arc<AtomicBool>,
    pub callback: BatchedCallback,
}

#[derive(Clone)]
pub(crate) struct JitListener {
    pub active: Arc<AtomicBool>,
    pub callback: JitCallback,
}

#[derive(Default)]
pub(crate) struct RootState {
    pub version: AtomicU64,
    pub pending: Mutex<Vec<DeepPatch>>,
    pub batched: Mutex<Vec<BatchedListener>>,
    pub jit: Mutex<Vec<JitListener>>,
    live_nodes: AtomicUsize,
}

impl RootState {
    fn is_reclaimable(&self) -> bool {
        self.live_nodes.load(Ordering::SeqCst) == 0
            && self.batched.lock().is_empty()
            && self.jit.lock().is_empty()
            && self.pending.lock().is_empty()
    }
}

fn roots() -> &'static DashMap<RootId, Arc<RootState>> {
    static ROOTS: OnceLock<DashMap<RootId, Arc<RootState>>> = OnceLock::new();
    ROOTS.get_or_init(DashMap::new)
}

pub(crate) fn state_for(root: RootId) -> Arc<RootState> {
    roots()
        .entry(root)
        .or_insert_with(|| Arc::new(RootState::default()))
        .clone()
}

pub(crate) fn get(root: RootId) -> Option<Arc<RootState>> {
    roots().get(&root).map(|entry| entry.clone())
}

pub(crate) fn node_created(root: RootId) {
    state_for(root).live_nodes.fetch_add(1, Ordering::SeqCst);
}

pub(crate) fn node_dropped(root: RootId) {
    if let Some(state) = get(root) {
        state.live_nodes.fetch_sub(1, Ordering::SeqCst);
    }
    maybe_reclaim(root);
}

fn maybe_reclaim(root: RootId) {
    let removed = roots().remove_if(&root, |_, state| state.is_reclaimable());
    if removed.is_some() {
        trace!(?root, "root state reclaimed");
    }
}

/// Handle to one registered subscriber.
///
/// `unsubscribe` is synchronous and idempotent: after it returns, the
/// callback never fires again.
pub struct Subscription {
    root: RootId,
    active: Arc<AtomicBool>,
}

impl Subscription {
    pub fn root_id(&self) -> RootId {
        self.root
    }

    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(state) = get(self.root) {
            state
                .batched
                .lock()
                .retain(|l| !Arc::ptr_eq(&l.active, &self.active));
            state
                .jit
                .lock()
                .retain(|l| !Arc::ptr_eq(&l.active, &self.active));
        }
        maybe_reclaim(self.root);
    }
}

/// Receive every flushed patch batch for the graph this node belongs to.
pub fn subscribe_deep_mutations<F>(node: &Node, callback: F) -> Subscription
where
    F: Fn(&DeepPatchBatch) + Send + Sync + 'static,
{
    subscribe_deep_mutations_by_id(node.root_id(), callback)
}

/// Like [`subscribe_deep_mutations`], addressed by root id.
pub fn subscribe_deep_mutations_by_id<F>(root: RootId, callback: F) -> Subscription
where
    F: Fn(&DeepPatchBatch) + Send + Sync + 'static,
{
    let state = state_for(root);
    let active = Arc::new(AtomicBool::new(true));
    state.batched.lock().push(BatchedListener {
        active: Arc::clone(&active),
        callback: Arc::new(callback),
    });
    Subscription { root, active }
}

/// Register a just-in-time listener: called synchronously with every
/// mutation's patch group as it happens.
pub(crate) fn register_jit<F>(root: RootId, callback: F) -> Subscription
where
    F: Fn(&[DeepPatch]) + Send + Sync + 'static,
{
    let state = state_for(root);
    let active = Arc::new(AtomicBool::new(true));
    state.jit.lock().push(JitListener {
        active: Arc::clone(&active),
        callback: Arc::new(callback),
    });
    Subscription { root, active }
}
