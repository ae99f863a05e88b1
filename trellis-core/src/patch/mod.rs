//! Patch Delivery Layer
//!
//! Mutations through the typed graph views describe themselves as
//! path-addressed [`DeepPatch`] records. This module queues those records
//! per root, schedules a single flush per idle period, and delivers them:
//!
//! # How Delivery Works
//!
//! 1. A mutation emits one patch group. Just-in-time listeners see the
//!    group synchronously; batched delivery queues it on the owning root.
//! 2. The first queued group after an idle period schedules one flush.
//! 3. `flush` drains each dirty root in first-dirtied order, bumps that
//!    root's version once, and hands the whole queue to its subscribers
//!    as a [`DeepPatchBatch`]. A panicking subscriber is logged and the
//!    rest still run.
//! 4. Mutations made inside a callback re-enter the queue for the next
//!    batch.
//!
//! `watch` layers options (immediate call, stop-after-one, just-in-time
//! triggering, before/after snapshots) over the raw subscriptions.

pub(crate) mod registry;
pub(crate) mod scheduler;
pub(crate) mod types;
mod watch;

pub use registry::{subscribe_deep_mutations, subscribe_deep_mutations_by_id, Subscription};
pub use scheduler::{flush, spawn_flush_driver};
pub use types::{DeepPatch, DeepPatchBatch, PatchKind, PatchOp};
pub use watch::{watch, WatchEvent, WatchOptions, Watcher};
