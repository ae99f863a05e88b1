//! Trellis Core
//!
//! This crate provides a fine-grained deep reactive state engine. It
//! implements:
//!
//! - Reactive primitives (cells, derived cells, effects, batching)
//! - Lazy deep wrapping of object/array/Set graphs with per-property cells
//! - Synthetic identity for Set members, so unordered collections stay
//!   addressable by path
//! - Batched and just-in-time delivery of path-addressed mutation patches
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: core reactive primitives and dependency tracking
//! - `graph`: the value model, lazy wrapping, and typed container views
//! - `patch`: patch queueing, flush scheduling, subscriptions, watchers
//! - `error`: the crate error type
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::{flush, subscribe_deep_mutations, wrap, ObjectRef, Value};
//!
//! let root = wrap(Value::Object(ObjectRef::new()))?;
//! let state = root.as_object().unwrap();
//!
//! let sub = subscribe_deep_mutations(&root, |batch| {
//!     for patch in &batch.patches {
//!         println!("v{} {:?}", batch.version, patch);
//!     }
//! });
//!
//! state.set("count", Value::Int(1))?;
//! flush(); // delivers one batch: [{path: ["count"], op: "add", value: 1}]
//! sub.unsubscribe();
//! ```

pub mod error;
pub mod graph;
pub mod patch;
pub mod reactive;

pub use error::{Result, TrellisError};
pub use graph::{
    add_with_id, is_shallow, is_wrapped, node_of, root_id_of, set_synthetic_id, shallow, wrap,
    wrap_with, ArrayCells, ArrayNode, ArrayRef, ForeignRef, GeneratedProps, GetterFn, Node,
    ObjectNode, ObjectRef, PathSegment, PropGenContext, PropGenerator, RootId, SetNode, SetRef,
    SetterFn, Slot, Value, WrapOptions,
};
pub use patch::{
    flush, spawn_flush_driver, subscribe_deep_mutations, subscribe_deep_mutations_by_id, watch,
    DeepPatch, DeepPatchBatch, PatchKind, PatchOp, Subscription, WatchEvent, WatchOptions, Watcher,
};
pub use reactive::{
    batch, cell, derived, untracked, Cell, CellId, Derived, Effect, ReadonlyCell,
};
