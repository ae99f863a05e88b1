//! Deep Wrapping Engine
//!
//! This module turns raw container graphs into reactive node trees:
//!
//! - `value`: the dynamic value model (scalars, object/array/Set handles,
//!   foreign passthrough) with reference semantics and SameValueZero
//!   equality.
//! - `node`: lazy wrapping, per-property cells, typed object access.
//! - `array` / `set`: the array and Set access contracts.
//! - `identity`: synthetic-id resolution for Set members.
//! - `path` / `options`: patch addressing and per-root configuration.
//!
//! Mutations performed through the typed views update the raw containers,
//! invalidate exactly the cells that cover the touched location, and queue
//! path-addressed patches for the delivery layer.

mod array;
mod identity;
mod node;
mod options;
mod path;
mod set;
mod value;

pub use array::{ArrayCells, ArrayNode};
pub use node::{
    is_wrapped, node_of, root_id_of, wrap, wrap_with, Node, ObjectNode, RootId, Slot,
};
pub use options::{GeneratedProps, PropGenContext, PropGenerator, WrapOptions};
pub use path::PathSegment;
pub use set::{add_with_id, SetNode};
pub use value::{
    is_shallow, set_synthetic_id, shallow, ArrayRef, ForeignRef, GetterFn, ObjectRef, SetRef,
    SetterFn, Value,
};

pub(crate) use node::snapshot_value;
pub(crate) use path::is_strictly_under;
