//! Array Access Contract
//!
//! Arrays get per-index cells plus a dedicated length cell (addressed as
//! `"length"`). Index reads and writes behave like object properties;
//! structural operations (`push`, `pop`, `splice` and its thin wrappers)
//! group their index and length patches into one logical mutation.
//!
//! Implicit growth (writing past the end) keeps the length cell in sync but
//! only explicit length writes, inside `push`/`pop`/`splice`, produce a
//! length patch.

use std::fmt;

use crate::patch::types::DeepPatch;
use crate::reactive::ReadonlyCell;

use super::node::{assignment_patches, slot_for, Node, Slot};
use super::path::PathSegment;
use super::value::{ArrayRef, Value};

fn length_seg() -> PathSegment {
    PathSegment::Key("length".to_string())
}

/// Typed view over a wrapped array.
#[derive(Clone)]
pub struct ArrayNode {
    node: Node,
    raw: ArrayRef,
}

impl ArrayNode {
    pub(crate) fn new(node: Node, raw: ArrayRef) -> Self {
        Self { node, raw }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    /// The underlying raw array, untracked.
    pub fn raw(&self) -> ArrayRef {
        self.raw.clone()
    }

    /// Tracked index read. Out-of-bounds indices are tracked (a later write
    /// there re-runs readers) but return `None`.
    pub fn get(&self, index: usize) -> Option<Slot> {
        let cell = self.node.data_cell(PathSegment::Index(index));
        let slot = cell.get();
        if index < self.raw.len_raw() {
            Some(slot)
        } else {
            None
        }
    }

    /// Untracked raw read.
    pub fn peek(&self, index: usize) -> Option<Value> {
        self.raw.get_raw(index)
    }

    /// Tracked length read.
    pub fn len(&self) -> usize {
        match self.node.data_cell(length_seg()).get() {
            Slot::Leaf(Value::Int(n)) if n >= 0 => n as usize,
            _ => self.raw.len_raw(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sync_length(&self) {
        self.node.update_data_cell(
            &length_seg(),
            Slot::Leaf(Value::Int(self.raw.len_raw() as i64)),
        );
    }

    /// Assign an index through the wrapper. Writes past the end grow the
    /// array with nulls; the length cell syncs without a length patch.
    pub fn set(&self, index: usize, value: impl Into<Value>) {
        let value = value.into();
        let old = self.raw.get_raw(index);
        let grew = index >= self.raw.len_raw();
        let seg = PathSegment::Index(index);
        let slot = slot_for(&self.node, &seg, &value);
        self.raw.set_raw(index, value.clone());
        self.node.update_data_cell(&seg, slot);
        if grew {
            self.sync_length();
        }

        if let Some(mut path) = self.node.path() {
            path.push(seg);
            let patches = assignment_patches(path, old.as_ref(), &value, self.node.options());
            self.node.emit(patches);
        }
    }

    /// Append a value: one index patch then one explicit length patch, in a
    /// single mutation group.
    pub fn push(&self, value: impl Into<Value>) {
        let value = value.into();
        let index = self.raw.len_raw();
        let seg = PathSegment::Index(index);
        let slot = slot_for(&self.node, &seg, &value);
        self.raw.push_raw(value.clone());
        self.node.update_data_cell(&seg, slot);
        self.sync_length();

        if let Some(base) = self.node.path() {
            let mut index_path = base.clone();
            index_path.push(seg);
            let mut patches =
                assignment_patches(index_path, None, &value, self.node.options());
            let mut length_path = base;
            length_path.push(length_seg());
            patches.push(DeepPatch::leaf_add(
                length_path,
                &Value::Int((index + 1) as i64),
            ));
            self.node.emit(patches);
        }
    }

    /// Remove and return the last element: a removal patch then a length
    /// patch.
    pub fn pop(&self) -> Option<Value> {
        let len = self.raw.len_raw();
        if len == 0 {
            return None;
        }
        let last = self.raw.with_items_mut(|items| items.pop())?;
        let seg = PathSegment::Index(len - 1);
        self.node.update_data_cell(&seg, Slot::Leaf(Value::Null));
        self.sync_length();

        if let Some(base) = self.node.path() {
            let mut index_path = base.clone();
            index_path.push(seg);
            let mut length_path = base;
            length_path.push(length_seg());
            self.node.emit(vec![
                DeepPatch::remove(index_path),
                DeepPatch::leaf_add(length_path, &Value::Int((len - 1) as i64)),
            ]);
        }
        Some(last)
    }

    /// Remove `delete_count` elements at `start`, inserting `items` in
    /// their place; returns the removed elements.
    ///
    /// Shifted indices are rewritten through the assignment matrix,
    /// truncated tail indices emit removals, and one length patch closes
    /// the group when the length changed.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        items: Vec<Value>,
    ) -> Vec<Value> {
        let old = self.raw.values_raw();
        let old_len = old.len();
        let start = start.min(old_len);
        let delete_count = delete_count.min(old_len - start);
        let removed = old[start..start + delete_count].to_vec();

        self.raw.with_items_mut(|v| {
            v.splice(start..start + delete_count, items.iter().cloned());
        });
        let new = self.raw.values_raw();
        let new_len = new.len();

        // Same-size replacement touches only the replaced slots; otherwise
        // everything from `start` shifts.
        let affected_end = if delete_count == items.len() {
            start + items.len()
        } else {
            new_len
        };

        let base = self.node.path();
        let mut patches = Vec::new();
        for (i, item) in new.iter().enumerate().take(affected_end).skip(start) {
            let seg = PathSegment::Index(i);
            let slot = slot_for(&self.node, &seg, item);
            self.node.update_data_cell(&seg, slot);
            if let Some(base) = &base {
                let mut path = base.clone();
                path.push(seg);
                patches.extend(assignment_patches(
                    path,
                    old.get(i),
                    item,
                    self.node.options(),
                ));
            }
        }
        for i in new_len..old_len {
            let seg = PathSegment::Index(i);
            self.node.update_data_cell(&seg, Slot::Leaf(Value::Null));
            if let Some(base) = &base {
                let mut path = base.clone();
                path.push(seg);
                patches.push(DeepPatch::remove(path));
            }
        }
        if new_len != old_len {
            self.sync_length();
            if let Some(base) = &base {
                let mut path = base.clone();
                path.push(length_seg());
                patches.push(DeepPatch::leaf_add(path, &Value::Int(new_len as i64)));
            }
        }
        self.node.emit(patches);
        removed
    }

    pub fn insert(&self, index: usize, value: impl Into<Value>) {
        self.splice(index, 0, vec![value.into()]);
    }

    /// Remove and return the element at `index`, shifting the tail down.
    pub fn remove(&self, index: usize) -> Option<Value> {
        self.splice(index, 1, Vec::new()).into_iter().next()
    }

    /// Remove and return the first element.
    pub fn shift(&self) -> Option<Value> {
        self.splice(0, 1, Vec::new()).into_iter().next()
    }

    /// Prepend a value.
    pub fn unshift(&self, value: impl Into<Value>) {
        self.splice(0, 0, vec![value.into()]);
    }

    /// Punch a hole: the slot becomes null, the length stays.
    pub fn delete(&self, index: usize) -> bool {
        if index >= self.raw.len_raw() {
            return false;
        }
        self.raw.set_raw(index, Value::Null);
        let seg = PathSegment::Index(index);
        self.node.update_data_cell(&seg, Slot::Leaf(Value::Null));
        if let Some(mut path) = self.node.path() {
            path.push(seg);
            self.node.emit(vec![DeepPatch::remove(path)]);
        }
        true
    }

    /// Tracked full read: the length plus every index.
    pub fn iter(&self) -> Vec<Slot> {
        (0..self.len()).filter_map(|i| self.get(i)).collect()
    }

    /// Read-only handles to the per-index and length cells.
    pub fn cells(&self) -> ArrayCells {
        ArrayCells {
            node: self.node.clone(),
        }
    }
}

impl fmt::Debug for ArrayNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayNode")
            .field("len", &self.raw.len_raw())
            .finish()
    }
}

/// Index-cell view over a wrapped array. Handles are read-only; writes go
/// through [`ArrayNode`].
#[derive(Clone)]
pub struct ArrayCells {
    node: Node,
}

impl ArrayCells {
    pub fn index(&self, index: usize) -> ReadonlyCell<Slot> {
        self.node.data_cell(PathSegment::Index(index)).readonly()
    }

    pub fn length(&self) -> ReadonlyCell<Slot> {
        self.node.data_cell(length_seg()).readonly()
    }
}
