//! Set Access Contract
//!
//! Sets have no keys, so container members are addressed by synthetic id
//! (see the identity module for resolution). Each Set node carries a
//! `SetMeta`: a bidirectional map between member identity and synthetic id,
//! filled in on first structural observation and emptied only when the
//! member leaves the Set. Resolution records any still-unobserved raw
//! members first, so an id can never collide with one a current member
//! would resolve to.
//!
//! Membership reads (`has`, `size`, iteration) track the node's shape cell;
//! duplicate adds, deletes of non-members, and clearing an empty Set are
//! complete no-ops.

use std::collections::{HashMap, HashSet};
use std::fmt;

use parking_lot::Mutex;

use crate::error::Result;
use crate::patch::scheduler;
use crate::patch::types::DeepPatch;

use super::identity::{resolve_identity, ResolvedIdentity};
use super::node::{flatten_value, wrap_child, Node, Slot};
use super::path::PathSegment;
use super::value::{set_synthetic_id, SetRef, Value};

/// Identity bookkeeping for one Set node.
#[derive(Default)]
pub(crate) struct SetMeta {
    id_for_object: Mutex<HashMap<usize, String>>,
    object_for_id: Mutex<HashMap<String, Value>>,
}

impl SetMeta {
    fn id_of(&self, identity: usize) -> Option<String> {
        self.id_for_object.lock().get(&identity).cloned()
    }

    fn owner_of(&self, id: &str) -> Option<usize> {
        self.object_for_id.lock().get(id).and_then(Value::identity)
    }

    fn member_for(&self, id: &str) -> Option<Value> {
        self.object_for_id.lock().get(id).cloned()
    }

    fn record(&self, identity: usize, id: String, member: Value) {
        self.id_for_object.lock().insert(identity, id.clone());
        self.object_for_id.lock().insert(id, member);
    }

    fn remove(&self, identity: usize) {
        if let Some(id) = self.id_for_object.lock().remove(&identity) {
            self.object_for_id.lock().remove(&id);
        }
    }

    fn clear(&self) {
        self.id_for_object.lock().clear();
        self.object_for_id.lock().clear();
    }
}

/// Typed view over a wrapped Set.
#[derive(Clone)]
pub struct SetNode {
    node: Node,
    raw: SetRef,
}

impl SetNode {
    pub(crate) fn new(node: Node, raw: SetRef) -> Self {
        Self { node, raw }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    /// The underlying raw Set, untracked.
    pub fn raw(&self) -> SetRef {
        self.raw.clone()
    }

    fn meta(&self) -> &SetMeta {
        &self.node.inner.set_meta
    }

    fn resolve(&self, member: &Value, for_add: bool) -> ResolvedIdentity {
        self.record_unobserved_members(member);
        let prior = member.identity().and_then(|ident| self.meta().id_of(ident));
        let set_path = self.node.path().unwrap_or_default();
        resolve_identity(
            member,
            &set_path,
            self.node.options(),
            prior,
            &|id| self.meta().owner_of(id),
            for_add,
        )
    }

    /// Record ids for raw members this Set has not observed yet, in
    /// insertion order, stopping at the member being resolved. Collision
    /// detection then covers every current member that outranks it,
    /// including ones present in the raw Set before wrapping; later members
    /// resolve on their own turn.
    fn record_unobserved_members(&self, resolving: &Value) {
        let set_path = self.node.path().unwrap_or_default();
        for member in self.raw.members_raw() {
            if member.identity() == resolving.identity() {
                break;
            }
            if !member.is_wrappable() {
                continue;
            }
            let Some(identity) = member.identity() else {
                continue;
            };
            if self.meta().id_of(identity).is_some() {
                continue;
            }
            let resolved = resolve_identity(
                &member,
                &set_path,
                self.node.options(),
                None,
                &|id| self.meta().owner_of(id),
                false,
            );
            self.meta()
                .record(identity, resolved.id.clone(), member.clone());
            set_synthetic_id(&member, resolved.id);
        }
    }

    /// Resolve (recording the id) and wrap an existing member. Records ids
    /// but never writes fields or emits patches.
    fn member_slot(&self, member: &Value) -> Slot {
        if member.is_wrappable() {
            let resolved = self.resolve(member, false);
            if let Some(identity) = member.identity() {
                self.meta()
                    .record(identity, resolved.id.clone(), member.clone());
            }
            set_synthetic_id(member, resolved.id.clone());
            Slot::Child(wrap_child(
                &self.node,
                PathSegment::Key(resolved.id),
                member,
            ))
        } else {
            Slot::Leaf(member.clone())
        }
    }

    /// Add a member. Re-adding a present identity is a complete no-op (the
    /// existing member's slot comes back unchanged).
    pub fn add(&self, value: impl Into<Value>) -> Slot {
        let value = value.into();
        if self.raw.contains_raw(&value) {
            return self.member_slot(&value);
        }
        if !value.is_wrappable() {
            self.raw.insert_raw(value.clone());
            self.node.inner.bump_shape();
            if let Some(set_path) = self.node.path() {
                self.node
                    .emit(vec![DeepPatch::set_add(set_path, vec![value.to_json()])]);
            }
            return Slot::Leaf(value);
        }

        let resolved = self.resolve(&value, true);
        let id = resolved.id.clone();
        let mut extra_keys: Vec<String> = Vec::new();
        if let Value::Object(obj) = &value {
            for (key, prop) in &resolved.extra_props {
                obj.insert_raw(key.clone(), prop.clone());
                extra_keys.push(key.clone());
            }
            if resolved.from_generator {
                if let Some(name) = &self.node.options().synthetic_id_property_name {
                    if obj.get_raw(name).is_none() {
                        obj.insert_raw(name.clone(), Value::Str(id.clone()));
                    }
                }
            }
        }
        if let Some(identity) = value.identity() {
            self.meta().record(identity, id.clone(), value.clone());
        }
        set_synthetic_id(&value, id.clone());
        self.raw.insert_raw(value.clone());
        self.node.inner.bump_shape();

        if let Some(set_path) = self.node.path() {
            let mut member_path = set_path;
            member_path.push(PathSegment::Key(id.clone()));
            let mut patches = Vec::new();
            // Generator-attached properties land ahead of the member's
            // structural patch.
            if let Value::Object(obj) = &value {
                for key in &extra_keys {
                    if let Some(prop) = obj.get_raw(key) {
                        let mut path = member_path.clone();
                        path.push(PathSegment::Key(key.clone()));
                        patches.push(DeepPatch::leaf_add(path, &prop));
                    }
                }
            }
            flatten_value(
                &member_path,
                &value,
                self.node.options(),
                &extra_keys,
                &mut HashSet::new(),
                &mut patches,
            );
            self.node.emit(patches);
        }
        Slot::Child(wrap_child(&self.node, PathSegment::Key(id), &value))
    }

    /// Remove a member. Non-members are a complete no-op.
    pub fn delete(&self, value: &Value) -> bool {
        if !self.raw.contains_raw(value) {
            return false;
        }
        if value.is_wrappable() {
            let resolved = self.resolve(value, false);
            self.raw.remove_raw(value);
            if let Some(identity) = value.identity() {
                self.meta().remove(identity);
            }
            self.node.inner.bump_shape();
            if let Some(mut path) = self.node.path() {
                path.push(PathSegment::Key(resolved.id));
                self.node.emit(vec![DeepPatch::set_remove(path, None)]);
            }
        } else {
            self.raw.remove_raw(value);
            self.node.inner.bump_shape();
            if let Some(set_path) = self.node.path() {
                self.node
                    .emit(vec![DeepPatch::set_remove(set_path, Some(value))]);
            }
        }
        true
    }

    /// Empty the Set. Pending patches under the Set's path are superseded
    /// and retracted; one empty Set-add patch replaces them. Clearing an
    /// empty Set does nothing.
    pub fn clear(&self) {
        if self.raw.len_raw() == 0 {
            return;
        }
        self.raw.clear_raw();
        self.meta().clear();
        self.node.inner.bump_shape();
        if let Some(set_path) = self.node.path() {
            scheduler::retract_under(self.node.root_id(), &set_path);
            self.node
                .emit(vec![DeepPatch::set_add(set_path, Vec::new())]);
        }
    }

    /// Tracked membership check.
    pub fn has(&self, value: &Value) -> bool {
        self.node.inner.shape_cell().get();
        self.raw.contains_raw(value)
    }

    /// Tracked size read.
    pub fn size(&self) -> usize {
        self.node.inner.shape_cell().get();
        self.raw.len_raw()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Tracked iteration in insertion order, wrapping container members
    /// lazily with synthetic-id resolution.
    pub fn iter(&self) -> Vec<Slot> {
        self.node.inner.shape_cell().get();
        self.raw
            .members_raw()
            .into_iter()
            .map(|member| self.member_slot(&member))
            .collect()
    }

    pub fn first(&self) -> Option<Slot> {
        self.iter().into_iter().next()
    }

    pub fn for_each(&self, mut f: impl FnMut(&Slot)) {
        for slot in self.iter() {
            f(&slot);
        }
    }

    /// Untracked reverse lookup: the member Node for a synthetic id this
    /// Set has assigned.
    pub fn get_by_id(&self, id: &str) -> Option<Node> {
        let member = self.meta().member_for(id)?;
        Some(wrap_child(
            &self.node,
            PathSegment::Key(id.to_string()),
            &member,
        ))
    }
}

impl fmt::Debug for SetNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetNode")
            .field("size", &self.raw.len_raw())
            .finish()
    }
}

/// Preassign a synthetic id, then add. The returned slot is the wrapped
/// entry for containers; for primitives the id is ignored.
pub fn add_with_id(set: &SetNode, entry: Value, id: impl Into<String>) -> Result<Slot> {
    set_synthetic_id(&entry, id);
    Ok(set.add(entry))
}
