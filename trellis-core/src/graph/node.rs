//! Deep Wrapping Engine
//!
//! `wrap` turns a raw container graph into a tree of reactive Nodes. Nodes
//! are created lazily: wrapping the root touches nothing below it, and a
//! child Node comes into existence the first time its container is read
//! through the wrapper.
//!
//! # How Wrapping Works
//!
//! 1. A process-wide registry maps raw container identity to its Node
//!    (weakly), so wrapping is idempotent: one Node per raw container, ever,
//!    while it is alive.
//!
//! 2. Each Node holds lazily-allocated per-property cells. A tracked read of
//!    `obj.a` allocates the cell for `"a"` once and registers the reader
//!    with exactly that cell, giving per-property invalidation granularity.
//!
//! 3. Child Nodes carry a weak link to their parent plus the key they live
//!    under; patch paths are assembled by climbing that chain to the root.
//!    A Node whose parent chain is broken mutates silently (no patches).
//!
//! 4. Mutations go through the typed views ([`ObjectNode`], `ArrayNode`,
//!    `SetNode`): they update the raw container, the affected cells, and
//!    queue patches in the same call.
//!
//! Options are fixed at root wrap time and inherited by every descendant.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use parking_lot::RwLock;
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::error::{Result, TrellisError};
use crate::patch::types::DeepPatch;
use crate::patch::{registry, scheduler};
use crate::reactive::{Cell, Derived};

use super::options::{PropGenContext, WrapOptions};
use super::path::{PathBuf, PathSegment};
use super::set::SetMeta;
use super::value::{ArrayRef, GetterFn, ObjectRef, SetRef, Value};

/// Identifies one wrapped root graph. Patches group and deliver per root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootId(u64);

impl RootId {
    fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// What a property read yields: a primitive (or passthrough) value, or the
/// wrapped Node of a child container.
#[derive(Clone, Debug)]
pub enum Slot {
    Leaf(Value),
    Child(Node),
}

impl Slot {
    /// The underlying value either way.
    pub fn as_value(&self) -> Value {
        match self {
            Slot::Leaf(v) => v.clone(),
            Slot::Child(n) => n.raw(),
        }
    }

    pub fn as_leaf(&self) -> Option<&Value> {
        match self {
            Slot::Leaf(v) => Some(v),
            Slot::Child(_) => None,
        }
    }

    pub fn as_child(&self) -> Option<&Node> {
        match self {
            Slot::Leaf(_) => None,
            Slot::Child(n) => Some(n),
        }
    }
}

impl PartialEq for Slot {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Slot::Leaf(a), Slot::Leaf(b)) => a == b,
            (Slot::Child(a), Slot::Child(b)) => a == b,
            _ => false,
        }
    }
}

/// Lazily allocated reactive state for one property of one Node.
#[derive(Default)]
struct PropCells {
    data: Option<Cell<Slot>>,
    getter: Option<Derived<Slot>>,
}

pub(crate) struct NodeInner {
    raw: Value,
    root: RootId,
    options: Arc<WrapOptions>,
    /// Weak link to the first live parent plus the segment this node lives
    /// under. Re-linked when a detached node is attached again.
    parent: RwLock<Option<(Weak<NodeInner>, PathSegment)>>,
    cells: RwLock<HashMap<PathSegment, PropCells>>,
    /// Bumped on key-set changes; tracked by keys/size/iteration reads.
    /// Created on first tracked use so untouched nodes stay cheap.
    shape: OnceLock<Cell<u64>>,
    pub(crate) set_meta: SetMeta,
}

impl NodeInner {
    pub(crate) fn shape_cell(&self) -> &Cell<u64> {
        self.shape.get_or_init(|| Cell::new(0))
    }

    pub(crate) fn bump_shape(&self) {
        // Nobody tracked the shape yet if the cell was never created.
        if let Some(cell) = self.shape.get() {
            cell.update(|v| v + 1);
        }
    }

    /// Update the property cell if it exists; readers that never touched
    /// the property have nothing to invalidate.
    pub(crate) fn update_data_cell(&self, seg: &PathSegment, slot: Slot) {
        let cell = self
            .cells
            .read()
            .get(seg)
            .and_then(|slots| slots.data.clone());
        if let Some(cell) = cell {
            cell.set(slot);
        }
    }

    /// Current raw value at a segment, container kind permitting. Arrays
    /// answer `"length"` with their current length so the length cell seeds
    /// correctly.
    fn raw_at(&self, seg: &PathSegment) -> Option<Value> {
        match (&self.raw, seg) {
            (Value::Object(obj), PathSegment::Key(key)) => obj.get_raw(key),
            (Value::Array(arr), PathSegment::Index(i)) => arr.get_raw(*i),
            (Value::Array(arr), PathSegment::Key(key)) if key == "length" => {
                Some(Value::Int(arr.len_raw() as i64))
            }
            _ => None,
        }
    }
}

impl Drop for NodeInner {
    fn drop(&mut self) {
        if let Some(key) = self.raw.identity() {
            nodes().remove(&key);
        }
        registry::node_dropped(self.root);
    }
}

/// Handle to the reactive wrapper of exactly one raw container.
///
/// Cheap to clone; clones share all state. Compare with `==` for wrapper
/// identity.
#[derive(Clone)]
pub struct Node {
    pub(crate) inner: Arc<NodeInner>,
}

fn nodes() -> &'static DashMap<usize, Weak<NodeInner>> {
    static NODES: OnceLock<DashMap<usize, Weak<NodeInner>>> = OnceLock::new();
    NODES.get_or_init(DashMap::new)
}

/// The existing Node for a raw container, if one is alive.
pub(crate) fn existing_node_for(value: &Value) -> Option<Node> {
    let key = value.identity()?;
    let entry = nodes().get(&key)?;
    match entry.upgrade() {
        Some(inner) => Some(Node { inner }),
        None => {
            drop(entry);
            nodes().remove(&key);
            None
        }
    }
}

fn create_node(
    raw: Value,
    root: RootId,
    options: Arc<WrapOptions>,
    parent: Option<(Weak<NodeInner>, PathSegment)>,
) -> Node {
    let inner = Arc::new(NodeInner {
        raw,
        root,
        options,
        parent: RwLock::new(parent),
        cells: RwLock::new(HashMap::new()),
        shape: OnceLock::new(),
        set_meta: SetMeta::default(),
    });
    if let Some(key) = inner.raw.identity() {
        nodes().insert(key, Arc::downgrade(&inner));
    }
    registry::node_created(root);
    trace!(root = ?root, "node created");
    Node { inner }
}

/// Wrap a raw container graph with default options.
///
/// Idempotent: wrapping an already-wrapped container returns its existing
/// Node. Anything but a non-shallow object, array, or Set is rejected.
pub fn wrap(raw: Value) -> Result<Node> {
    wrap_with(raw, WrapOptions::default())
}

/// Wrap a raw container graph as a new root with the given options.
///
/// If the container is already wrapped (as a root or as a child of another
/// graph), the existing Node is returned and `options` is ignored.
pub fn wrap_with(raw: Value, options: WrapOptions) -> Result<Node> {
    if !raw.is_wrappable() {
        return Err(TrellisError::UnsupportedRoot);
    }
    if let Some(existing) = existing_node_for(&raw) {
        return Ok(existing);
    }
    let root = RootId::new();
    debug!(?root, "wrapping new root");
    Ok(create_node(raw, root, Arc::new(options), None))
}

/// Wrap (or re-link) a child container under `parent` at `seg`.
///
/// First live parent wins: an existing Node keeps its current parent link
/// unless that link is dead or absent.
pub(crate) fn wrap_child(parent: &Node, seg: PathSegment, raw: &Value) -> Node {
    if let Some(existing) = existing_node_for(raw) {
        let mut link = existing.inner.parent.write();
        let detached = match &*link {
            None => true,
            Some((weak, _)) => weak.upgrade().is_none(),
        };
        if detached {
            *link = Some((Arc::downgrade(&parent.inner), seg));
        }
        drop(link);
        return existing;
    }
    create_node(
        raw.clone(),
        parent.inner.root,
        Arc::clone(&parent.inner.options),
        Some((Arc::downgrade(&parent.inner), seg)),
    )
}

pub(crate) fn slot_for(parent: &Node, seg: &PathSegment, value: &Value) -> Slot {
    if value.is_wrappable() {
        Slot::Child(wrap_child(parent, seg.clone(), value))
    } else {
        Slot::Leaf(value.clone())
    }
}

/// Has this raw container been wrapped (and is its Node still alive)?
pub fn is_wrapped(value: &Value) -> bool {
    existing_node_for(value).is_some()
}

/// The root id of the graph a wrapped container belongs to.
pub fn root_id_of(value: &Value) -> Option<RootId> {
    existing_node_for(value).map(|n| n.root_id())
}

/// The existing Node for a wrapped container, or `NotAWrappedRoot`.
pub fn node_of(value: &Value) -> Result<Node> {
    existing_node_for(value).ok_or(TrellisError::NotAWrappedRoot)
}

impl Node {
    pub fn root_id(&self) -> RootId {
        self.inner.root
    }

    /// The underlying raw container, untracked.
    pub fn raw(&self) -> Value {
        self.inner.raw.clone()
    }

    pub(crate) fn options(&self) -> &WrapOptions {
        &self.inner.options
    }

    /// The property cell for `seg`, allocated and seeded from the raw
    /// container on first use.
    pub(crate) fn data_cell(&self, seg: PathSegment) -> Cell<Slot> {
        if let Some(cell) = self
            .inner
            .cells
            .read()
            .get(&seg)
            .and_then(|slots| slots.data.clone())
        {
            return cell;
        }
        let mut cells = self.inner.cells.write();
        let slots = cells.entry(seg.clone()).or_default();
        match &slots.data {
            Some(cell) => cell.clone(),
            None => {
                let seed = match self.inner.raw_at(&seg) {
                    Some(value) => slot_for(self, &seg, &value),
                    None => Slot::Leaf(Value::Null),
                };
                trace!(?seg, "allocating property cell");
                let cell = Cell::new(seed);
                slots.data = Some(cell.clone());
                cell
            }
        }
    }

    pub(crate) fn update_data_cell(&self, seg: &PathSegment, slot: Slot) {
        self.inner.update_data_cell(seg, slot);
    }

    /// Absolute path of this node, assembled by climbing the parent chain.
    /// `None` when any link on the way up is dead (detached subtree).
    pub(crate) fn path(&self) -> Option<Vec<PathSegment>> {
        let mut segs: PathBuf = SmallVec::new();
        let mut current = Arc::clone(&self.inner);
        loop {
            let link = current.parent.read().clone();
            match link {
                None => break,
                Some((weak, seg)) => {
                    let parent = weak.upgrade()?;
                    segs.push(seg);
                    current = parent;
                }
            }
        }
        segs.reverse();
        Some(segs.into_vec())
    }

    pub(crate) fn emit(&self, patches: Vec<DeepPatch>) {
        if patches.is_empty() {
            return;
        }
        scheduler::emit(self.inner.root, patches);
    }

    pub fn as_object(&self) -> Option<ObjectNode> {
        match &self.inner.raw {
            Value::Object(obj) => Some(ObjectNode {
                node: self.clone(),
                raw: obj.clone(),
            }),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<super::array::ArrayNode> {
        match &self.inner.raw {
            Value::Array(arr) => Some(super::array::ArrayNode::new(self.clone(), arr.clone())),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<super::set::SetNode> {
        match &self.inner.raw {
            Value::Set(set) => Some(super::set::SetNode::new(self.clone(), set.clone())),
            _ => None,
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Node {}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("root", &self.inner.root)
            .field("raw", &self.inner.raw)
            .finish()
    }
}

/// Typed view over a wrapped plain object.
#[derive(Clone)]
pub struct ObjectNode {
    node: Node,
    raw: ObjectRef,
}

impl ObjectNode {
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// The underlying raw object, untracked.
    pub fn raw(&self) -> ObjectRef {
        self.raw.clone()
    }

    /// Tracked property read.
    ///
    /// Allocates the property cell on first access; absent keys are tracked
    /// too (so a later assignment re-runs readers) but return `None` until
    /// the key exists. Getter-defined properties read through their derived
    /// cell.
    pub fn get(&self, key: &str) -> Option<Slot> {
        if let Some(getter) = self.raw.getter(key) {
            return Some(self.getter_cell(key, getter).get());
        }
        let cell = self.node.data_cell(PathSegment::Key(key.to_string()));
        let slot = cell.get();
        if self.raw.contains_key_raw(key) {
            Some(slot)
        } else {
            None
        }
    }

    /// Untracked raw read.
    pub fn peek(&self, key: &str) -> Option<Value> {
        self.raw.get_raw(key)
    }

    /// The property's cell as a read-only handle, allocated if needed.
    /// Covers data properties; getter names are served by [`Self::get`].
    pub fn cell(&self, key: &str) -> crate::reactive::ReadonlyCell<Slot> {
        self.node
            .data_cell(PathSegment::Key(key.to_string()))
            .readonly()
    }

    fn getter_cell(&self, key: &str, getter: GetterFn) -> Derived<Slot> {
        let seg = PathSegment::Key(key.to_string());
        if let Some(derived) = self
            .node
            .inner
            .cells
            .read()
            .get(&seg)
            .and_then(|slots| slots.getter.clone())
        {
            return derived;
        }
        let mut cells = self.node.inner.cells.write();
        let slots = cells.entry(seg).or_default();
        match &slots.getter {
            Some(derived) => derived.clone(),
            None => {
                let weak = Arc::downgrade(&self.node.inner);
                let derived = Derived::new(move || {
                    let Some(inner) = weak.upgrade() else {
                        return Slot::Leaf(Value::Null);
                    };
                    let node = Node { inner };
                    let Some(view) = node.as_object() else {
                        return Slot::Leaf(Value::Null);
                    };
                    let value = getter(&view);
                    match existing_node_for(&value) {
                        Some(child) => Slot::Child(child),
                        None => Slot::Leaf(value),
                    }
                });
                slots.getter = Some(derived.clone());
                derived
            }
        }
    }

    /// Assign a property through the wrapper.
    ///
    /// Enforces read-only configuration, delegates to a defined setter,
    /// wraps incoming containers, and queues patches per the assignment
    /// matrix.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let old = self.raw.get_raw(key);
        if old.is_some() && self.node.inner.options.is_read_only(key) {
            return Err(TrellisError::ReadonlyViolation(key.to_string()));
        }
        if let Some(setter) = self.raw.setter(key) {
            setter(self, value);
            return Ok(());
        }

        let seg = PathSegment::Key(key.to_string());
        let slot = slot_for(&self.node, &seg, &value);
        self.raw.insert_raw(key, value.clone());
        self.node.inner.update_data_cell(&seg, slot);
        if old.is_none() {
            self.node.inner.bump_shape();
        }

        if let Some(mut path) = self.node.path() {
            path.push(seg);
            let patches =
                assignment_patches(path, old.as_ref(), &value, &self.node.inner.options);
            self.node.emit(patches);
        }
        Ok(())
    }

    /// Delete a property. Absent keys are a complete no-op.
    pub fn delete(&self, key: &str) -> bool {
        if !self.raw.remove_raw(key) {
            return false;
        }
        let seg = PathSegment::Key(key.to_string());
        self.node.inner.update_data_cell(&seg, Slot::Leaf(Value::Null));
        self.node.inner.bump_shape();
        if let Some(mut path) = self.node.path() {
            path.push(seg);
            self.node.emit(vec![DeepPatch::remove(path)]);
        }
        true
    }

    /// Property names in insertion order, getter names included. Tracked
    /// via the shape cell.
    pub fn keys(&self) -> Vec<String> {
        self.node.inner.shape_cell().get();
        let mut keys = self.raw.keys_raw();
        for name in self.raw.getter_names() {
            if !keys.contains(&name) {
                keys.push(name);
            }
        }
        keys
    }

    /// All properties with their slots; tracks the shape and every
    /// property cell.
    pub fn entries(&self) -> Vec<(String, Slot)> {
        self.keys()
            .into_iter()
            .filter_map(|key| self.get(&key).map(|slot| (key, slot)))
            .collect()
    }

    /// Shape-tracked key presence check.
    pub fn contains_key(&self, key: &str) -> bool {
        self.node.inner.shape_cell().get();
        self.raw.contains_key_raw(key) || self.raw.getter(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ObjectNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectNode")
            .field("root", &self.node.inner.root)
            .field("len", &self.raw.len_raw())
            .finish()
    }
}

/// Patches for one assignment, per the matrix: fresh or
/// primitive-overwriting assignments flatten deep, primitive results are a
/// single leaf patch, container-over-container emits nothing.
pub(crate) fn assignment_patches(
    target_path: Vec<PathSegment>,
    old: Option<&Value>,
    new: &Value,
    options: &WrapOptions,
) -> Vec<DeepPatch> {
    let old_is_container = old.map(Value::is_container).unwrap_or(false);
    if !old_is_container {
        let mut out = Vec::new();
        flatten_value(&target_path, new, options, &[], &mut HashSet::new(), &mut out);
        out
    } else if !new.is_container() {
        vec![DeepPatch::leaf_add(target_path, new)]
    } else {
        Vec::new()
    }
}

/// Pre-order flatten of a value landing at `path`.
///
/// Containers produce a structural patch followed by their entries;
/// primitives, foreign values, and shallow containers collapse to one leaf
/// patch. Aliased or cyclic containers are emitted once.
pub(crate) fn flatten_value(
    path: &[PathSegment],
    value: &Value,
    options: &WrapOptions,
    skip_keys: &[String],
    visited: &mut HashSet<usize>,
    out: &mut Vec<DeepPatch>,
) {
    if !value.is_wrappable() {
        out.push(DeepPatch::leaf_add(path.to_vec(), value));
        return;
    }
    match value {
        Value::Object(obj) => {
            if !visited.insert(obj.ptr_id()) {
                return;
            }
            // A configured generator supplies ids for plain objects that
            // lack the id field; the field becomes real data here.
            if let (Some(id_name), Some(generator)) =
                (&options.synthetic_id_property_name, &options.prop_generator)
            {
                if obj.get_raw(id_name).is_none() {
                    let generated = generator(PropGenContext {
                        path,
                        in_set: false,
                        object: value,
                    });
                    if let Some(id) = generated.synthetic_id {
                        obj.insert_raw(id_name.clone(), Value::Str(id));
                    }
                }
            }
            out.push(DeepPatch::object_add(path.to_vec()));
            let id_field = options.id_field_name();
            if let Some(id_value) = obj.get_raw(id_field) {
                if !skip_keys.iter().any(|k| k == id_field) {
                    let mut id_path = path.to_vec();
                    id_path.push(PathSegment::Key(id_field.to_string()));
                    out.push(DeepPatch::leaf_add(id_path, &id_value));
                }
            }
            for (key, entry) in obj.entries_raw() {
                if key == id_field || skip_keys.contains(&key) {
                    continue;
                }
                let mut entry_path = path.to_vec();
                entry_path.push(PathSegment::Key(key));
                flatten_value(&entry_path, &entry, options, &[], visited, out);
            }
        }
        Value::Array(arr) => {
            if !visited.insert(arr.ptr_id()) {
                return;
            }
            out.push(DeepPatch::object_add(path.to_vec()));
            for (i, item) in arr.values_raw().into_iter().enumerate() {
                let mut item_path = path.to_vec();
                item_path.push(PathSegment::Index(i));
                flatten_value(&item_path, &item, options, &[], visited, out);
            }
        }
        Value::Set(set) => {
            if !visited.insert(set.ptr_id()) {
                return;
            }
            out.push(DeepPatch::set_add(path.to_vec(), Vec::new()));
            let mut assigned: HashMap<String, usize> = HashMap::new();
            for member in set.members_raw() {
                if member.is_wrappable() {
                    let resolved = super::identity::resolve_identity(
                        &member,
                        path,
                        options,
                        None,
                        &|id| assigned.get(id).copied(),
                        false,
                    );
                    super::value::set_synthetic_id(&member, resolved.id.clone());
                    if let Some(identity) = member.identity() {
                        assigned.insert(resolved.id.clone(), identity);
                    }
                    if resolved.from_generator {
                        if let (Some(id_name), Value::Object(obj)) =
                            (&options.synthetic_id_property_name, &member)
                        {
                            if obj.get_raw(id_name).is_none() {
                                obj.insert_raw(id_name.clone(), Value::Str(resolved.id.clone()));
                            }
                        }
                    }
                    let mut member_path = path.to_vec();
                    member_path.push(PathSegment::Key(resolved.id));
                    flatten_value(&member_path, &member, options, &[], visited, out);
                } else {
                    out.push(DeepPatch::set_add(path.to_vec(), vec![member.to_json()]));
                }
            }
        }
        // is_wrappable ruled everything else out.
        _ => {}
    }
}

/// Plain-data deep copy of a raw value, evaluating getters on objects whose
/// Node is alive. Used for watch snapshots; call under `untracked`.
pub(crate) fn snapshot_value(value: &Value) -> Value {
    snapshot_inner(value, &mut HashMap::new())
}

fn snapshot_inner(value: &Value, visited: &mut HashMap<usize, Value>) -> Value {
    match value {
        Value::Object(obj) => {
            if let Some(existing) = visited.get(&obj.ptr_id()) {
                return existing.clone();
            }
            let out = ObjectRef::new();
            visited.insert(obj.ptr_id(), Value::Object(out.clone()));
            for (key, entry) in obj.entries_raw() {
                out.insert_raw(key, snapshot_inner(&entry, visited));
            }
            if let Some(view) = existing_node_for(value).and_then(|n| n.as_object()) {
                for name in obj.getter_names() {
                    if let Some(getter) = obj.getter(&name) {
                        out.insert_raw(name, snapshot_inner(&getter(&view), visited));
                    }
                }
            }
            Value::Object(out)
        }
        Value::Array(arr) => {
            if let Some(existing) = visited.get(&arr.ptr_id()) {
                return existing.clone();
            }
            let out = ArrayRef::new();
            visited.insert(arr.ptr_id(), Value::Array(out.clone()));
            for item in arr.values_raw() {
                out.push_raw(snapshot_inner(&item, visited));
            }
            Value::Array(out)
        }
        Value::Set(set) => {
            if let Some(existing) = visited.get(&set.ptr_id()) {
                return existing.clone();
            }
            let out = SetRef::new();
            visited.insert(set.ptr_id(), Value::Set(out.clone()));
            for member in set.members_raw() {
                out.insert_raw(snapshot_inner(&member, visited));
            }
            Value::Set(out)
        }
        other => other.clone(),
    }
}
