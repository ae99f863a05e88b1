//! Value Model
//!
//! The engine operates on a dynamic value tree: scalars plus three
//! container kinds (object, array, set) and an opaque "foreign" escape
//! hatch for anything the engine never wraps or inspects.
//!
//! # Reference Semantics
//!
//! Containers are cheap-clone handles (`Arc`-backed). Cloning a ref clones
//! the handle, not the data, and identity is pointer identity. This mirrors
//! how application code aliases subtrees of a state graph: two handles to
//! the same raw container always observe each other's mutations.
//!
//! # Equality
//!
//! Scalar equality is value-based with cross Int/Float numeric equality,
//! `-0.0 == +0.0`, and NaN equal to itself, so Set membership behaves the
//! way callers expect from identity-keyed collections. Containers and
//! foreign values compare by pointer.
//!
//! Mutating a container through its raw ref directly (bypassing the
//! wrapping layer) is allowed but invisible: no cells update and no patches
//! are emitted.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::{Mutex, RwLock};

use super::node::ObjectNode;

/// Getter definition attached to an object: computes a property value from
/// the wrapped node.
pub type GetterFn = Arc<dyn Fn(&ObjectNode) -> Value + Send + Sync>;
/// Setter definition attached to an object: consumes the assigned value.
pub type SetterFn = Arc<dyn Fn(&ObjectNode, Value) + Send + Sync>;

/// Per-container bookkeeping shared by all three container kinds.
#[derive(Default)]
pub(crate) struct ContainerMeta {
    /// Marked by `shallow()`: stored and returned by reference, never
    /// recursively wrapped.
    shallow: AtomicBool,
    /// Synthetic id preassigned via `set_synthetic_id` or remembered from a
    /// Set membership. Lives with the container, so it never outlives it.
    synthetic_id: Mutex<Option<String>>,
}

struct ObjectInner {
    entries: RwLock<IndexMap<String, Value>>,
    getters: RwLock<IndexMap<String, GetterFn>>,
    setters: RwLock<HashMap<String, SetterFn>>,
    meta: ContainerMeta,
}

/// Handle to a plain object: ordered string-keyed entries plus optional
/// accessor definitions.
#[derive(Clone)]
pub struct ObjectRef {
    inner: Arc<ObjectInner>,
}

impl ObjectRef {
    pub fn new() -> Self {
        Self::from_entries(IndexMap::new())
    }

    pub fn from_entries(entries: IndexMap<String, Value>) -> Self {
        Self {
            inner: Arc::new(ObjectInner {
                entries: RwLock::new(entries),
                getters: RwLock::new(IndexMap::new()),
                setters: RwLock::new(HashMap::new()),
                meta: ContainerMeta::default(),
            }),
        }
    }

    /// Raw entry read; no tracking, no wrapping.
    pub fn get_raw(&self, key: &str) -> Option<Value> {
        self.inner.entries.read().get(key).cloned()
    }

    /// Raw entry write; invisible to cells and the patch stream.
    pub fn insert_raw(&self, key: impl Into<String>, value: Value) {
        self.inner.entries.write().insert(key.into(), value);
    }

    /// Raw entry removal. Returns whether the key existed.
    pub fn remove_raw(&self, key: &str) -> bool {
        self.inner.entries.write().shift_remove(key).is_some()
    }

    pub fn contains_key_raw(&self, key: &str) -> bool {
        self.inner.entries.read().contains_key(key)
    }

    /// Data keys in insertion order.
    pub fn keys_raw(&self) -> Vec<String> {
        self.inner.entries.read().keys().cloned().collect()
    }

    /// Data entries in insertion order.
    pub fn entries_raw(&self) -> Vec<(String, Value)> {
        self.inner
            .entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len_raw(&self) -> usize {
        self.inner.entries.read().len()
    }

    /// Attach a getter definition. The property is exposed through a
    /// derived cell by the wrapping layer.
    pub fn define_getter(&self, name: impl Into<String>, getter: GetterFn) {
        self.inner.getters.write().insert(name.into(), getter);
    }

    /// Attach a setter definition. Assignments delegate to it unchanged.
    pub fn define_setter(&self, name: impl Into<String>, setter: SetterFn) {
        self.inner.setters.write().insert(name.into(), setter);
    }

    pub(crate) fn getter(&self, name: &str) -> Option<GetterFn> {
        self.inner.getters.read().get(name).cloned()
    }

    pub(crate) fn setter(&self, name: &str) -> Option<SetterFn> {
        self.inner.setters.read().get(name).cloned()
    }

    pub(crate) fn getter_names(&self) -> Vec<String> {
        self.inner.getters.read().keys().cloned().collect()
    }

    pub(crate) fn meta(&self) -> &ContainerMeta {
        &self.inner.meta
    }

    pub(crate) fn ptr_id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}

impl Default for ObjectRef {
    fn default() -> Self {
        Self::new()
    }
}

struct ArrayInner {
    items: RwLock<Vec<Value>>,
    meta: ContainerMeta,
}

/// Handle to an array of values.
#[derive(Clone)]
pub struct ArrayRef {
    inner: Arc<ArrayInner>,
}

impl ArrayRef {
    pub fn new() -> Self {
        Self::from_values(Vec::new())
    }

    pub fn from_values(items: Vec<Value>) -> Self {
        Self {
            inner: Arc::new(ArrayInner {
                items: RwLock::new(items),
                meta: ContainerMeta::default(),
            }),
        }
    }

    pub fn get_raw(&self, index: usize) -> Option<Value> {
        self.inner.items.read().get(index).cloned()
    }

    /// Raw write; grows the array with nulls when writing past the end.
    pub fn set_raw(&self, index: usize, value: Value) {
        let mut items = self.inner.items.write();
        if index >= items.len() {
            items.resize(index + 1, Value::Null);
        }
        items[index] = value;
    }

    pub fn push_raw(&self, value: Value) {
        self.inner.items.write().push(value);
    }

    pub fn len_raw(&self) -> usize {
        self.inner.items.read().len()
    }

    pub fn values_raw(&self) -> Vec<Value> {
        self.inner.items.read().clone()
    }

    /// Structured access for the splice family.
    pub(crate) fn with_items_mut<R>(&self, f: impl FnOnce(&mut Vec<Value>) -> R) -> R {
        f(&mut self.inner.items.write())
    }

    pub(crate) fn meta(&self) -> &ContainerMeta {
        &self.inner.meta
    }

    pub(crate) fn ptr_id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}

impl Default for ArrayRef {
    fn default() -> Self {
        Self::new()
    }
}

struct SetInner {
    members: RwLock<IndexSet<Value>>,
    meta: ContainerMeta,
}

/// Handle to a set of values, iterated in insertion order with O(1)
/// identity membership.
#[derive(Clone)]
pub struct SetRef {
    inner: Arc<SetInner>,
}

impl SetRef {
    pub fn new() -> Self {
        Self::from_members(IndexSet::new())
    }

    pub fn from_members(members: IndexSet<Value>) -> Self {
        Self {
            inner: Arc::new(SetInner {
                members: RwLock::new(members),
                meta: ContainerMeta::default(),
            }),
        }
    }

    pub fn contains_raw(&self, value: &Value) -> bool {
        self.inner.members.read().contains(value)
    }

    /// Raw insert. Returns false for an already-present member.
    pub fn insert_raw(&self, value: Value) -> bool {
        self.inner.members.write().insert(value)
    }

    /// Raw removal preserving insertion order of the rest.
    pub fn remove_raw(&self, value: &Value) -> bool {
        self.inner.members.write().shift_remove(value)
    }

    pub fn clear_raw(&self) {
        self.inner.members.write().clear();
    }

    pub fn len_raw(&self) -> usize {
        self.inner.members.read().len()
    }

    /// Members in insertion order.
    pub fn members_raw(&self) -> Vec<Value> {
        self.inner.members.read().iter().cloned().collect()
    }

    pub(crate) fn meta(&self) -> &ContainerMeta {
        &self.inner.meta
    }

    pub(crate) fn ptr_id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}

impl Default for SetRef {
    fn default() -> Self {
        Self::new()
    }
}

/// Opaque passthrough for values the engine never wraps or inspects.
///
/// Compared by pointer identity; serializes to JSON null.
#[derive(Clone)]
pub struct ForeignRef(pub Arc<dyn Any + Send + Sync>);

impl ForeignRef {
    pub fn new(value: impl Any + Send + Sync) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }

    fn ptr_id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

/// One value in the graph: a scalar, a container handle, or a foreign
/// passthrough.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Object(ObjectRef),
    Array(ArrayRef),
    Set(SetRef),
    Foreign(ForeignRef),
}

impl Value {
    /// Is this one of the three wrappable container kinds (shallow marking
    /// aside)?
    pub fn is_container(&self) -> bool {
        matches!(self, Value::Object(_) | Value::Array(_) | Value::Set(_))
    }

    /// Containers that the wrapping layer recurses into: a container that
    /// was not marked shallow.
    pub fn is_wrappable(&self) -> bool {
        self.is_container() && !is_shallow(self)
    }

    /// Pointer identity for containers and foreign values.
    pub(crate) fn identity(&self) -> Option<usize> {
        match self {
            Value::Object(o) => Some(o.ptr_id()),
            Value::Array(a) => Some(a.ptr_id()),
            Value::Set(s) => Some(s.ptr_id()),
            Value::Foreign(f) => Some(f.ptr_id()),
            _ => None,
        }
    }

    pub(crate) fn container_meta(&self) -> Option<&ContainerMeta> {
        match self {
            Value::Object(o) => Some(o.meta()),
            Value::Array(a) => Some(a.meta()),
            Value::Set(s) => Some(s.meta()),
            _ => None,
        }
    }

    /// Convert to JSON. Sets become arrays (they have no JSON form);
    /// foreign values and non-finite floats become null.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Object(o) => serde_json::Value::Object(
                o.entries_raw()
                    .into_iter()
                    .map(|(k, v)| (k, v.to_json()))
                    .collect(),
            ),
            Value::Array(a) => serde_json::Value::Array(
                a.values_raw().iter().map(Value::to_json).collect(),
            ),
            Value::Set(s) => serde_json::Value::Array(
                s.members_raw().iter().map(Value::to_json).collect(),
            ),
            Value::Foreign(_) => serde_json::Value::Null,
        }
    }

    /// Build a value tree from JSON. Objects keep key order; numbers map to
    /// Int when integral.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Array(ArrayRef::from_values(items.iter().map(Value::from_json).collect()))
            }
            serde_json::Value::Object(map) => {
                let entries = map
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect();
                Value::Object(ObjectRef::from_entries(entries))
            }
        }
    }

    /// Fully detached copy: fresh container handles all the way down.
    ///
    /// Aliased subtrees stay aliased in the copy, which also terminates
    /// cyclic graphs. Accessor definitions are carried over (the functions
    /// themselves are shared). Foreign handles are shared, not copied.
    pub fn deep_clone(&self) -> Value {
        let mut visited: HashMap<usize, Value> = HashMap::new();
        self.deep_clone_inner(&mut visited)
    }

    fn deep_clone_inner(&self, visited: &mut HashMap<usize, Value>) -> Value {
        match self {
            Value::Object(o) => {
                if let Some(existing) = visited.get(&o.ptr_id()) {
                    return existing.clone();
                }
                let clone = ObjectRef::new();
                visited.insert(o.ptr_id(), Value::Object(clone.clone()));
                for (key, value) in o.entries_raw() {
                    clone.insert_raw(key, value.deep_clone_inner(visited));
                }
                for name in o.getter_names() {
                    if let Some(g) = o.getter(&name) {
                        clone.define_getter(name, g);
                    }
                }
                Value::Object(clone)
            }
            Value::Array(a) => {
                if let Some(existing) = visited.get(&a.ptr_id()) {
                    return existing.clone();
                }
                let clone = ArrayRef::new();
                visited.insert(a.ptr_id(), Value::Array(clone.clone()));
                for value in a.values_raw() {
                    clone.push_raw(value.deep_clone_inner(visited));
                }
                Value::Array(clone)
            }
            Value::Set(s) => {
                if let Some(existing) = visited.get(&s.ptr_id()) {
                    return existing.clone();
                }
                let clone = SetRef::new();
                visited.insert(s.ptr_id(), Value::Set(clone.clone()));
                for member in s.members_raw() {
                    clone.insert_raw(member.deep_clone_inner(visited));
                }
                Value::Set(clone)
            }
            other => other.clone(),
        }
    }
}

/// Mark a container so the wrapping layer stores and returns it by
/// reference, without recursive wrapping.
///
/// Reassigning the property that holds a shallow container still produces
/// the normal patch; mutations inside it are invisible. The opt-out for
/// large immutable payloads and foreign-shaped data.
pub fn shallow(value: Value) -> Value {
    if let Some(meta) = value.container_meta() {
        meta.shallow.store(true, Ordering::Relaxed);
    }
    value
}

/// Was this container explicitly marked shallow?
pub fn is_shallow(value: &Value) -> bool {
    value
        .container_meta()
        .map(|meta| meta.shallow.load(Ordering::Relaxed))
        .unwrap_or(false)
}

/// Preassign the synthetic id a container resolves to inside any Set.
///
/// No-op for scalars and foreign values.
pub fn set_synthetic_id(value: &Value, id: impl Into<String>) {
    if let Some(meta) = value.container_meta() {
        *meta.synthetic_id.lock() = Some(id.into());
    }
}

/// The synthetic id remembered on the container itself, if any.
pub(crate) fn synthetic_id_of(value: &Value) -> Option<String> {
    value
        .container_meta()
        .and_then(|meta| meta.synthetic_id.lock().clone())
}

// SameValueZero: cross Int/Float numeric equality, -0.0 == +0.0, NaN equal
// to itself. Containers and foreigns by pointer.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_id() == b.ptr_id(),
            (Value::Array(a), Value::Array(b)) => a.ptr_id() == b.ptr_id(),
            (Value::Set(a), Value::Set(b)) => a.ptr_id() == b.ptr_id(),
            (Value::Foreign(a), Value::Foreign(b)) => a.ptr_id() == b.ptr_id(),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => 0u8.hash(state),
            Value::Bool(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            Value::Int(i) => {
                2u8.hash(state);
                i.hash(state);
            }
            Value::Float(f) => {
                // Must hash-agree with Int for integral floats.
                if f.fract() == 0.0 && f.is_finite() && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    2u8.hash(state);
                    (*f as i64).hash(state);
                } else {
                    3u8.hash(state);
                    let bits = if f.is_nan() {
                        f64::NAN.to_bits()
                    } else {
                        f.to_bits()
                    };
                    bits.hash(state);
                }
            }
            Value::Str(s) => {
                4u8.hash(state);
                s.hash(state);
            }
            other => {
                5u8.hash(state);
                other.identity().hash(state);
            }
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Object(o) => write!(f, "Object({} entries)", o.len_raw()),
            Value::Array(a) => write!(f, "Array({} items)", a.len_raw()),
            Value::Set(s) => write!(f, "Set({} members)", s.len_raw()),
            Value::Foreign(_) => write!(f, "Foreign"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}
