//! Patch Wire Types
//!
//! A mutation on a wrapped graph is reported as one or more `DeepPatch`
//! records, addressed by a root-to-leaf path. Batched delivery wraps a
//! tick's worth of patches in a `DeepPatchBatch` with the root's version.
//!
//! The JSON shape is part of the engine's contract:
//!
//! ```json
//! { "path": ["users", 3, "name"], "op": "add", "value": "ada" }
//! { "path": ["tags"], "op": "add", "type": "set", "value": ["urgent"] }
//! { "path": ["draft"], "op": "remove" }
//! ```
//!
//! `type` and `value` are omitted when absent.

use serde::{Deserialize, Serialize};

use crate::graph::{PathSegment, Value};

/// Patch operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Remove,
}

/// Structural kind marker: present on container-creation patches and Set
/// membership patches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchKind {
    /// A plain object or array was created at `path`.
    Object,
    /// A Set operation at `path` (membership changes and Set creation).
    Set,
}

/// One path-addressed structural mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeepPatch {
    pub path: Vec<PathSegment>,
    pub op: PatchOp,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none", default)]
    pub kind: Option<PatchKind>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub value: Option<serde_json::Value>,
}

impl DeepPatch {
    /// Leaf assignment: a scalar, shallow container, or foreign value landed
    /// at `path`.
    pub(crate) fn leaf_add(path: Vec<PathSegment>, value: &Value) -> Self {
        Self {
            path,
            op: PatchOp::Add,
            kind: None,
            value: Some(value.to_json()),
        }
    }

    /// A plain object or array was created at `path`; its entries follow as
    /// separate patches.
    pub(crate) fn object_add(path: Vec<PathSegment>) -> Self {
        Self {
            path,
            op: PatchOp::Add,
            kind: Some(PatchKind::Object),
            value: None,
        }
    }

    /// A Set was created (or cleared) at `path`. `members` is empty for
    /// creation and carries one primitive for a membership add.
    pub(crate) fn set_add(path: Vec<PathSegment>, members: Vec<serde_json::Value>) -> Self {
        Self {
            path,
            op: PatchOp::Add,
            kind: Some(PatchKind::Set),
            value: Some(serde_json::Value::Array(members)),
        }
    }

    /// Key/index removal.
    pub(crate) fn remove(path: Vec<PathSegment>) -> Self {
        Self {
            path,
            op: PatchOp::Remove,
            kind: None,
            value: None,
        }
    }

    /// Set membership removal. Primitive members carry the value; object
    /// members are addressed by synthetic id with no value.
    pub(crate) fn set_remove(path: Vec<PathSegment>, member: Option<&Value>) -> Self {
        Self {
            path,
            op: PatchOp::Remove,
            kind: Some(PatchKind::Set),
            value: member.map(Value::to_json),
        }
    }
}

/// One flushed tick's patches for one root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeepPatchBatch {
    pub version: u64,
    pub patches: Vec<DeepPatch>,
}
