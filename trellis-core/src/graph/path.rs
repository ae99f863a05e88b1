//! Path Segments
//!
//! Every patch is addressed by a path of segments from the root container to
//! the mutated location: string keys for object properties and synthetic Set
//! member ids, numeric indices for array slots. Segments are structured (no
//! string escaping of keys) and serialize untagged, so a path renders on the
//! wire as a plain JSON array of strings and numbers.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// One step in a root-to-leaf patch path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// Object property name or synthetic Set member id.
    Key(String),
    /// Array index.
    Index(usize),
}

/// Assembled path buffer. Paths are short; the common case stays inline.
pub(crate) type PathBuf = SmallVec<[PathSegment; 8]>;

impl PathSegment {
    pub fn as_key(&self) -> Option<&str> {
        match self {
            PathSegment::Key(k) => Some(k),
            PathSegment::Index(_) => None,
        }
    }

    pub fn as_index(&self) -> Option<usize> {
        match self {
            PathSegment::Key(_) => None,
            PathSegment::Index(i) => Some(*i),
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(k) => write!(f, "{k}"),
            PathSegment::Index(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        PathSegment::Key(key)
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

/// Does `path` address a location strictly inside `prefix`?
pub(crate) fn is_strictly_under(path: &[PathSegment], prefix: &[PathSegment]) -> bool {
    path.len() > prefix.len() && path[..prefix.len()] == *prefix
}
