//! Error types for the Trellis engine.
//!
//! All fallible public operations return `Result<_, TrellisError>`. The
//! variants map one-to-one onto the ways a caller can misuse the engine;
//! everything else (deleting an absent key, removing a value that is not a
//! Set member, re-adding a present member) is a silent no-op rather than an
//! error.

use thiserror::Error;

/// Errors surfaced by wrapping, mutation, and subscription entry points.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrellisError {
    /// The value handed to `wrap` is not a plain object, array, or Set, or
    /// it was explicitly marked shallow.
    #[error("this value can't be observed as a reactive root")]
    UnsupportedRoot,

    /// A write was attempted through a read-only cell handle (the array
    /// index-cell view or a property cell view).
    #[error("cells can't be mutated directly; write through the owning node")]
    IllegalMutation,

    /// A configured read-only property was assigned a second time.
    #[error("Cannot modify readonly property '{0}'")]
    ReadonlyViolation(String),

    /// `node_of` or a subscription call was handed a value that was never
    /// wrapped.
    #[error("value is not a wrapped reactive root")]
    NotAWrappedRoot,
}

/// Shorthand used by the fallible entry points of the crate.
pub type Result<T> = std::result::Result<T, TrellisError>;
