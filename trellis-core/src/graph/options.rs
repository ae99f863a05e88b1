//! Wrap Options
//!
//! Options are fixed per root at wrap time and inherited by every descendant
//! node, including Set entries. They control synthetic-id resolution for Set
//! members and read-only property enforcement.

use std::fmt;
use std::sync::Arc;

use super::path::PathSegment;
use super::value::Value;

/// Context handed to a [`WrapOptions::prop_generator`] when a container is
/// observed as a Set member or flattened into the patch stream.
pub struct PropGenContext<'a> {
    /// Path of the container being resolved (the Set path for members).
    pub path: &'a [PathSegment],
    /// True when the container is being resolved as a Set member.
    pub in_set: bool,
    /// The raw container itself.
    pub object: &'a Value,
}

/// What a prop generator produced for one container.
#[derive(Default)]
pub struct GeneratedProps {
    /// Synthetic id to use for the container.
    pub synthetic_id: Option<String>,
    /// Extra properties written onto the container before a Set add. Each
    /// produces its own add-patch ahead of the member's structural patch.
    /// Ignored outside `add`.
    pub extra_props: Vec<(String, Value)>,
}

/// Callback that generates synthetic ids (and optionally extra properties)
/// for containers entering the patch stream.
pub type PropGenerator = Arc<dyn Fn(PropGenContext<'_>) -> GeneratedProps + Send + Sync>;

/// Field names probed for an existing id when none is configured.
pub(crate) const DEFAULT_ID_FIELDS: [&str; 2] = ["@id", "id"];

/// Per-root wrapping configuration.
#[derive(Clone, Default)]
pub struct WrapOptions {
    /// Synthetic-id source for Set members that carry none (§resolution
    /// step 2); may also attach extra properties during `add`.
    pub prop_generator: Option<PropGenerator>,
    /// Name of the object field that holds the synthetic id. When set, the
    /// field is probed before minting a blank id, and written onto plain
    /// objects the generator identified.
    pub synthetic_id_property_name: Option<String>,
    /// Properties that become immutable after their first assignment.
    pub read_only_props: Vec<String>,
}

impl WrapOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prop_generator(
        mut self,
        f: impl Fn(PropGenContext<'_>) -> GeneratedProps + Send + Sync + 'static,
    ) -> Self {
        self.prop_generator = Some(Arc::new(f));
        self
    }

    pub fn with_synthetic_id_property_name(mut self, name: impl Into<String>) -> Self {
        self.synthetic_id_property_name = Some(name.into());
        self
    }

    pub fn with_read_only_props(mut self, props: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.read_only_props = props.into_iter().map(Into::into).collect();
        self
    }

    pub(crate) fn is_read_only(&self, key: &str) -> bool {
        self.read_only_props.iter().any(|p| p == key)
    }

    /// Id field probe order: the configured name alone, or the defaults.
    pub(crate) fn id_field_probe(&self) -> Vec<&str> {
        match &self.synthetic_id_property_name {
            Some(name) => vec![name.as_str()],
            None => DEFAULT_ID_FIELDS.to_vec(),
        }
    }

    /// The field name used when flattening an object that carries an id:
    /// the configured name, else the primary default.
    pub(crate) fn id_field_name(&self) -> &str {
        self.synthetic_id_property_name
            .as_deref()
            .unwrap_or(DEFAULT_ID_FIELDS[0])
    }
}

impl fmt::Debug for WrapOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrapOptions")
            .field("prop_generator", &self.prop_generator.is_some())
            .field(
                "synthetic_id_property_name",
                &self.synthetic_id_property_name,
            )
            .field("read_only_props", &self.read_only_props)
            .finish()
    }
}
