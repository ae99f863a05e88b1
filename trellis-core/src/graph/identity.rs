//! Synthetic Identity Resolution
//!
//! Sets have no keys, so container members are addressed in the patch stream
//! by a synthetic string id. Resolution tries, in order:
//!
//! 1. an id already assigned to the container (earlier membership in this
//!    Set, or preassigned via `set_synthetic_id`);
//! 2. the configured prop generator;
//! 3. an id field already present on the object (the configured name, else
//!    `"@id"` then `"id"`);
//! 4. a freshly minted blank-node id (`_b{N}`, process-wide counter).
//!
//! A resolved id that already belongs to a *different* member falls back to
//! a fresh blank id; ids are never reused or overwritten.

use std::sync::atomic::{AtomicU64, Ordering};

use super::options::{PropGenContext, WrapOptions};
use super::path::PathSegment;
use super::value::{synthetic_id_of, Value};

/// Mint a process-unique blank-node id.
pub(crate) fn blank_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!("_b{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Normalize a field value into synthetic-id string form. Numeric inputs
/// become their decimal string; anything non-scalar is unusable.
pub(crate) fn normalize_id(value: &Value) -> Option<String> {
    match value {
        Value::Str(s) => Some(s.clone()),
        Value::Int(i) => Some(i.to_string()),
        Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some((*f as i64).to_string()),
        Value::Float(f) => Some(f.to_string()),
        _ => None,
    }
}

pub(crate) struct ResolvedIdentity {
    pub id: String,
    /// Extra properties the generator asked to write during `add`.
    pub extra_props: Vec<(String, Value)>,
    /// The id came from the generator (as opposed to an existing assignment
    /// or an id field on the object).
    pub from_generator: bool,
}

/// Resolve the synthetic id for a container member.
///
/// `prior` is the id this Set already assigned to the member, if any.
/// `owner_of` reports which member identity currently holds a candidate id,
/// for collision detection. `for_add` permits the generator's extra
/// properties; iteration-time resolution discards them.
pub(crate) fn resolve_identity(
    member: &Value,
    set_path: &[PathSegment],
    options: &WrapOptions,
    prior: Option<String>,
    owner_of: &dyn Fn(&str) -> Option<usize>,
    for_add: bool,
) -> ResolvedIdentity {
    if let Some(id) = prior {
        return ResolvedIdentity {
            id,
            extra_props: Vec::new(),
            from_generator: false,
        };
    }

    let mut candidate: Option<String> = synthetic_id_of(member);
    let mut extra_props = Vec::new();
    let mut from_generator = false;

    if candidate.is_none() {
        if let Some(generator) = &options.prop_generator {
            let generated = generator(PropGenContext {
                path: set_path,
                in_set: true,
                object: member,
            });
            if for_add {
                extra_props = generated.extra_props;
            }
            if generated.synthetic_id.is_some() {
                candidate = generated.synthetic_id;
                from_generator = true;
            }
        }
    }

    if candidate.is_none() {
        if let Value::Object(obj) = member {
            for field in options.id_field_probe() {
                if let Some(v) = obj.get_raw(field) {
                    if let Some(id) = normalize_id(&v) {
                        candidate = Some(id);
                        from_generator = false;
                        break;
                    }
                }
            }
        }
    }

    let id = match candidate {
        Some(id) => {
            let taken_by_other = owner_of(&id)
                .map(|owner| Some(owner) != member.identity())
                .unwrap_or(false);
            if taken_by_other {
                from_generator = false;
                blank_id()
            } else {
                id
            }
        }
        None => {
            from_generator = false;
            blank_id()
        }
    };

    ResolvedIdentity {
        id,
        extra_props,
        from_generator,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::options::GeneratedProps;
    use crate::graph::value::{set_synthetic_id, ObjectRef};

    fn no_owner(_: &str) -> Option<usize> {
        None
    }

    #[test]
    fn blank_ids_are_unique_and_well_formed() {
        let a = blank_id();
        let b = blank_id();
        assert!(a.starts_with("_b"));
        assert_ne!(a, b);
    }

    #[test]
    fn prior_assignment_wins() {
        let member = Value::Object(ObjectRef::new());
        let resolved = resolve_identity(
            &member,
            &[],
            &WrapOptions::new(),
            Some("earlier".into()),
            &no_owner,
            true,
        );
        assert_eq!(resolved.id, "earlier");
    }

    #[test]
    fn preassigned_id_beats_the_id_field() {
        let obj = ObjectRef::new();
        obj.insert_raw("@id", Value::Str("from-field".into()));
        let member = Value::Object(obj);
        set_synthetic_id(&member, "preassigned");

        let resolved =
            resolve_identity(&member, &[], &WrapOptions::new(), None, &no_owner, true);
        assert_eq!(resolved.id, "preassigned");
    }

    #[test]
    fn generator_beats_the_id_field() {
        let obj = ObjectRef::new();
        obj.insert_raw("id", Value::Str("from-field".into()));
        let member = Value::Object(obj);

        let options = WrapOptions::new().with_prop_generator(|_ctx| GeneratedProps {
            synthetic_id: Some("from-generator".into()),
            extra_props: vec![("kind".into(), Value::Str("widget".into()))],
        });

        let resolved = resolve_identity(&member, &[], &options, None, &no_owner, true);
        assert_eq!(resolved.id, "from-generator");
        assert!(resolved.from_generator);
        assert_eq!(resolved.extra_props.len(), 1);
    }

    #[test]
    fn iteration_discards_extra_props() {
        let member = Value::Object(ObjectRef::new());
        let options = WrapOptions::new().with_prop_generator(|_ctx| GeneratedProps {
            synthetic_id: Some("g1".into()),
            extra_props: vec![("x".into(), Value::Int(1))],
        });

        let resolved = resolve_identity(&member, &[], &options, None, &no_owner, false);
        assert_eq!(resolved.id, "g1");
        assert!(resolved.extra_props.is_empty());
    }

    #[test]
    fn id_field_probe_order_and_normalization() {
        let obj = ObjectRef::new();
        obj.insert_raw("id", Value::Int(42));
        let member = Value::Object(obj);

        let resolved =
            resolve_identity(&member, &[], &WrapOptions::new(), None, &no_owner, true);
        assert_eq!(resolved.id, "42");

        // "@id" outranks "id" by default.
        let obj = ObjectRef::new();
        obj.insert_raw("id", Value::Str("second".into()));
        obj.insert_raw("@id", Value::Str("first".into()));
        let member = Value::Object(obj);
        let resolved =
            resolve_identity(&member, &[], &WrapOptions::new(), None, &no_owner, true);
        assert_eq!(resolved.id, "first");
    }

    #[test]
    fn collision_falls_back_to_a_blank_id() {
        let obj = ObjectRef::new();
        obj.insert_raw("@id", Value::Str("dup".into()));
        let member = Value::Object(obj);

        // "dup" belongs to some other member identity.
        let owner = |id: &str| (id == "dup").then_some(usize::MAX);
        let resolved = resolve_identity(&member, &[], &WrapOptions::new(), None, &owner, true);
        assert_ne!(resolved.id, "dup");
        assert!(resolved.id.starts_with("_b"));
    }

    #[test]
    fn same_member_keeps_its_own_id() {
        let obj = ObjectRef::new();
        obj.insert_raw("@id", Value::Str("mine".into()));
        let member = Value::Object(obj);
        let my_identity = member.identity();

        let owner = move |id: &str| (id == "mine").then(|| my_identity.unwrap());
        let resolved = resolve_identity(&member, &[], &WrapOptions::new(), None, &owner, true);
        assert_eq!(resolved.id, "mine");
    }

    #[test]
    fn missing_everything_mints_a_blank_id() {
        let member = Value::Object(ObjectRef::new());
        let resolved =
            resolve_identity(&member, &[], &WrapOptions::new(), None, &no_owner, true);
        assert!(resolved.id.starts_with("_b"));
        assert!(!resolved.from_generator);
    }
}
