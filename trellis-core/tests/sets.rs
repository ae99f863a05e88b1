//! Integration Tests for Set Identity and Set Patches
//!
//! Sets address container members by synthetic id. These tests drive the
//! resolution order, collision handling, and the Set patch shapes through
//! the public surface.

use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, MutexGuard};
use serde_json::json;
use trellis_core::{
    add_with_id, flush, subscribe_deep_mutations, wrap, wrap_with, DeepPatchBatch, GeneratedProps,
    Node, ObjectRef, SetNode, SetRef, Value, WrapOptions,
};

/// Serializes the tests in this file: `flush` drains every dirty root, so
/// parallel tests would split each other's batches.
fn lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(())).lock()
}

fn set_root() -> (Node, SetNode) {
    let node = wrap(Value::Set(SetRef::new())).unwrap();
    let set = node.as_set().unwrap();
    (node, set)
}

fn obj_with_id(id: &str) -> Value {
    let o = ObjectRef::new();
    o.insert_raw("@id", Value::Str(id.into()));
    Value::Object(o)
}

type Batches = Arc<Mutex<Vec<DeepPatchBatch>>>;

fn collect(node: &Node) -> (Batches, trellis_core::Subscription) {
    let batches: Batches = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&batches);
    let sub = subscribe_deep_mutations(node, move |batch| sink.lock().push(batch.clone()));
    (batches, sub)
}

fn patches_json(batch: &DeepPatchBatch) -> serde_json::Value {
    serde_json::to_value(&batch.patches).unwrap()
}

/// Primitive membership patches carry `type: "set"` at the Set's path.
#[test]
fn primitive_add_and_delete_shapes() {
    let _guard = lock();
    let (node, set) = set_root();
    let (batches, _sub) = collect(&node);

    set.add(Value::Int(1));
    set.add(Value::Str("x".into()));
    set.delete(&Value::Int(1));
    flush();

    let seen = batches.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(
        patches_json(&seen[0]),
        json!([
            { "path": [], "op": "add", "type": "set", "value": [1] },
            { "path": [], "op": "add", "type": "set", "value": ["x"] },
            { "path": [], "op": "remove", "type": "set", "value": 1 }
        ])
    );
}

/// An object member is flattened under its synthetic id, with the id field
/// patched first; removal addresses the id with no value.
#[test]
fn object_member_add_and_remove_by_id() {
    let _guard = lock();
    let (node, set) = set_root();
    let (batches, _sub) = collect(&node);

    let member = obj_with_id("alice");
    let Value::Object(raw) = &member else {
        panic!("expected object");
    };
    raw.insert_raw("age", Value::Int(30));

    set.add(member.clone());
    flush();
    set.delete(&member);
    flush();

    let seen = batches.lock();
    assert_eq!(seen.len(), 2);
    assert_eq!(
        patches_json(&seen[0]),
        json!([
            { "path": ["alice"], "op": "add", "type": "object" },
            { "path": ["alice", "@id"], "op": "add", "value": "alice" },
            { "path": ["alice", "age"], "op": "add", "value": 30 }
        ])
    );
    assert_eq!(
        patches_json(&seen[1]),
        json!([{ "path": ["alice"], "op": "remove", "type": "set" }])
    );
}

/// The prop generator outranks the id field; its extra properties are
/// written onto the member and patched ahead of the structural flatten.
#[test]
fn generator_supplies_id_and_extra_props() {
    let _guard = lock();
    let options = WrapOptions::new()
        .with_synthetic_id_property_name("uuid")
        .with_prop_generator(|_ctx| GeneratedProps {
            synthetic_id: Some("gen1".into()),
            extra_props: vec![("kind".into(), Value::Str("widget".into()))],
        });
    let node = wrap_with(Value::Set(SetRef::new()), options).unwrap();
    let set = node.as_set().unwrap();
    let (batches, _sub) = collect(&node);

    let member = Value::Object(ObjectRef::new());
    set.add(member.clone());
    flush();

    // Both generated fields became real data on the member.
    let Value::Object(raw) = &member else {
        panic!("expected object");
    };
    assert_eq!(raw.get_raw("kind"), Some(Value::Str("widget".into())));
    assert_eq!(raw.get_raw("uuid"), Some(Value::Str("gen1".into())));

    let seen = batches.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(
        patches_json(&seen[0]),
        json!([
            { "path": ["gen1", "kind"], "op": "add", "value": "widget" },
            { "path": ["gen1"], "op": "add", "type": "object" },
            { "path": ["gen1", "uuid"], "op": "add", "value": "gen1" }
        ])
    );
}

/// Two members claiming the same id field: the second gets a blank id, and
/// both stay addressable via `get_by_id`.
#[test]
fn id_collision_mints_a_blank_id() {
    let _guard = lock();
    let (_node, set) = set_root();

    let a = obj_with_id("dup");
    let b = obj_with_id("dup");
    set.add(a.clone());
    set.add(b.clone());
    assert_eq!(set.size(), 2);

    let first = set.get_by_id("dup").unwrap();
    assert_eq!(first.raw(), a);

    // The second member is reachable under some blank id.
    let members: Vec<Node> = set
        .iter()
        .into_iter()
        .filter_map(|slot| slot.as_child().cloned())
        .collect();
    assert_eq!(members.len(), 2);
    assert!(members.iter().any(|n| n.raw() == b));
}

/// A member already present in the raw Set before wrapping owns its id
/// field; a later add claiming the same id is committed under a blank id
/// and its patches are addressed there.
#[test]
fn pre_existing_member_keeps_its_id_against_a_later_add() {
    let _guard = lock();
    let raw = SetRef::new();
    let existing = obj_with_id("dup");
    raw.insert_raw(existing.clone());
    let node = wrap(Value::Set(raw)).unwrap();
    let set = node.as_set().unwrap();
    let (batches, _sub) = collect(&node);

    let newcomer = obj_with_id("dup");
    set.add(newcomer.clone());
    flush();

    let seen = batches.lock();
    assert_eq!(seen.len(), 1);
    let patches = patches_json(&seen[0]);
    let minted = patches[0]["path"][0].as_str().unwrap().to_string();
    assert_ne!(minted, "dup");
    assert!(minted.starts_with("_b"));
    assert_eq!(
        patches,
        json!([
            { "path": [minted.clone()], "op": "add", "type": "object" },
            { "path": [minted, "@id"], "op": "add", "value": "dup" }
        ])
    );

    // "dup" still answers to the rightful owner.
    assert_eq!(set.get_by_id("dup").unwrap().raw(), existing);
    assert_ne!(set.get_by_id("dup").unwrap().raw(), newcomer);
}

/// Ids are stable across re-observation; duplicate adds are no-ops.
#[test]
fn ids_are_stable_and_duplicate_adds_silent() {
    let _guard = lock();
    let (node, set) = set_root();

    let member = obj_with_id("m1");
    let first = set.add(member.clone());
    flush();

    let (batches, _sub) = collect(&node);
    let second = set.add(member.clone());
    flush();

    assert_eq!(first, second);
    assert!(batches.lock().is_empty());
    assert!(set.get_by_id("m1").is_some());
}

/// `add_with_id` preassigns the synthetic id used for addressing.
#[test]
fn add_with_id_controls_the_patch_path() {
    let _guard = lock();
    let (node, set) = set_root();
    let (batches, _sub) = collect(&node);

    let member = Value::Object(ObjectRef::new());
    add_with_id(&set, member, "chosen").unwrap();
    flush();

    let seen = batches.lock();
    assert_eq!(
        patches_json(&seen[0]),
        json!([{ "path": ["chosen"], "op": "add", "type": "object" }])
    );
    assert!(set.get_by_id("chosen").is_some());
}

/// `clear` supersedes the pending patches under the Set and delivers a
/// single empty Set-add.
#[test]
fn clear_retracts_pending_patches() {
    let _guard = lock();
    let (node, set) = set_root();
    let (batches, _sub) = collect(&node);

    set.add(obj_with_id("a"));
    set.add(Value::Int(1));
    set.clear();
    flush();

    let seen = batches.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(
        patches_json(&seen[0]),
        json!([{ "path": [], "op": "add", "type": "set", "value": [] }])
    );
    assert_eq!(set.size(), 0);
    assert_eq!(set.get_by_id("a"), None);
    drop(seen);

    // Clearing the now-empty Set emits nothing.
    set.clear();
    flush();
    assert_eq!(batches.lock().len(), 1);
}

/// Deleting a non-member emits nothing.
#[test]
fn absent_delete_is_silent() {
    let _guard = lock();
    let (node, set) = set_root();
    let (batches, _sub) = collect(&node);

    assert!(!set.delete(&Value::Int(42)));
    assert!(!set.delete(&obj_with_id("ghost")));
    flush();
    assert!(batches.lock().is_empty());
}

/// A Set nested inside an object addresses its members under the full path.
#[test]
fn nested_set_members_use_the_full_path() {
    let _guard = lock();
    let root = wrap({
        let o = ObjectRef::new();
        o.insert_raw("tags", Value::Set(SetRef::new()));
        Value::Object(o)
    })
    .unwrap();
    let view = root.as_object().unwrap();
    let (batches, _sub) = collect(&root);

    let tags = view
        .get("tags")
        .unwrap()
        .as_child()
        .unwrap()
        .as_set()
        .unwrap();
    tags.add(Value::Str("urgent".into()));
    tags.add(obj_with_id("t1"));
    flush();

    let seen = batches.lock();
    assert_eq!(
        patches_json(&seen[0]),
        json!([
            { "path": ["tags"], "op": "add", "type": "set", "value": ["urgent"] },
            { "path": ["tags", "t1"], "op": "add", "type": "object" },
            { "path": ["tags", "t1", "@id"], "op": "add", "value": "t1" }
        ])
    );
}

/// `first` and membership reads reflect insertion order across kinds.
#[test]
fn mixed_membership_reads() {
    let _guard = lock();
    let (_node, set) = set_root();

    set.add(Value::Int(10));
    set.add(obj_with_id("obj"));
    assert_eq!(set.size(), 2);
    assert!(set.has(&Value::Int(10)));
    assert!(set.has(&Value::Float(10.0)));

    let first = set.first().unwrap();
    assert_eq!(first.as_leaf(), Some(&Value::Int(10)));

    let mut labels = Vec::new();
    set.for_each(|slot| {
        labels.push(match slot {
            trellis_core::Slot::Leaf(_) => "leaf",
            trellis_core::Slot::Child(_) => "child",
        });
    });
    assert_eq!(labels, vec!["leaf", "child"]);
}
