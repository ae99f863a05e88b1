//! Integration Tests for Patch Delivery
//!
//! End-to-end checks of the patch stream: batch shapes, versioning,
//! just-in-time delivery, root isolation, re-entrant mutations, and the
//! bit-exact wire shape.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, MutexGuard};
use serde_json::json;
use trellis_core::{
    flush, spawn_flush_driver, subscribe_deep_mutations, watch, wrap, ArrayRef, DeepPatchBatch,
    Node, ObjectRef, Value, WatchOptions,
};

/// Serializes the tests in this file: `flush` drains every dirty root, so
/// parallel tests would split each other's batches.
fn lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(())).lock()
}

fn obj(entries: &[(&str, Value)]) -> Value {
    let o = ObjectRef::new();
    for (k, v) in entries {
        o.insert_raw(*k, v.clone());
    }
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

/// `push` onto a wrapped array delivers the index patch and the length
/// patch in one batch.
#[test]
fn push_emits_index_then_length() {
    let _guard = lock();
    let raw = ArrayRef::from_values(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    let node = wrap(Value::Array(raw)).unwrap();
    let (batches, _sub) = collect(&node);

    node.as_array().unwrap().push(Value::Int(4));
    flush();

    let seen = batches.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(
        patches_json(&seen[0]),
        json!([
            { "path": [3], "op": "add", "value": 4 },
            { "path": ["length"], "op": "add", "value": 4 }
        ])
    );
}

/// K mutations before a flush arrive as one batch, in mutation order, with
/// the version incremented once.
#[test]
fn mutations_coalesce_into_one_versioned_batch() {
    let _guard = lock();
    let node = wrap(obj(&[])).unwrap();
    let view = node.as_object().unwrap();
    let (batches, _sub) = collect(&node);

    view.set("a", Value::Int(1)).unwrap();
    view.set("b", Value::Int(2)).unwrap();
    view.delete("a");
    flush();

    let seen = batches.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].version, 1);
    assert_eq!(
        patches_json(&seen[0]),
        json!([
            { "path": ["a"], "op": "add", "value": 1 },
            { "path": ["b"], "op": "add", "value": 2 },
            { "path": ["a"], "op": "remove" }
        ])
    );
}

/// Deep assignment flattens pre-order; the wire shape is bit-exact.
#[test]
fn deep_assignment_flattens_preorder() {
    let _guard = lock();
    let node = wrap(obj(&[])).unwrap();
    let view = node.as_object().unwrap();
    let (batches, _sub) = collect(&node);

    let tags = ArrayRef::from_values(vec![Value::Int(1)]);
    let user = ObjectRef::new();
    user.insert_raw("name", Value::Str("ada".into()));
    user.insert_raw("tags", Value::Array(tags));
    view.set("user", Value::Object(user)).unwrap();
    flush();

    let seen = batches.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(
        patches_json(&seen[0]),
        json!([
            { "path": ["user"], "op": "add", "type": "object" },
            { "path": ["user", "name"], "op": "add", "value": "ada" },
            { "path": ["user", "tags"], "op": "add", "type": "object" },
            { "path": ["user", "tags", 0], "op": "add", "value": 1 }
        ])
    );
}

/// Replacing a container with another container emits nothing; mutations
/// through the new child are tracked normally afterwards.
#[test]
fn container_over_container_is_silent() {
    let _guard = lock();
    let node = wrap(obj(&[])).unwrap();
    let view = node.as_object().unwrap();

    view.set("child", obj(&[("x", Value::Int(1))])).unwrap();
    flush();

    let (batches, _sub) = collect(&node);
    view.set("child", obj(&[("x", Value::Int(2))])).unwrap();
    flush();
    assert!(batches.lock().is_empty());

    let child = view.get("child").unwrap().as_child().unwrap().as_object().unwrap();
    child.set("x", Value::Int(3)).unwrap();
    flush();

    let seen = batches.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(
        patches_json(&seen[0]),
        json!([{ "path": ["child", "x"], "op": "add", "value": 3 }])
    );
}

/// Just-in-time watchers fire synchronously per mutation, before the next
/// statement, with that mutation's patch group only.
#[test]
fn jit_watch_fires_per_mutation() {
    let _guard = lock();
    let node = wrap(obj(&[])).unwrap();
    let view = node.as_object().unwrap();

    let groups = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&groups);
    let _watcher = watch(
        &node,
        move |event| {
            assert_eq!(event.version, None);
            sink.lock().push(event.patches.clone());
        },
        WatchOptions {
            trigger_instantly: true,
            ..Default::default()
        },
    );

    view.set("a", Value::Int(1)).unwrap();
    assert_eq!(groups.lock().len(), 1);
    view.set("b", Value::Int(2)).unwrap();
    assert_eq!(groups.lock().len(), 2);

    let seen = groups.lock();
    assert_eq!(
        serde_json::to_value(&seen[0]).unwrap(),
        json!([{ "path": ["a"], "op": "add", "value": 1 }])
    );
    assert_eq!(
        serde_json::to_value(&seen[1]).unwrap(),
        json!([{ "path": ["b"], "op": "add", "value": 2 }])
    );
}

/// Roots are isolated: each subscriber sees only its own root's patches,
/// and nothing fires after unsubscribe returns.
#[test]
fn root_isolation_and_unsubscribe() {
    let _guard = lock();
    let a = wrap(obj(&[])).unwrap();
    let b = wrap(obj(&[])).unwrap();
    let (batches_a, sub_a) = collect(&a);
    let (batches_b, _sub_b) = collect(&b);

    a.as_object().unwrap().set("x", Value::Int(1)).unwrap();
    flush();
    assert_eq!(batches_a.lock().len(), 1);
    assert!(batches_b.lock().is_empty());

    sub_a.unsubscribe();
    a.as_object().unwrap().set("x", Value::Int(2)).unwrap();
    flush();
    assert_eq!(batches_a.lock().len(), 1);
}

/// A mutation made inside a delivered callback lands in the next batch with
/// the next version.
#[test]
fn reentrant_mutation_joins_the_next_batch() {
    let _guard = lock();
    let node = wrap(obj(&[])).unwrap();
    let view = node.as_object().unwrap();

    let batches: Batches = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&batches);
    let reentered = Arc::new(AtomicBool::new(false));
    let (view2, reentered2) = (view.clone(), Arc::clone(&reentered));
    let _sub = subscribe_deep_mutations(&node, move |batch| {
        sink.lock().push(batch.clone());
        if !reentered2.swap(true, Ordering::SeqCst) {
            view2.set("from_callback", Value::Int(9)).unwrap();
        }
    });

    view.set("a", Value::Int(1)).unwrap();
    flush();
    flush();

    let seen = batches.lock();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].version, 1);
    assert_eq!(
        patches_json(&seen[0]),
        json!([{ "path": ["a"], "op": "add", "value": 1 }])
    );
    assert_eq!(seen[1].version, 2);
    assert_eq!(
        patches_json(&seen[1]),
        json!([{ "path": ["from_callback"], "op": "add", "value": 9 }])
    );
}

/// No-op mutations emit nothing: absent delete, delete of a hole that was
/// never there, an empty flush.
#[test]
fn no_op_mutations_deliver_nothing() {
    let _guard = lock();
    let node = wrap(obj(&[("a", Value::Int(1))])).unwrap();
    let view = node.as_object().unwrap();
    let (batches, _sub) = collect(&node);

    assert!(!view.delete("missing"));
    flush();
    assert!(batches.lock().is_empty());
}

/// A delivered batch round-trips through JSON unchanged.
#[test]
fn delivered_batches_round_trip() {
    let _guard = lock();
    let node = wrap(obj(&[])).unwrap();
    let (batches, _sub) = collect(&node);

    node.as_object().unwrap().set("k", Value::Bool(true)).unwrap();
    flush();

    let seen = batches.lock();
    let json = serde_json::to_string(&seen[0]).unwrap();
    let back: DeepPatchBatch = serde_json::from_str(&json).unwrap();
    assert_eq!(back, seen[0]);
}

/// The spawned driver flushes after the mutating task yields.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn flush_driver_delivers_without_manual_flush() {
    let _guard = lock();
    let driver = spawn_flush_driver();

    let node = wrap(obj(&[])).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let calls2 = Arc::clone(&calls);
    let _sub = subscribe_deep_mutations(&node, move |_| {
        calls2.fetch_add(1, Ordering::SeqCst);
    });

    node.as_object().unwrap().set("a", Value::Int(1)).unwrap();

    for _ in 0..200 {
        if calls.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert!(calls.load(Ordering::SeqCst) > 0);
    driver.abort();
}
