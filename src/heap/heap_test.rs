// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Cardinal Authors

use super::*;
use crate::value::object::{Range, Str};

fn fresh_heap() -> Heap {
    Heap::new(1024, 256, 50)
}

#[test]
fn alloc_returns_a_retrievable_handle() {
    let mut heap = fresh_heap();
    let handle = heap.alloc(Object::Str(Str::new("hi")), &[]);
    assert!(matches!(heap.get(handle), Some(Object::Str(s)) if s.as_str() == "hi"));
}

#[test]
fn stale_handle_after_collection_returns_none() {
    let mut heap = fresh_heap();
    let handle = heap.alloc(Object::Str(Str::new("temporary")), &[]);
    heap.collect(&[]);
    assert!(heap.get(handle).is_none());
}

#[test]
fn rooted_object_survives_collection() {
    let mut heap = fresh_heap();
    let handle = heap.alloc(Object::Str(Str::new("kept")), &[]);
    heap.collect(&[handle]);
    assert!(heap.get(handle).is_some());
}

#[test]
fn unreachable_object_is_freed_and_slot_reused() {
    let mut heap = fresh_heap();
    let first = heap.alloc(Object::Str(Str::new("gone")), &[]);
    let stats = heap.collect(&[]);
    assert_eq!(stats.freed, 1);
    let second = heap.alloc(Object::Str(Str::new("new")), &[]);
    assert_eq!(second.index, first.index);
    assert_ne!(second.generation, first.generation);
}

#[test]
fn stress_mode_collects_on_every_allocation() {
    let mut heap = fresh_heap();
    heap.stress_mode = true;
    let a = heap.alloc(Object::Str(Str::new("a")), &[]);
    // `a` was never rooted, so the very next allocation's stress-mode
    // collection reclaims it immediately.
    let _b = heap.alloc(Object::Str(Str::new("b")), &[]);
    assert!(heap.get(a).is_none());
}

#[test]
fn tracing_follows_list_elements_transitively() {
    let mut heap = fresh_heap();
    let inner = heap.alloc(Object::Str(Str::new("inner")), &[]);
    let outer = heap.alloc(Object::List(vec![Value::Obj(inner)]), &[]);
    heap.collect(&[outer]);
    assert!(heap.get(inner).is_some(), "list element should be kept alive transitively");
}

#[test]
fn values_equal_compares_strings_by_content() {
    let mut heap = fresh_heap();
    let a = heap.alloc(Object::Str(Str::new("same")), &[]);
    let b = heap.alloc(Object::Str(Str::new("same")), &[]);
    assert!(heap.values_equal(Value::Obj(a), Value::Obj(b)));
}

#[test]
fn values_equal_compares_ranges_by_content() {
    let mut heap = fresh_heap();
    let a = heap.alloc(Object::Range(Range { from: 0.0, to: 5.0, inclusive: true }), &[]);
    let b = heap.alloc(Object::Range(Range { from: 0.0, to: 5.0, inclusive: true }), &[]);
    assert!(heap.values_equal(Value::Obj(a), Value::Obj(b)));
}

#[test]
fn values_equal_is_identity_based_for_lists() {
    let mut heap = fresh_heap();
    let a = heap.alloc(Object::List(vec![]), &[]);
    let b = heap.alloc(Object::List(vec![]), &[]);
    assert!(!heap.values_equal(Value::Obj(a), Value::Obj(b)));
    assert!(heap.values_equal(Value::Obj(a), Value::Obj(a)));
}

#[test]
fn print_value_renders_lists_recursively() {
    let mut heap = fresh_heap();
    let s = heap.alloc(Object::Str(Str::new("x")), &[]);
    let list = heap.alloc(Object::List(vec![Value::Num(1.0), Value::Obj(s)]), &[]);
    assert_eq!(heap.print_value(Value::Obj(list)), "[1, x]");
}

#[test]
fn pin_protects_a_handle_across_a_collection_triggered_elsewhere() {
    let mut heap = fresh_heap();
    let pinned = heap.alloc(Object::Str(Str::new("pinned")), &[]);
    heap.pin(pinned);
    heap.collect(&[]);
    assert!(heap.get(pinned).is_some());
    heap.unpin();
    heap.collect(&[]);
    assert!(heap.get(pinned).is_none());
}
