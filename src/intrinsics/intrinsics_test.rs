// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Cardinal Authors

use super::*;
use crate::heap::Heap;
use crate::realm::Realm;
use crate::value::object::{Object, Str};

fn run(heap: &mut Heap, realm: &mut Realm, fiber: Handle, id: Primitive, args: &[Value]) -> Value {
    let mut ctx = PrimitiveContext { heap, realm, args, current_fiber: fiber, print: None };
    match dispatch(id, &mut ctx) {
        PrimitiveResult::Value(v) => v,
        PrimitiveResult::Error(e) => panic!("primitive {id:?} errored: {e}"),
        PrimitiveResult::RunFiber { .. } => panic!("primitive {id:?} unexpectedly asked to switch fibers"),
    }
}

fn fresh() -> (Heap, Realm, Handle) {
    let mut heap = Heap::new(1 << 20, 1 << 16, 50);
    let realm = Realm::new();
    let fiber = heap.alloc(Object::Fiber(crate::process::Fiber::new(256, 32)), &[]);
    (heap, realm, fiber)
}

#[test]
fn primitive_id_round_trips_through_u16() {
    assert_eq!(Primitive::from_u16(Primitive::NumPlus.to_u16()), Some(Primitive::NumPlus));
    assert_eq!(Primitive::from_u16(Primitive::SystemGc.to_u16()), Some(Primitive::SystemGc));
    assert_eq!(Primitive::from_u16(Primitive::SystemGc.to_u16() + 1), None);
}

#[test]
fn num_arithmetic_and_comparisons() {
    let (mut heap, mut realm, fiber) = fresh();
    let sum = run(&mut heap, &mut realm, fiber, Primitive::NumPlus, &[Value::Num(2.0), Value::Num(3.0)]);
    assert_eq!(sum.as_num(), Some(5.0));
    let lt = run(&mut heap, &mut realm, fiber, Primitive::NumLt, &[Value::Num(2.0), Value::Num(3.0)]);
    assert_eq!(lt.as_bool(), Some(true));
}

#[test]
fn num_division_by_zero_errors() {
    let (mut heap, mut realm, fiber) = fresh();
    let mut ctx = PrimitiveContext {
        heap: &mut heap,
        realm: &mut realm,
        args: &[Value::Num(1.0), Value::Num(0.0)],
        current_fiber: fiber,
        print: None,
    };
    assert!(matches!(dispatch(Primitive::NumSlash, &mut ctx), PrimitiveResult::Error(RuntimeError::DivisionByZero)));
}

#[test]
fn string_concatenation_allocates_a_new_string() {
    let (mut heap, mut realm, fiber) = fresh();
    let a = heap.alloc(Object::Str(Str::new("foo")), &[fiber]);
    let b = heap.alloc(Object::Str(Str::new("bar")), &[fiber]);
    let result = run(&mut heap, &mut realm, fiber, Primitive::StrPlus, &[Value::Obj(a), Value::Obj(b)]);
    let Some(Object::Str(s)) = heap.get(result.as_obj().unwrap()) else { panic!("expected a string") };
    assert_eq!(s.as_str(), "foobar");
}

#[test]
fn list_add_and_subscript_round_trip() {
    let (mut heap, mut realm, fiber) = fresh();
    let list = run(&mut heap, &mut realm, fiber, Primitive::ListNew, &[Value::Null]);
    let list_handle = list.as_obj().unwrap();
    run(&mut heap, &mut realm, fiber, Primitive::ListAdd, &[Value::Obj(list_handle), Value::Num(42.0)]);
    let item = run(&mut heap, &mut realm, fiber, Primitive::ListSubscript, &[Value::Obj(list_handle), Value::Num(0.0)]);
    assert_eq!(item.as_num(), Some(42.0));
}

#[test]
fn list_subscript_out_of_bounds_errors() {
    let (mut heap, mut realm, fiber) = fresh();
    let list = run(&mut heap, &mut realm, fiber, Primitive::ListNew, &[Value::Null]);
    let mut ctx = PrimitiveContext {
        heap: &mut heap,
        realm: &mut realm,
        args: &[list, Value::Num(0.0)],
        current_fiber: fiber,
        print: None,
    };
    assert!(matches!(
        dispatch(Primitive::ListSubscript, &mut ctx),
        PrimitiveResult::Error(RuntimeError::IndexOutOfBounds { .. })
    ));
}

#[test]
fn map_insert_lookup_and_remove() {
    let (mut heap, mut realm, fiber) = fresh();
    let map = run(&mut heap, &mut realm, fiber, Primitive::MapNew, &[Value::Null]);
    let map_handle = map.as_obj().unwrap();
    run(
        &mut heap,
        &mut realm,
        fiber,
        Primitive::MapSubscriptSet,
        &[Value::Obj(map_handle), Value::Num(1.0), Value::Num(100.0)],
    );
    let found = run(&mut heap, &mut realm, fiber, Primitive::MapSubscript, &[Value::Obj(map_handle), Value::Num(1.0)]);
    assert_eq!(found.as_num(), Some(100.0));
    let removed =
        run(&mut heap, &mut realm, fiber, Primitive::MapRemove, &[Value::Obj(map_handle), Value::Num(1.0)]);
    assert_eq!(removed.as_num(), Some(100.0));
    let missing =
        run(&mut heap, &mut realm, fiber, Primitive::MapContainsKey, &[Value::Obj(map_handle), Value::Num(1.0)]);
    assert_eq!(missing.as_bool(), Some(false));
}

#[test]
fn range_iterate_walks_from_from_to_to_exclusive() {
    let (mut heap, mut realm, fiber) = fresh();
    let range = heap.alloc(Object::Range(crate::value::object::Range { from: 0.0, to: 3.0, inclusive: false }), &[fiber]);
    let mut cursor = Value::Null;
    let mut seen = vec![];
    loop {
        let next = run(&mut heap, &mut realm, fiber, Primitive::RangeIterate, &[Value::Obj(range), cursor]);
        if next.as_bool() == Some(false) {
            break;
        }
        seen.push(next.as_num().unwrap());
        cursor = next;
    }
    assert_eq!(seen, vec![0.0, 1.0, 2.0]);
}

#[test]
fn object_eqeq_uses_content_equality_for_strings() {
    let (mut heap, mut realm, fiber) = fresh();
    let a = heap.alloc(Object::Str(Str::new("x")), &[fiber]);
    let b = heap.alloc(Object::Str(Str::new("x")), &[fiber]);
    let eq = run(&mut heap, &mut realm, fiber, Primitive::ObjectEqEq, &[Value::Obj(a), Value::Obj(b)]);
    assert_eq!(eq.as_bool(), Some(true));
}

#[test]
fn system_clock_returns_a_positive_timestamp() {
    let (mut heap, mut realm, fiber) = fresh();
    let now = run(&mut heap, &mut realm, fiber, Primitive::SystemClock, &[Value::Null]);
    assert!(now.as_num().unwrap() > 0.0);
}
