// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Cardinal Authors

use super::*;

#[test]
fn new_fiber_starts_empty_and_unstarted() {
    let fiber = Fiber::new(64, 8);
    assert_eq!(fiber.status, FiberStatus::New);
    assert!(fiber.stack.is_empty());
    assert!(fiber.frames.is_empty());
}

#[test]
fn distinct_fibers_get_distinct_ids() {
    let a = Fiber::new(64, 8);
    let b = Fiber::new(64, 8);
    assert_ne!(a.id, b.id);
}

#[test]
fn push_pop_and_peek_follow_stack_discipline() {
    let mut fiber = Fiber::new(64, 8);
    fiber.push(Value::Num(1.0)).unwrap();
    fiber.push(Value::Num(2.0)).unwrap();
    assert_eq!(fiber.peek(0).as_num(), Some(2.0));
    assert_eq!(fiber.peek(1).as_num(), Some(1.0));
    assert_eq!(fiber.pop().as_num(), Some(2.0));
    assert_eq!(fiber.pop().as_num(), Some(1.0));
}

#[test]
fn push_past_stack_max_overflows() {
    let mut fiber = Fiber::new(2, 8);
    fiber.push(Value::Null).unwrap();
    fiber.push(Value::Null).unwrap();
    assert_eq!(fiber.push(Value::Null), Err(StackOverflow));
}

#[test]
fn frame_stack_respects_call_depth_max() {
    let mut fiber = Fiber::new(64, 1);
    let frame = CallFrame { closure: Handle::new(0, 0), ip: 0, base: 0, pushed_super_adjust: false, defining_class: None };
    assert!(fiber.push_frame(frame.clone()).is_ok());
    assert_eq!(fiber.push_frame(frame), Err(StackOverflow));
}

#[test]
fn truncate_discards_trailing_values() {
    let mut fiber = Fiber::new(64, 8);
    for i in 0..5 {
        fiber.push(Value::Num(f64::from(i))).unwrap();
    }
    fiber.truncate(2);
    assert_eq!(fiber.stack.len(), 2);
}

#[test]
fn value_stack_grows_by_1_7x_not_2x() {
    assert_eq!(grow_capacity(10, STACK_GROW_FACTOR), 17);
    assert_eq!(grow_capacity(100, STACK_GROW_FACTOR), 170);
}

#[test]
fn call_frame_stack_grows_by_2x() {
    assert_eq!(grow_capacity(16, FRAME_GROW_FACTOR), 32);
    assert_eq!(grow_capacity(8, FRAME_GROW_FACTOR), 16);
}

#[test]
fn grow_capacity_always_grows_at_least_one_slot() {
    assert_eq!(grow_capacity(0, STACK_GROW_FACTOR), 1);
    assert_eq!(grow_capacity(1, STACK_GROW_FACTOR), 2);
}

#[test]
fn pushing_past_initial_capacity_reserves_at_least_the_grown_target() {
    let mut fiber = Fiber::new(1024, 8);
    let initial_cap = fiber.stack.capacity();
    for i in 0..=initial_cap {
        fiber.push(Value::Num(f64::from(i as u32))).unwrap();
    }
    assert!(fiber.stack.capacity() >= grow_capacity(initial_cap, STACK_GROW_FACTOR));
}

#[test]
fn indices_stay_valid_across_growth_no_rebasing_needed() {
    // Unlike a raw-pointer stack, growing past the initial `Vec` capacity
    // never invalidates a previously recorded base index.
    let mut fiber = Fiber::new(1024, 8);
    for i in 0..200 {
        fiber.push(Value::Num(f64::from(i))).unwrap();
    }
    let frame = CallFrame { closure: Handle::new(0, 0), ip: 0, base: 100, pushed_super_adjust: false, defining_class: None };
    fiber.push_frame(frame).unwrap();
    assert_eq!(fiber.current_frame().unwrap().base, 100);
    assert_eq!(fiber.stack[100].as_num(), Some(100.0));
}
