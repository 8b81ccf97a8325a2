// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Cardinal Authors

//! End-to-end scenarios exercising the compiler, VM, fiber scheduler, and
//! garbage collector together, against the public embedding API rather than
//! any single internal module.

use cardinal::value::object::Object;
use cardinal::{CardinalError, Configuration, Value, Vm};

fn eval(vm: &mut Vm, source: &str) -> Value {
    vm.interpret(source, "main").unwrap_or_else(|e| panic!("{e}"))
}

fn as_string<'a>(vm: &'a Vm, value: Value) -> &'a str {
    let Some(Object::Str(s)) = vm.heap.get(value.as_obj().expect("expected a string object")) else {
        panic!("expected a string")
    };
    s.as_str()
}

#[test]
fn closures_capture_outer_locals_by_reference() {
    let mut vm = Vm::new(Configuration::default());
    let source = "\
var make = Fn.new { |x| Fn.new { x = x + 1; x } }\n\
var f = make.call(10)\n\
f.call()\n\
f.call()\n\
return f.call()\n";
    assert_eq!(eval(&mut vm, source).as_num(), Some(13.0));
}

#[test]
fn multiple_inheritance_chains_bare_super_into_every_direct_superclass() {
    let mut vm = Vm::new(Configuration::default());
    let source = "\
class A {\n\
  fields { _a }\n\
  construct new() { _a = 1 }\n\
  getA { return _a }\n\
}\n\
class B {\n\
  fields { _b }\n\
  construct new() { _b = 2 }\n\
  getB { return _b }\n\
}\n\
class C is A, B {\n\
  construct new() { super() }\n\
}\n\
var c = C.new()\n\
return c.getA + c.getB\n";
    assert_eq!(eval(&mut vm, source).as_num(), Some(3.0));
}

#[test]
fn fiber_yield_passes_values_both_ways_across_three_resumptions() {
    // Each `Fiber.yield` expression's value is whatever the *next*
    // `fiber.call(arg)` passes in; the fiber's own return value surfaces
    // from the call that runs it to completion.
    let mut vm = Vm::new(Configuration::default());
    let source = "\
var g = Fiber.new {\n\
  |n|\n\
  var x = Fiber.yield(n + 1)\n\
  Fiber.yield(x * 2)\n\
  return \"done\"\n\
}\n\
var first = g.call(10).toString\n\
var second = g.call(5).toString\n\
var third = g.call(999)\n\
return first + \":\" + second + \":\" + third\n";
    let result = eval(&mut vm, source);
    assert_eq!(as_string(&vm, result), "11:10:done");
}

#[test]
fn try_catches_an_abort_and_receives_its_message() {
    let mut vm = Vm::new(Configuration::default());
    let source = "\
var f = Fiber.new { Fiber.abort(\"bad\") }\n\
var e = f.try()\n\
return e\n";
    let result = eval(&mut vm, source);
    assert_eq!(as_string(&vm, result), "bad");
}

#[test]
fn maps_preserve_every_value_across_repeated_growth() {
    let mut vm = Vm::new(Configuration::default());
    let source = "\
var map = Map.new()\n\
var i = 0\n\
while (i < 1000) {\n\
  map[i] = i * i\n\
  i = i + 1\n\
}\n\
var ok = true\n\
i = 0\n\
while (i < 1000) {\n\
  if (map[i] != i * i) {\n\
    ok = false\n\
  }\n\
  i = i + 1\n\
}\n\
return ok && map.count == 1000\n";
    assert_eq!(eval(&mut vm, source).as_bool(), Some(true));
}

#[test]
fn collect_reclaims_unreachable_strings_but_leaves_reachable_ones() {
    let mut vm = Vm::new(Configuration::default());
    let source = "\
var strings = []\n\
var i = 0\n\
while (i < 100000) {\n\
  strings.add(i.toString)\n\
  i = i + 1\n\
}\n\
System.gc()\n\
var before = System.bytesInUse\n\
strings.clear()\n\
System.gc()\n\
return before - System.bytesInUse\n";
    // Rough per-string floor from `heap::object_size` (32-byte `Str` header
    // plus its bytes) times the shortest stringified indices; good enough to
    // tell "most of it was reclaimed" from "nothing was reclaimed".
    let reclaimed = eval(&mut vm, source).as_num().expect("numeric result");
    assert!(reclaimed > 3_200_000.0, "expected a large reclaim, got {reclaimed}");
}

#[test]
fn without_a_collection_bytes_in_use_never_drops() {
    // Same allocate-then-drop-the-reference shape as the previous scenario,
    // but with no `System.gc()` call anywhere: nothing sweeps the now-
    // unreachable strings, so `bytesInUse` only ever grows.
    let config = Configuration::default();
    let mut vm = Vm::new(config);
    let source = "\
var strings = []\n\
var i = 0\n\
while (i < 1000) {\n\
  strings.add(i.toString)\n\
  i = i + 1\n\
}\n\
var before = System.bytesInUse\n\
strings.clear()\n\
return System.bytesInUse - before\n";
    let delta = eval(&mut vm, source).as_num().expect("numeric result");
    assert!(delta >= 0.0, "bytesInUse must not drop without a collection, got delta {delta}");
}

#[test]
fn uncaught_abort_surfaces_to_the_embedder_as_a_runtime_error() {
    let mut vm = Vm::new(Configuration::default());
    match vm.interpret("Fiber.abort(\"boom\")\n", "main") {
        Err(CardinalError::Runtime { .. }) => {}
        other => panic!("expected a runtime error, got {other:?}"),
    }
}
