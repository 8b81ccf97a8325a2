// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Cardinal Authors

use super::*;
use crate::config::Configuration;
use std::cell::RefCell;
use std::rc::Rc;

fn eval(source: &str) -> Value {
    let mut vm = Vm::new(Configuration::default());
    vm.interpret(source, "main").unwrap_or_else(|e| panic!("{e}"))
}

fn eval_err(source: &str) -> RuntimeError {
    let mut vm = Vm::new(Configuration::default());
    match vm.interpret(source, "main") {
        Err(CardinalError::Runtime { error, .. }) => error,
        other => panic!("expected a runtime error, got {other:?}"),
    }
}

fn eval_with_output(source: &str) -> String {
    let out = Rc::new(RefCell::new(String::new()));
    let sink = out.clone();
    let config = Configuration::default().with_print(move |s| sink.borrow_mut().push_str(s));
    let mut vm = Vm::new(config);
    vm.interpret(source, "main").unwrap_or_else(|e| panic!("{e}"));
    out.borrow().clone()
}

fn as_string<'a>(vm: &'a Vm, value: Value) -> &'a str {
    let Some(Object::Str(s)) = vm.heap.get(value.as_obj().expect("expected an object")) else {
        panic!("expected a string")
    };
    s.as_str()
}

#[test]
fn arithmetic_compiles_to_method_dispatch_and_runs() {
    assert_eq!(eval("return 1 + 2 * 3\n").as_num(), Some(7.0));
    assert_eq!(eval("return (1 + 2) * 3\n").as_num(), Some(9.0));
    assert_eq!(eval("return 10 % 3\n").as_num(), Some(1.0));
}

#[test]
fn comparisons_and_is_dispatch_through_object_methods() {
    assert_eq!(eval("return 1 < 2\n").as_bool(), Some(true));
    assert_eq!(eval("return 1 is Num\n").as_bool(), Some(true));
    assert_eq!(eval("return \"x\" is Num\n").as_bool(), Some(false));
}

#[test]
fn string_concatenation() {
    let mut vm = Vm::new(Configuration::default());
    let result = vm.interpret("return \"foo\" + \"bar\"\n", "main").unwrap();
    assert_eq!(as_string(&vm, result), "foobar");
}

#[test]
fn if_while_and_for_loops_run_to_completion() {
    let source = "var total = 0\nfor (i in 1..5) {\n  total = total + i\n}\nreturn total\n";
    assert_eq!(eval(source).as_num(), Some(10.0));
}

#[test]
fn system_print_goes_through_the_configured_sink() {
    let output = eval_with_output("System.print(\"hi\")\n");
    assert_eq!(output, "hi\n");
}

#[test]
fn class_with_fields_constructor_and_methods() {
    let source = "\
class Point {\n\
  fields { _x, _y }\n\
  construct new(x, y) {\n\
    _x = x\n\
    _y = y\n\
  }\n\
  x { return _x }\n\
  y { return _y }\n\
  sum { return _x + _y }\n\
}\n\
var p = Point.new(3, 4)\n\
return p.sum\n";
    assert_eq!(eval(source).as_num(), Some(7.0));
}

#[test]
fn field_setter_mutates_the_instance() {
    let source = "\
class Cell {\n\
  fields { _v }\n\
  construct new(v) { _v = v }\n\
  value { return _v }\n\
  value=(v) { _v = v }\n\
}\n\
var c = Cell.new(1)\n\
c.value = 41\n\
return c.value\n";
    assert_eq!(eval(source).as_num(), Some(41.0));
}

#[test]
fn single_inheritance_super_call_and_dynamic_override_dispatch() {
    // `describe`'s implicit `this.sound` call resolves against the
    // receiver's dynamic class (`Dog`), not the defining class (`Animal`),
    // even though it's reached through `super.describe`.
    let source = "\
class Animal {\n\
  construct new() { }\n\
  sound { return \"generic sound\" }\n\
  describe { return \"an animal that says \" + sound }\n\
}\n\
class Dog is Animal {\n\
  construct new() { }\n\
  sound { return \"woof\" }\n\
  describe { return super.describe + \"!\" }\n\
}\n\
var d = Dog.new()\n\
return d.describe\n";
    let mut vm = Vm::new(Configuration::default());
    let result = vm.interpret(source, "main").unwrap();
    assert_eq!(as_string(&vm, result), "an animal that says woof!");
}

#[test]
fn secondary_superclass_field_access_resolves_through_the_offset_delta() {
    // `Powered`'s field sits after `Movable`'s (the primary super) in
    // `Car`'s flattened layout; reaching `setLevel`/`level` only through
    // the secondary superclass exercises the `super_adjust` delta that
    // `LoadFieldThis` relies on inside `Powered`'s own method bodies.
    let source = "\
class Movable {\n\
  fields { _speed }\n\
  construct new() { _speed = 0 }\n\
  speed { return _speed }\n\
  setSpeed(v) { _speed = v }\n\
}\n\
class Powered {\n\
  fields { _level }\n\
  construct new() { _level = 0 }\n\
  level { return _level }\n\
  setLevel(v) { _level = v }\n\
}\n\
class Car is Movable, Powered {\n\
  construct new() { }\n\
}\n\
var c = Car.new()\n\
c.setSpeed(88)\n\
c.setLevel(5)\n\
return c.speed + c.level\n";
    assert_eq!(eval(source).as_num(), Some(93.0));
}

#[test]
fn bare_super_call_chains_to_every_direct_superclass_constructor() {
    // `super()` with no receiver repeats once per direct superclass,
    // primary first; each chained constructor must land its own field
    // writes at its own offset within `Car`'s flattened layout rather
    // than colliding with the other superclass's fields.
    let source = "\
class Movable {\n\
  fields { _speed }\n\
  construct new() { _speed = 1 }\n\
  speed { return _speed }\n\
}\n\
class Powered {\n\
  fields { _level }\n\
  construct new() { _level = 2 }\n\
  level { return _level }\n\
}\n\
class Car is Movable, Powered {\n\
  construct new() { super() }\n\
}\n\
var c = Car.new()\n\
return c.speed + c.level\n";
    assert_eq!(eval(source).as_num(), Some(3.0));
}

#[test]
fn bare_super_call_forwards_arguments_to_every_superclass_constructor() {
    let source = "\
class A {\n\
  fields { _a }\n\
  construct new(v) { _a = v }\n\
  a { return _a }\n\
}\n\
class B {\n\
  fields { _b }\n\
  construct new(v) { _b = v }\n\
  b { return _b }\n\
}\n\
class C is A, B {\n\
  construct new(v) { super(v) }\n\
}\n\
var c = C.new(5)\n\
return c.a + c.b\n";
    assert_eq!(eval(source).as_num(), Some(10.0));
}

#[test]
fn closures_capture_and_mutate_outer_locals() {
    let source = "\
var count = 0\n\
var inc = { || count = count + 1 }\n\
inc.call()\n\
inc.call()\n\
inc.call()\n\
return count\n";
    assert_eq!(eval(source).as_num(), Some(3.0));
}

#[test]
fn nested_closures_each_keep_independent_state() {
    let source = "\
class Counters {\n\
  static make {\n\
    var n = 0\n\
    return { || n = n + 1 }\n\
  }\n\
}\n\
var a = Counters.make\n\
var b = Counters.make\n\
a.call()\n\
a.call()\n\
b.call()\n\
return a.call()\n";
    assert_eq!(eval(source).as_num(), Some(3.0));
}

#[test]
fn a_block_body_ending_in_a_bare_expression_returns_its_value() {
    // No explicit `return` anywhere in the closure body — the final `x`
    // must still flow out of `.call()` as the implicit return value.
    let source = "\
var make = Fn.new { |x| Fn.new { x = x + 1; x } }\n\
var f = make.call(10)\n\
f.call()\n\
f.call()\n\
return f.call()\n";
    assert_eq!(eval(source).as_num(), Some(13.0));
}

#[test]
fn named_function_declarations_compile_and_can_recurse() {
    let source = "\
function fib(n) {\n\
  if (n < 2) {\n\
    return n\n\
  }\n\
  return fib(n - 1) + fib(n - 2)\n\
}\n\
return fib(10)\n";
    assert_eq!(eval(source).as_num(), Some(55.0));
}

#[test]
fn named_function_without_an_explicit_return_yields_its_last_expression() {
    let source = "\
function square(n) {\n\
  n * n\n\
}\n\
return square(7)\n";
    assert_eq!(eval(source).as_num(), Some(49.0));
}

#[test]
fn fiber_yield_suspends_and_call_resumes_with_the_transferred_value() {
    let source = "\
var fiber = Fiber.new {\n\
  |start|\n\
  var doubled = Fiber.yield(start * 2)\n\
  return doubled + 1\n\
}\n\
var first = fiber.call(10)\n\
return fiber.call(first)\n";
    assert_eq!(eval(source).as_num(), Some(21.0));
}

#[test]
fn run_tail_transfers_the_callers_own_caller_to_the_callee() {
    // `a.run()` must point `b`'s caller at whoever called `a` (the script's
    // own fiber), not at `a` itself — so `b`'s `yield` resumes the script
    // directly, skipping `a` entirely. Under plain `call` semantics `b`
    // would instead resume `a`, and `a.call()` here would never see `99`.
    let source = "\
var b = Fiber.new { || Fiber.yield(99) }\n\
var a = Fiber.new { || b.run() }\n\
return a.call()\n";
    assert_eq!(eval(source).as_num(), Some(99.0));
}

#[test]
fn method_new_binds_a_signature_and_dispatches_through_the_receivers_own_class() {
    // `Method.new(name, receiver)` curries a signature against a receiver;
    // `.call()` must resolve and dispatch against *that* receiver's own
    // class (`Num`), not against `Method`'s own method table.
    let source = "\
var m = Method.new(\"toString\", 5)\n\
return m.call()\n";
    let mut vm = Vm::new(Configuration::default());
    let result = vm.interpret(source, "main").unwrap();
    assert_eq!(as_string(&vm, result), "5");
}

#[test]
fn method_new_without_a_receiver_is_not_callable() {
    let err = eval_err("var m = Method.new(\"toString\")\nreturn m.call()\n");
    assert!(matches!(err, RuntimeError::NotCallable { .. }), "{err:?}");
}

#[test]
fn method_arity_counts_underscores_in_the_bound_signature() {
    let source = "\
var m = Method.new(\"+(_)\", 1)\n\
return m.arity\n";
    assert_eq!(eval(source).as_num(), Some(1.0));
}

#[test]
fn bytecode_blob_round_trips_through_dump_and_load() {
    let mut vm = Vm::new(Configuration::default());
    let compiled = vm.compile("return 6 * 7\n", "main").unwrap_or_else(|errs| panic!("{errs:?}"));
    let blob = vm.dump_bytecode(compiled);
    assert_eq!(&blob[..11], b"#CARDINALBC");

    let mut vm2 = Vm::new(Configuration::default());
    let loaded = vm2.load_bytecode(&blob, "main").unwrap_or_else(|e| panic!("{e}"));
    let result = vm2.run_compiled(loaded).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(result.as_num(), Some(42.0));
}

#[test]
fn bytecode_blob_rejects_a_bad_magic() {
    let mut vm = Vm::new(Configuration::default());
    let err = vm.load_bytecode(b"not a blob at all!!", "main").unwrap_err();
    assert!(matches!(err, RuntimeError::InvalidBytecode { .. }), "{err:?}");
}

#[test]
fn fiber_is_done_reflects_completion() {
    let source = "\
var fiber = Fiber.new { || 42 }\n\
var before = fiber.isDone\n\
fiber.call()\n\
var after = fiber.isDone\n\
return before == false && after == true\n";
    assert_eq!(eval(source).as_bool(), Some(true));
}

#[test]
fn fiber_try_catches_an_error_raised_in_the_called_fiber() {
    let source = "\
var fiber = Fiber.new { || [].removeAt(0) }\n\
var err = fiber.try()\n\
return fiber.isDone\n";
    assert_eq!(eval(source).as_bool(), Some(true));
}

#[test]
fn uncaught_error_in_a_plain_call_propagates_to_the_embedder() {
    let err = eval_err("return [1].removeAt(5)\n");
    assert!(matches!(err, RuntimeError::IndexOutOfBounds { .. }), "{err:?}");
}

#[test]
fn calling_an_undefined_method_errors_with_method_not_found() {
    let err = eval_err("return 1.thisMethodDoesNotExist()\n");
    assert!(matches!(err, RuntimeError::MethodNotFound { .. }), "{err:?}");
}

#[test]
fn module_import_resolves_a_variable_from_another_module() {
    let config = Configuration::default().with_load_module(|name| {
        if name == "helpers" {
            Some("var greeting = \"hello from helpers\"\n".to_string())
        } else {
            None
        }
    });
    let mut vm = Vm::new(config);
    let result = vm.interpret("import \"helpers\" for greeting\nreturn greeting\n", "main").unwrap();
    assert_eq!(as_string(&vm, result), "hello from helpers");
}

#[test]
fn import_of_a_missing_module_errors() {
    let err = eval_err("import \"does-not-exist\" for x\nreturn x\n");
    assert!(matches!(err, RuntimeError::ModuleNotFound { .. }), "{err:?}");
}

#[test]
fn list_and_map_round_trip_through_their_primitives() {
    let source = "\
var list = [1, 2, 3]\n\
list.add(4)\n\
var map = Map.new()\n\
map[\"a\"] = 1\n\
map[\"b\"] = 2\n\
return list.count + map.count\n";
    assert_eq!(eval(source).as_num(), Some(6.0));
}

#[test]
fn error_rendering_allocates_a_string_for_the_embedder_facing_value() {
    let mut vm = Vm::new(Configuration::default());
    let err = RuntimeError::DivisionByZero;
    let value = vm.error_to_value(&err);
    assert_eq!(as_string(&vm, value), "division by zero");
}
