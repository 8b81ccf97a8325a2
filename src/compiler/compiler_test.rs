// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Cardinal Authors

use super::*;
use crate::value::object::Module;

fn fresh() -> (Heap, Realm, Handle) {
    let mut heap = Heap::new(1 << 20, 1 << 16, 50);
    let realm = Realm::new();
    let module = heap.alloc(Object::Module(Module::new("main")), &[]);
    (heap, realm, module)
}

fn compile_ok(source: &str) -> (Chunk, Realm) {
    let (mut heap, mut realm, module) = fresh();
    let handle = compile(source, "<test>", module, &mut heap, &mut realm)
        .unwrap_or_else(|errs| panic!("unexpected compile errors: {errs:?}"));
    let Object::Fn(f) = heap.get(handle).expect("fn handle").clone() else {
        panic!("expected Fn object");
    };
    (f.chunk, realm)
}

#[test]
fn compiles_arithmetic_to_method_calls() {
    let (chunk, realm) = compile_ok("var x = 1 + 2 * 3\n");
    let text = disassemble::disassemble(&chunk, "test", &realm);
    assert!(text.contains("'+(_)'"), "{text}");
    assert!(text.contains("'*(_)'"), "{text}");
}

#[test]
fn compiles_comparison_and_is_to_method_calls() {
    let (chunk, realm) = compile_ok("var ok = 1 < 2\nvar t = 1 is Num\n");
    let text = disassemble::disassemble(&chunk, "test", &realm);
    assert!(text.contains("'<(_)'"), "{text}");
    assert!(text.contains("'is(_)'"), "{text}");
}

#[test]
fn compiles_if_and_while_without_errors() {
    let (mut heap, mut realm, module) = fresh();
    let source = "var i = 0\nwhile (i < 10) {\n  if (i == 5) { break }\n  i = i + 1\n}\n";
    let result = compile(source, "<test>", module, &mut heap, &mut realm);
    assert!(result.is_ok());
}

#[test]
fn reports_error_for_break_outside_loop() {
    let (mut heap, mut realm, module) = fresh();
    let result = compile("break\n", "<test>", module, &mut heap, &mut realm);
    assert!(matches!(result, Err(errs) if matches!(errs.as_slice(), [CompileError::BreakOutsideLoop { .. }])));
}

#[test]
fn compiles_class_with_fields_and_methods() {
    let (mut heap, mut realm, module) = fresh();
    let source = "class Point {\n  fields { _x, _y }\n  construct new(x, y) {\n    _x = x\n    _y = y\n  }\n  x { _x }\n  x=(value) { _x = value }\n  +(other) { return _x + other.x }\n}\n";
    let result = compile(source, "<test>", module, &mut heap, &mut realm);
    assert!(result.is_ok(), "{:?}", result.err());
    assert!(realm.methods.lookup("x").is_some());
    assert!(realm.methods.lookup("x=(_)").is_some());
    assert!(realm.methods.lookup("+(_)").is_some());
    assert!(realm.methods.lookup("new(_,_)").is_some());
}

#[test]
fn compiles_closure_capturing_outer_local() {
    let (chunk, realm) = compile_ok("var x = 1\nvar f = { || x = x + 1 }\n");
    let text = disassemble::disassemble(&chunk, "test", &realm);
    assert!(text.contains("Closure"), "{text}");
}

#[test]
fn compiles_for_loop_desugaring() {
    let (mut heap, mut realm, module) = fresh();
    let result = compile("for (item in [1, 2, 3]) {\n  System.print(item)\n}\n", "<test>", module, &mut heap, &mut realm);
    assert!(result.is_ok(), "{:?}", result.err());
    assert!(realm.methods.lookup("iterate(_)").is_some());
    assert!(realm.methods.lookup("iteratorValue(_)").is_some());
}

#[test]
fn reports_error_for_a_call_with_too_many_arguments() {
    let (mut heap, mut realm, module) = fresh();
    let args = (0..17).map(|i| i.to_string()).collect::<Vec<_>>().join(",");
    let source = format!("f({args})\n");
    let result = compile(&source, "<test>", module, &mut heap, &mut realm);
    assert!(
        matches!(&result, Err(errs) if errs.iter().any(|e| matches!(e, CompileError::TooManyParameters { .. }))),
        "{result:?}"
    );
}

#[test]
fn reports_error_for_a_super_call_with_too_many_arguments() {
    let (mut heap, mut realm, module) = fresh();
    let args = (0..17).map(|i| i.to_string()).collect::<Vec<_>>().join(",");
    let source = format!(
        "class A {{\n  construct new() {{}}\n}}\nclass B is A {{\n  construct new() {{\n    super.go({args})\n  }}\n}}\n"
    );
    let result = compile(&source, "<test>", module, &mut heap, &mut realm);
    assert!(
        matches!(&result, Err(errs) if errs.iter().any(|e| matches!(e, CompileError::TooManyParameters { .. }))),
        "{result:?}"
    );
}
