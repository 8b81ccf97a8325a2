// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Cardinal Authors

//! `Object`, `Class`, `Fiber`, and `System` primitive method bodies.

use super::{Primitive, PrimitiveContext, PrimitiveResult};
use crate::error::RuntimeError;
use crate::process::{Fiber, FiberStatus};
use crate::value::object::{BoundMethod, Object, Str};
use crate::value::Value;

fn expect_str<'h>(ctx: &'h PrimitiveContext<'_>, v: Value) -> Result<&'h Str, RuntimeError> {
    match v {
        Value::Obj(h) => match ctx.heap.get(h) {
            Some(Object::Str(s)) => Ok(s),
            Some(other) => Err(RuntimeError::TypeError { expected: "String", got: other.type_name() }),
            None => Err(RuntimeError::TypeError { expected: "String", got: "freed" }),
        },
        other => Err(RuntimeError::TypeError { expected: "String", got: other.type_name() }),
    }
}

pub fn dispatch_object(id: Primitive, ctx: &mut PrimitiveContext<'_>) -> PrimitiveResult {
    let receiver = ctx.receiver();
    match id {
        Primitive::ObjectEqEq => Value::Bool(ctx.heap.values_equal(receiver, ctx.arg(0))).into(),
        Primitive::ObjectBangEq => Value::Bool(!ctx.heap.values_equal(receiver, ctx.arg(0))).into(),
        Primitive::ObjectSame => Value::Bool(receiver.identity_eq(&ctx.arg(0))).into(),
        Primitive::ObjectToString => {
            let rendered = ctx.heap.print_value(receiver);
            let handle = ctx.alloc(Object::Str(Str::new(rendered)));
            Value::Obj(handle).into()
        }
        Primitive::ObjectIs => {
            let Some(target_class) = ctx.arg(0).as_obj() else {
                return RuntimeError::TypeError { expected: "Class", got: ctx.arg(0).type_name() }.into();
            };
            let Some(receiver_class) = class_of(ctx, receiver) else {
                return Value::Bool(false).into();
            };
            Value::Bool(is_subclass(ctx, receiver_class, target_class)).into()
        }
        _ => unreachable!("dispatch_object received a non-Object primitive id"),
    }
}

/// The class a value is an instance of: the instance's own class for
/// `Instance`, or the `Class` object itself for a bare class value (so
/// `SomeClass is Class` can hold without a separate metaclass lookup).
fn class_of(ctx: &PrimitiveContext<'_>, value: Value) -> Option<crate::value::Handle> {
    match value {
        Value::Obj(h) => match ctx.heap.get(h)? {
            Object::Instance(inst) => Some(inst.class),
            Object::Class(class) => class.metaclass,
            _ => None,
        },
        _ => None,
    }
}

fn is_subclass(ctx: &PrimitiveContext<'_>, class: crate::value::Handle, target: crate::value::Handle) -> bool {
    let mut seen = std::collections::HashSet::new();
    let mut frontier = vec![class];
    while let Some(h) = frontier.pop() {
        if h == target {
            return true;
        }
        if !seen.insert(h) {
            continue;
        }
        if let Some(Object::Class(c)) = ctx.heap.get(h) {
            frontier.extend(c.supers.iter().copied());
        }
    }
    false
}

pub fn dispatch_class(id: Primitive, ctx: &mut PrimitiveContext<'_>) -> PrimitiveResult {
    let Value::Obj(handle) = ctx.receiver() else {
        return RuntimeError::TypeError { expected: "Class", got: ctx.receiver().type_name() }.into();
    };
    let Some(Object::Class(class)) = ctx.heap.get(handle) else {
        return RuntimeError::TypeError { expected: "Class", got: "freed" }.into();
    };

    match id {
        Primitive::ClassName | Primitive::ClassToString => {
            let name = class.name.clone();
            let handle = ctx.alloc(Object::Str(Str::new(name)));
            Value::Obj(handle).into()
        }
        Primitive::ClassSuperclass => match class.supers.first() {
            Some(&h) => Value::Obj(h).into(),
            None => Value::Null.into(),
        },
        _ => unreachable!("dispatch_class received a non-Class primitive id"),
    }
}

/// `Fn.new(block)` is the trailing-block constructor the compiler's
/// `.new { ... }` call-with-block sugar emits: the block literal already
/// produced a `Closure` object, so this is just a type-checked identity
/// rather than an allocation of its own.
pub fn dispatch_fn(id: Primitive, ctx: &mut PrimitiveContext<'_>) -> PrimitiveResult {
    match id {
        Primitive::FnNew => {
            let arg = ctx.arg(0);
            let is_closure = matches!(arg, Value::Obj(h) if matches!(ctx.heap.get(h), Some(Object::Closure(_))));
            if !is_closure {
                return RuntimeError::TypeError { expected: "Fn", got: arg.type_name() }.into();
            }
            arg.into()
        }
        _ => unreachable!("dispatch_fn received a non-Fn primitive id"),
    }
}

/// `Method.new`/`Method.new(_)`/`Method.new(_,_)`: a first-class, curried
/// `(symbol, name, receiver)` triple. The bare form leaves every field
/// unset; loading a signature that isn't interned yet just leaves `symbol`
/// unset too, rather than erroring at construction time — `.call(...)`
/// (`Vm::try_dispatch_method_call`) is what actually checks readiness.
pub fn dispatch_method(id: Primitive, ctx: &mut PrimitiveContext<'_>) -> PrimitiveResult {
    match id {
        Primitive::MethodNew => {
            let handle = ctx.alloc(Object::Method(BoundMethod::default()));
            Value::Obj(handle).into()
        }
        Primitive::MethodNew1 => {
            let name = match expect_str(ctx, ctx.arg(0)) {
                Ok(s) => s.as_str().to_string(),
                Err(e) => return e.into(),
            };
            let symbol = ctx.realm.methods.lookup(&name);
            let handle = ctx.alloc(Object::Method(BoundMethod { symbol, name: Some(name), receiver: None }));
            Value::Obj(handle).into()
        }
        Primitive::MethodNew2 => {
            let name = match expect_str(ctx, ctx.arg(0)) {
                Ok(s) => s.as_str().to_string(),
                Err(e) => return e.into(),
            };
            let symbol = ctx.realm.methods.lookup(&name);
            let receiver = ctx.arg(1);
            let handle = ctx.alloc(Object::Method(BoundMethod { symbol, name: Some(name), receiver: Some(receiver) }));
            Value::Obj(handle).into()
        }
        Primitive::MethodToString => {
            let Value::Obj(h) = ctx.receiver() else {
                return RuntimeError::TypeError { expected: "Method", got: ctx.receiver().type_name() }.into();
            };
            let Some(Object::Method(m)) = ctx.heap.get(h) else {
                return RuntimeError::TypeError { expected: "Method", got: "freed" }.into();
            };
            let rendered = m.name.clone().unwrap_or_else(|| "<method>".to_string());
            let handle = ctx.alloc(Object::Str(Str::new(rendered)));
            Value::Obj(handle).into()
        }
        Primitive::MethodArity => {
            let Value::Obj(h) = ctx.receiver() else {
                return RuntimeError::TypeError { expected: "Method", got: ctx.receiver().type_name() }.into();
            };
            let Some(Object::Method(m)) = ctx.heap.get(h) else {
                return RuntimeError::TypeError { expected: "Method", got: "freed" }.into();
            };
            let Some(symbol) = m.symbol else {
                return Value::Num(-1.0).into();
            };
            let arity = ctx.realm.methods.name_of(symbol).map_or(0, |sig| sig.matches('_').count());
            Value::Num(arity as f64).into()
        }
        _ => unreachable!("dispatch_method received a non-Method primitive id"),
    }
}

pub fn dispatch_fiber(id: Primitive, ctx: &mut PrimitiveContext<'_>) -> PrimitiveResult {
    match id {
        Primitive::FiberNew => {
            let Some(closure) = ctx.arg(0).as_obj() else {
                return RuntimeError::TypeError { expected: "Fn", got: ctx.arg(0).type_name() }.into();
            };
            let mut fiber = Fiber::new(4096, 256);
            fiber.entry = Some(closure);
            let handle = ctx.alloc(Object::Fiber(fiber));
            Value::Obj(handle).into()
        }
        Primitive::FiberCurrent => Value::Obj(ctx.current_fiber).into(),
        Primitive::FiberIsDone => {
            let Value::Obj(handle) = ctx.receiver() else {
                return RuntimeError::TypeError { expected: "Fiber", got: ctx.receiver().type_name() }.into();
            };
            let Some(Object::Fiber(fiber)) = ctx.heap.get(handle) else {
                return RuntimeError::TypeError { expected: "Fiber", got: "freed" }.into();
            };
            Value::Bool(matches!(fiber.status, FiberStatus::Finished | FiberStatus::Errored)).into()
        }
        Primitive::FiberError => {
            let Value::Obj(handle) = ctx.receiver() else {
                return RuntimeError::TypeError { expected: "Fiber", got: ctx.receiver().type_name() }.into();
            };
            let Some(Object::Fiber(fiber)) = ctx.heap.get(handle) else {
                return RuntimeError::TypeError { expected: "Fiber", got: "freed" }.into();
            };
            fiber.error.unwrap_or(Value::Null).into()
        }
        // `abort`/`throw` unwind the running fiber immediately with the
        // given value as its error slot, same as any other `RuntimeError` —
        // the VM's `propagate_error` unwraps `User` back to the value
        // unchanged before handing it to the nearest `try`.
        Primitive::FiberAbort | Primitive::FiberThrow => RuntimeError::User(ctx.arg(0)).into(),
        _ => unreachable!("dispatch_fiber received a non-Fiber primitive id; call/try/yield go through PrimitiveResult::RunFiber in the VM's call dispatch"),
    }
}

pub fn dispatch_system(id: Primitive, ctx: &mut PrimitiveContext<'_>) -> PrimitiveResult {
    match id {
        Primitive::SystemPrint => {
            let rendered = ctx.heap.print_value(ctx.arg(0));
            match ctx.print.as_deref_mut() {
                Some(print) => {
                    print(&rendered);
                    print("\n");
                }
                None => println!("{rendered}"),
            }
            ctx.arg(0).into()
        }
        Primitive::SystemWriteString => {
            let rendered = ctx.heap.print_value(ctx.arg(0));
            match ctx.print.as_deref_mut() {
                Some(print) => print(&rendered),
                None => print!("{rendered}"),
            }
            Value::Null.into()
        }
        Primitive::SystemClock => {
            let secs = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0);
            Value::Num(secs).into()
        }
        Primitive::SystemGc => {
            let roots = ctx.realm.roots();
            ctx.heap.collect(&roots);
            Value::Null.into()
        }
        Primitive::SystemBytesInUse => Value::Num(ctx.heap.bytes_in_use() as f64).into(),
        _ => unreachable!("dispatch_system received a non-System primitive id"),
    }
}

