// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Cardinal Authors

//! Registers the core classes (`Object`, `Num`, `Bool`, `Null`, `String`,
//! `List`, `Map`, `Range`, `Fn`, `Fiber`, `Class`, `System`) and binds each
//! of their methods to a [`crate::intrinsics::Primitive`] id. Every value the
//! VM ever dispatches a method call against resolves to one of these class
//! handles through [`CoreClasses::class_of`].

use crate::heap::Heap;
use crate::intrinsics::Primitive;
use crate::realm::Realm;
use crate::value::object::{Class, MethodImpl, Object};
use crate::value::{Handle, Value};

/// Handles to every bootstrapped core class, resolved once at `Vm::new` and
/// consulted on every method dispatch.
#[derive(Debug, Clone, Copy)]
pub struct CoreClasses {
    pub object: Handle,
    pub num: Handle,
    pub bool_: Handle,
    pub null: Handle,
    pub string: Handle,
    pub list: Handle,
    pub map: Handle,
    pub range: Handle,
    pub fn_: Handle,
    pub method: Handle,
    pub fiber: Handle,
    pub class: Handle,
    pub system: Handle,
}

impl CoreClasses {
    /// The class a value dispatches methods against. `None` only for the
    /// internal-only `Ptr`/`Undefined` variants, which script code never
    /// observes as a method receiver.
    #[must_use]
    pub fn class_of(&self, heap: &Heap, value: Value) -> Option<Handle> {
        match value {
            Value::Null => Some(self.null),
            Value::Bool(_) => Some(self.bool_),
            Value::Num(_) => Some(self.num),
            Value::Ptr(_) | Value::Undefined => None,
            Value::Obj(h) => match heap.get(h)? {
                Object::Str(_) => Some(self.string),
                Object::List(_) => Some(self.list),
                Object::Map(_) => Some(self.map),
                Object::Range(_) => Some(self.range),
                Object::Fn(_) | Object::Closure(_) => Some(self.fn_),
                Object::Fiber(_) => Some(self.fiber),
                // A bare class value dispatches against its metaclass (static
                // methods); a class with no metaclass yet (still being
                // compiled) falls back to `Class` itself.
                Object::Class(c) => Some(c.metaclass.unwrap_or(self.class)),
                Object::Instance(inst) => Some(inst.class),
                Object::Method(_) => Some(self.method),
                Object::Upvalue(_) | Object::Module(_) => Some(self.object),
            },
        }
    }
}

struct ClassBuilder {
    name: String,
    supers: Vec<Handle>,
    instance_methods: Vec<(&'static str, Primitive)>,
    static_methods: Vec<(&'static str, Primitive)>,
}

impl ClassBuilder {
    fn new(name: &str, supers: Vec<Handle>) -> Self {
        Self { name: name.to_string(), supers, instance_methods: Vec::new(), static_methods: Vec::new() }
    }

    fn method(mut self, signature: &'static str, id: Primitive) -> Self {
        self.instance_methods.push((signature, id));
        self
    }

    fn static_method(mut self, signature: &'static str, id: Primitive) -> Self {
        self.static_methods.push((signature, id));
        self
    }

    fn build(self, heap: &mut Heap, realm: &mut Realm) -> Handle {
        let mut class = Class {
            name: self.name.clone(),
            field_count: 0,
            supers: self.supers,
            inherited_field_offset: 0,
            methods: Vec::new(),
            metaclass: None,
            is_foreign: false,
            foreign_destructor: None,
        };
        for (sig, id) in &self.instance_methods {
            let sym = realm.methods.intern(sig);
            class.set_method(sym, MethodImpl::Primitive(id.to_u16()));
        }
        let class_handle = heap.alloc(Object::Class(class), &[]);

        if !self.static_methods.is_empty() {
            let mut metaclass = Class {
                name: format!("{} metaclass", self.name),
                field_count: 0,
                supers: Vec::new(),
                inherited_field_offset: 0,
                methods: Vec::new(),
                metaclass: None,
                is_foreign: false,
                foreign_destructor: None,
            };
            for (sig, id) in &self.static_methods {
                let sym = realm.methods.intern(sig);
                metaclass.set_method(sym, MethodImpl::Primitive(id.to_u16()));
            }
            let metaclass_handle = heap.alloc(Object::Class(metaclass), &[class_handle]);
            if let Some(Object::Class(c)) = heap.get_mut(class_handle) {
                c.metaclass = Some(metaclass_handle);
            }
        }

        class_handle
    }
}

/// Build and intern every core class, returning the handle table the VM
/// keeps for the lifetime of the process.
pub fn install(heap: &mut Heap, realm: &mut Realm) -> CoreClasses {
    use Primitive as P;

    let object = ClassBuilder::new("Object", vec![])
        .method("==(_)", P::ObjectEqEq)
        .method("!=(_)", P::ObjectBangEq)
        .method("is(_)", P::ObjectIs)
        .method("same(_)", P::ObjectSame)
        .method("toString", P::ObjectToString)
        .build(heap, realm);

    let num = ClassBuilder::new("Num", vec![object])
        .method("+(_)", P::NumPlus)
        .method("-(_)", P::NumMinus)
        .method("-", P::NumUnaryMinus)
        .method("*(_)", P::NumStar)
        .method("/(_)", P::NumSlash)
        .method("%(_)", P::NumPercent)
        .method("<(_)", P::NumLt)
        .method(">(_)", P::NumGt)
        .method("<=(_)", P::NumLtEq)
        .method(">=(_)", P::NumGtEq)
        .method("==(_)", P::NumEqEq)
        .method("!=(_)", P::NumBangEq)
        .method("&(_)", P::NumBitAnd)
        .method("|(_)", P::NumBitOr)
        .method("^(_)", P::NumBitXor)
        .method("<<(_)", P::NumShl)
        .method(">>(_)", P::NumShr)
        .method("..(_)", P::NumRangeExclusive)
        .method("...(_)", P::NumRangeInclusive)
        .method("toString", P::NumToString)
        .method("abs", P::NumAbs)
        .build(heap, realm);

    let bool_ = ClassBuilder::new("Bool", vec![object])
        .method("!", P::BoolNot)
        .method("==(_)", P::BoolEqEq)
        .method("!=(_)", P::BoolBangEq)
        .method("toString", P::BoolToString)
        .build(heap, realm);

    let null = ClassBuilder::new("Null", vec![object]).method("toString", P::ObjectToString).build(heap, realm);

    let string = ClassBuilder::new("String", vec![object])
        .method("+(_)", P::StrPlus)
        .method("==(_)", P::StrEqEq)
        .method("count", P::StrCount)
        .method("[_]", P::StrSubscript)
        .method("contains(_)", P::StrContains)
        .method("indexOf(_)", P::StrIndexOf)
        .method("toString", P::StrToString)
        .build(heap, realm);

    let list = ClassBuilder::new("List", vec![object])
        .method("add(_)", P::ListAdd)
        .method("count", P::ListCount)
        .method("[_]", P::ListSubscript)
        .method("[_]=(_)", P::ListSubscriptSet)
        .method("removeAt(_)", P::ListRemoveAt)
        .method("clear", P::ListClear)
        .method("iterate(_)", P::ListIterate)
        .method("iteratorValue(_)", P::ListIteratorValue)
        .static_method("new", P::ListNew)
        .build(heap, realm);

    let map = ClassBuilder::new("Map", vec![object])
        .method("[_]", P::MapSubscript)
        .method("[_]=(_)", P::MapSubscriptSet)
        .method("containsKey(_)", P::MapContainsKey)
        .method("count", P::MapCount)
        .method("remove(_)", P::MapRemove)
        .method("iterate(_)", P::MapIterate)
        .method("iteratorValue(_)", P::MapIteratorValue)
        .static_method("new", P::MapNew)
        .build(heap, realm);

    let range = ClassBuilder::new("Range", vec![object])
        .method("from", P::RangeFrom)
        .method("to", P::RangeTo)
        .method("isInclusive", P::RangeIsInclusive)
        .method("iterate(_)", P::RangeIterate)
        .method("iteratorValue(_)", P::RangeIteratorValue)
        .build(heap, realm);

    // `Fn.new(block)` is bound like any other static method (it's just an
    // identity check on the block literal's already-constructed `Closure`);
    // `.call`/`.call(_)`/... on the closure itself is not, since a closure
    // invocation has no method table to dispatch through at all.
    let fn_ = ClassBuilder::new("Fn", vec![object]).static_method("new(_)", P::FnNew).build(heap, realm);

    // `.call`/`.call(_)`/... on a `Method` receiver is intercepted the same
    // way as on a bare closure (`Vm::try_dispatch_method_call`), since it
    // redispatches to whatever class the bound receiver actually has rather
    // than resolving against `Method`'s own table.
    let method = ClassBuilder::new("Method", vec![object])
        .method("toString", P::MethodToString)
        .method("arity", P::MethodArity)
        .static_method("new", P::MethodNew)
        .static_method("new(_)", P::MethodNew1)
        .static_method("new(_,_)", P::MethodNew2)
        .build(heap, realm);

    // `call`/`run`/`try`/`yield` are not primitives: the VM's call dispatch
    // recognizes these signatures on a `Fiber` receiver directly and answers
    // with `PrimitiveResult::RunFiber` equivalents before ever consulting the
    // method table, since only the VM owns fiber scheduling.

    let fiber = ClassBuilder::new("Fiber", vec![object])
        .method("isDone", P::FiberIsDone)
        .method("error", P::FiberError)
        .static_method("new(_)", P::FiberNew)
        .static_method("current", P::FiberCurrent)
        .static_method("abort(_)", P::FiberAbort)
        .static_method("throw(_)", P::FiberThrow)
        .build(heap, realm);

    let class = ClassBuilder::new("Class", vec![object])
        .method("name", P::ClassName)
        .method("supertype", P::ClassSuperclass)
        .method("toString", P::ClassToString)
        .build(heap, realm);

    let system = ClassBuilder::new("System", vec![object])
        .static_method("print(_)", P::SystemPrint)
        .static_method("writeString(_)", P::SystemWriteString)
        .static_method("clock", P::SystemClock)
        .static_method("gc", P::SystemGc)
        .static_method("bytesInUse", P::SystemBytesInUse)
        .build(heap, realm);

    CoreClasses { object, num, bool_, null, string, list, map, range, fn_, method, fiber, class, system }
}

/// Bind every core class name into a freshly created module's variable
/// table, so `named_variable("List", ...)` etc. resolve without requiring an
/// explicit import.
pub fn inject_core_globals(module: &mut crate::value::object::Module, core: &CoreClasses) {
    for (name, handle) in [
        ("Object", core.object),
        ("Num", core.num),
        ("Bool", core.bool_),
        ("Null", core.null),
        ("String", core.string),
        ("List", core.list),
        ("Map", core.map),
        ("Range", core.range),
        ("Fn", core.fn_),
        ("Method", core.method),
        ("Fiber", core.fiber),
        ("Class", core.class),
        ("System", core.system),
    ] {
        module.define_var(name, Value::Obj(handle));
    }
}
