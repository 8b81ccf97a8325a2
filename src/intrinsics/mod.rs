// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Cardinal Authors

//! Primitive (host-implemented) method bodies for the core classes.
//!
//! The compiler never emits arithmetic or comparison opcodes: `a + b` becomes
//! a `CALL_1` against the interned `"+(_)"` signature, exactly like a
//! user-defined operator overload would. `Class::set_method` binds each core
//! method to `MethodImpl::Primitive(id)` at bootstrap time
//! ([`crate::realm::bootstrap`]); the VM's call dispatch resolves a
//! `Primitive` the same way it resolves a `Block`, just without pushing a
//! bytecode call frame.

mod collections;
mod numeric;
mod reflection;
#[cfg(test)]
mod intrinsics_test;

use crate::error::RuntimeError;
use crate::heap::Heap;
use crate::realm::Realm;
use crate::value::{Handle, Value};

/// Dense id naming a primitive method body. Grouped by owning class purely
/// for readability; the VM only ever sees the numeric id stored on
/// [`crate::value::object::MethodImpl::Primitive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Primitive {
    NumPlus,
    NumMinus,
    NumStar,
    NumSlash,
    NumPercent,
    NumLt,
    NumGt,
    NumLtEq,
    NumGtEq,
    NumEqEq,
    NumBangEq,
    NumUnaryMinus,
    NumBitAnd,
    NumBitOr,
    NumBitXor,
    NumShl,
    NumShr,
    NumRangeExclusive,
    NumRangeInclusive,
    NumToString,
    NumAbs,

    BoolNot,
    BoolEqEq,
    BoolBangEq,
    BoolToString,

    StrPlus,
    StrEqEq,
    StrCount,
    StrSubscript,
    StrContains,
    StrIndexOf,
    StrToString,

    ListAdd,
    ListSubscript,
    ListSubscriptSet,
    ListCount,
    ListIterate,
    ListIteratorValue,
    ListRemoveAt,
    ListClear,
    ListNew,

    MapSubscript,
    MapSubscriptSet,
    MapContainsKey,
    MapCount,
    MapIterate,
    MapIteratorValue,
    MapNew,
    MapRemove,

    RangeFrom,
    RangeTo,
    RangeIsInclusive,
    RangeIterate,
    RangeIteratorValue,

    ObjectEqEq,
    ObjectBangEq,
    ObjectToString,
    ObjectIs,
    ObjectSame,

    ClassName,
    ClassSuperclass,
    ClassToString,

    FnNew,

    MethodNew,
    MethodNew1,
    MethodNew2,
    MethodToString,
    MethodArity,

    FiberNew,
    FiberCurrent,
    FiberIsDone,
    FiberError,
    FiberAbort,
    FiberThrow,

    SystemPrint,
    SystemWriteString,
    SystemClock,
    SystemGc,
    SystemBytesInUse,
}

impl Primitive {
    const LAST: Self = Self::SystemBytesInUse;

    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    #[must_use]
    pub const fn from_u16(id: u16) -> Option<Self> {
        if id <= Self::LAST as u16 {
            // SAFETY: every discriminant from 0..=LAST is a valid Primitive.
            Some(unsafe { core::mem::transmute::<u16, Self>(id) })
        } else {
            None
        }
    }
}

/// The arguments a primitive call sees: `args[0]` is always the receiver,
/// `args[1..]` the call's actual arguments — the same layout a bytecode call
/// frame's locals have.
pub struct PrimitiveContext<'a> {
    pub heap: &'a mut Heap,
    pub realm: &'a mut Realm,
    pub args: &'a [Value],
    /// The fiber executing the call, for primitives that need to create or
    /// inspect fiber state (`Fiber.current`, `Fiber.isDone`, ...). Also
    /// serves as the GC root while a primitive allocates: the fiber's own
    /// stack still holds every argument, so rooting the fiber is enough to
    /// keep them alive through a collection triggered mid-primitive.
    pub current_fiber: Handle,
    /// The embedder's configured output sink, for `System.print`/
    /// `writeString`. `None` in contexts with no `Configuration` around (unit
    /// tests exercising a primitive directly).
    pub print: Option<&'a mut dyn FnMut(&str)>,
}

impl<'a> PrimitiveContext<'a> {
    #[must_use]
    pub fn receiver(&self) -> Value {
        self.args[0]
    }

    #[must_use]
    pub fn arg(&self, index: usize) -> Value {
        self.args[index + 1]
    }

    pub fn alloc(&mut self, object: crate::value::object::Object) -> Handle {
        let roots = [self.current_fiber];
        self.heap.alloc(object, &roots)
    }
}

/// What running a primitive produced. Most primitives resolve to a `Value`
/// or a `RuntimeError` directly; `RunFiber` asks the VM to switch the running
/// fiber instead of returning a value immediately (fiber scheduling is a VM
/// concern, not something a primitive can do by itself since it doesn't own
/// the fiber table).
pub enum PrimitiveResult {
    Value(Value),
    Error(RuntimeError),
    RunFiber { target: Handle, transfer_value: Value, mode: FiberMode },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberMode {
    Call,
    /// Like `Call`, but tail-transfers the running fiber's own caller chain
    /// onto the callee instead of pointing the callee back at it.
    Run,
    Try,
    Yield,
    Transfer,
}

impl From<Value> for PrimitiveResult {
    fn from(v: Value) -> Self {
        PrimitiveResult::Value(v)
    }
}

impl From<RuntimeError> for PrimitiveResult {
    fn from(e: RuntimeError) -> Self {
        PrimitiveResult::Error(e)
    }
}

/// Run the primitive named by `id` against `ctx`.
#[must_use]
pub fn dispatch(id: Primitive, ctx: &mut PrimitiveContext<'_>) -> PrimitiveResult {
    use Primitive as P;
    match id {
        P::NumPlus
        | P::NumMinus
        | P::NumStar
        | P::NumSlash
        | P::NumPercent
        | P::NumLt
        | P::NumGt
        | P::NumLtEq
        | P::NumGtEq
        | P::NumEqEq
        | P::NumBangEq
        | P::NumUnaryMinus
        | P::NumBitAnd
        | P::NumBitOr
        | P::NumBitXor
        | P::NumShl
        | P::NumShr
        | P::NumRangeExclusive
        | P::NumRangeInclusive
        | P::NumToString
        | P::NumAbs => numeric::dispatch_num(id, ctx),

        P::BoolNot | P::BoolEqEq | P::BoolBangEq | P::BoolToString => numeric::dispatch_bool(id, ctx),

        P::StrPlus
        | P::StrEqEq
        | P::StrCount
        | P::StrSubscript
        | P::StrContains
        | P::StrIndexOf
        | P::StrToString => collections::dispatch_str(id, ctx),

        P::ListAdd
        | P::ListSubscript
        | P::ListSubscriptSet
        | P::ListCount
        | P::ListIterate
        | P::ListIteratorValue
        | P::ListRemoveAt
        | P::ListClear
        | P::ListNew => collections::dispatch_list(id, ctx),

        P::MapSubscript
        | P::MapSubscriptSet
        | P::MapContainsKey
        | P::MapCount
        | P::MapIterate
        | P::MapIteratorValue
        | P::MapNew
        | P::MapRemove => collections::dispatch_map(id, ctx),

        P::RangeFrom | P::RangeTo | P::RangeIsInclusive | P::RangeIterate | P::RangeIteratorValue => {
            collections::dispatch_range(id, ctx)
        }

        P::ObjectEqEq | P::ObjectBangEq | P::ObjectToString | P::ObjectIs | P::ObjectSame => {
            reflection::dispatch_object(id, ctx)
        }

        P::ClassName | P::ClassSuperclass | P::ClassToString => reflection::dispatch_class(id, ctx),

        P::FnNew => reflection::dispatch_fn(id, ctx),

        P::MethodNew | P::MethodNew1 | P::MethodNew2 | P::MethodToString | P::MethodArity => {
            reflection::dispatch_method(id, ctx)
        }

        P::FiberNew | P::FiberCurrent | P::FiberIsDone | P::FiberError | P::FiberAbort | P::FiberThrow => {
            reflection::dispatch_fiber(id, ctx)
        }

        P::SystemPrint | P::SystemWriteString | P::SystemClock | P::SystemGc | P::SystemBytesInUse => {
            reflection::dispatch_system(id, ctx)
        }
    }
}
