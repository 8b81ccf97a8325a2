// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Cardinal Authors

//! `Num` and `Bool` primitive method bodies.

use super::{Primitive, PrimitiveContext, PrimitiveResult};
use crate::error::RuntimeError;
use crate::value::object::{Object, Range, Str};
use crate::value::Value;

fn num(v: Value) -> Result<f64, RuntimeError> {
    v.as_num().ok_or(RuntimeError::TypeError { expected: "Num", got: v.type_name() })
}

pub fn dispatch_num(id: Primitive, ctx: &mut PrimitiveContext<'_>) -> PrimitiveResult {
    let receiver = match num(ctx.receiver()) {
        Ok(n) => n,
        Err(e) => return e.into(),
    };

    macro_rules! rhs {
        () => {
            match num(ctx.arg(0)) {
                Ok(n) => n,
                Err(e) => return e.into(),
            }
        };
    }

    match id {
        Primitive::NumPlus => Value::Num(receiver + rhs!()).into(),
        Primitive::NumMinus => Value::Num(receiver - rhs!()).into(),
        Primitive::NumStar => Value::Num(receiver * rhs!()).into(),
        Primitive::NumSlash => {
            let rhs = rhs!();
            if rhs == 0.0 {
                return RuntimeError::DivisionByZero.into();
            }
            Value::Num(receiver / rhs).into()
        }
        Primitive::NumPercent => Value::Num(receiver % rhs!()).into(),
        Primitive::NumLt => Value::Bool(receiver < rhs!()).into(),
        Primitive::NumGt => Value::Bool(receiver > rhs!()).into(),
        Primitive::NumLtEq => Value::Bool(receiver <= rhs!()).into(),
        Primitive::NumGtEq => Value::Bool(receiver >= rhs!()).into(),
        Primitive::NumEqEq => Value::Bool(ctx.arg(0).as_num() == Some(receiver)).into(),
        Primitive::NumBangEq => Value::Bool(ctx.arg(0).as_num() != Some(receiver)).into(),
        Primitive::NumUnaryMinus => Value::Num(-receiver).into(),
        Primitive::NumBitAnd => Value::Num(bitwise(receiver, rhs!(), |a, b| a & b)).into(),
        Primitive::NumBitOr => Value::Num(bitwise(receiver, rhs!(), |a, b| a | b)).into(),
        Primitive::NumBitXor => Value::Num(bitwise(receiver, rhs!(), |a, b| a ^ b)).into(),
        Primitive::NumShl => Value::Num(bitwise(receiver, rhs!(), u32::wrapping_shl)).into(),
        Primitive::NumShr => Value::Num(bitwise(receiver, rhs!(), u32::wrapping_shr)).into(),
        Primitive::NumRangeExclusive => {
            let to = rhs!();
            let handle = ctx.alloc(Object::Range(Range { from: receiver, to, inclusive: false }));
            Value::Obj(handle).into()
        }
        Primitive::NumRangeInclusive => {
            let to = rhs!();
            let handle = ctx.alloc(Object::Range(Range { from: receiver, to, inclusive: true }));
            Value::Obj(handle).into()
        }
        Primitive::NumToString => {
            let handle = ctx.alloc(Object::Str(Str::new(format_num(receiver))));
            Value::Obj(handle).into()
        }
        Primitive::NumAbs => Value::Num(receiver.abs()).into(),
        _ => unreachable!("dispatch_num received a non-Num primitive id"),
    }
}

/// Renders the way the ancestor's number formatting does: integral values
/// print without a trailing `.0`.
#[must_use]
pub fn format_num(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{n:.0}")
    } else {
        format!("{n}")
    }
}

/// Bitwise operators truncate through `u32`, matching the ancestor's 32-bit
/// integer-bitwise-op convention for a double-backed number type.
fn bitwise(a: f64, b: f64, op: impl Fn(u32, u32) -> u32) -> f64 {
    f64::from(op(a as u32, b as u32))
}

pub fn dispatch_bool(id: Primitive, ctx: &mut PrimitiveContext<'_>) -> PrimitiveResult {
    let receiver = ctx.receiver().as_bool().unwrap_or(false);
    match id {
        Primitive::BoolNot => Value::Bool(!receiver).into(),
        Primitive::BoolEqEq => Value::Bool(ctx.arg(0).as_bool() == Some(receiver)).into(),
        Primitive::BoolBangEq => Value::Bool(ctx.arg(0).as_bool() != Some(receiver)).into(),
        Primitive::BoolToString => {
            let handle = ctx.alloc(Object::Str(Str::new(if receiver { "true" } else { "false" })));
            Value::Obj(handle).into()
        }
        _ => unreachable!("dispatch_bool received a non-Bool primitive id"),
    }
}
