// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Cardinal Authors

//! `String`, `List`, `Map`, and `Range` primitive method bodies.

use super::{Primitive, PrimitiveContext, PrimitiveResult};
use crate::error::RuntimeError;
use crate::value::object::{CardMap, MapEntry, Object, Range, Str};
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

pub fn dispatch_str(id: Primitive, ctx: &mut PrimitiveContext<'_>) -> PrimitiveResult {
    let receiver = match expect_str(ctx, ctx.receiver()) {
        Ok(s) => s.clone(),
        Err(e) => return e.into(),
    };

    match id {
        Primitive::StrPlus => {
            let rhs = match expect_str(ctx, ctx.arg(0)) {
                Ok(s) => s.clone(),
                Err(e) => return e.into(),
            };
            let mut bytes = receiver.bytes;
            bytes.extend_from_slice(&rhs.bytes);
            let handle = ctx.alloc(Object::Str(Str::new(bytes)));
            Value::Obj(handle).into()
        }
        Primitive::StrEqEq => match ctx.arg(0) {
            Value::Obj(h) => match ctx.heap.get(h) {
                Some(Object::Str(other)) => Value::Bool(other.bytes == receiver.bytes).into(),
                _ => Value::Bool(false).into(),
            },
            _ => Value::Bool(false).into(),
        },
        Primitive::StrCount => Value::Num(receiver.as_str().chars().count() as f64).into(),
        Primitive::StrSubscript => {
            let index = match ctx.arg(0).as_num() {
                Some(n) => n,
                None => return RuntimeError::TypeError { expected: "Num", got: ctx.arg(0).type_name() }.into(),
            };
            let chars: Vec<char> = receiver.as_str().chars().collect();
            let Some(idx) = index_in_bounds(index, chars.len()) else {
                return RuntimeError::IndexOutOfBounds { index, len: chars.len() }.into();
            };
            let handle = ctx.alloc(Object::Str(Str::new(chars[idx].to_string())));
            Value::Obj(handle).into()
        }
        Primitive::StrContains => {
            let needle = match expect_str(ctx, ctx.arg(0)) {
                Ok(s) => s.as_str().to_string(),
                Err(e) => return e.into(),
            };
            Value::Bool(receiver.as_str().contains(&needle)).into()
        }
        Primitive::StrIndexOf => {
            let needle = match expect_str(ctx, ctx.arg(0)) {
                Ok(s) => s.as_str().to_string(),
                Err(e) => return e.into(),
            };
            match receiver.as_str().find(&needle) {
                Some(byte_idx) => Value::Num(receiver.as_str()[..byte_idx].chars().count() as f64).into(),
                None => Value::Num(-1.0).into(),
            }
        }
        Primitive::StrToString => ctx.receiver().into(),
        _ => unreachable!("dispatch_str received a non-String primitive id"),
    }
}

/// Normalizes a script-visible (possibly negative) index against `len`,
/// returning `None` when it's out of bounds either direction.
fn index_in_bounds(index: f64, len: usize) -> Option<usize> {
    if index.fract() != 0.0 {
        return None;
    }
    let i = index as i64;
    let resolved = if i < 0 { i + len as i64 } else { i };
    if resolved < 0 || resolved as usize >= len {
        None
    } else {
        Some(resolved as usize)
    }
}

fn expect_list(ctx: &PrimitiveContext<'_>, v: Value) -> Result<(), RuntimeError> {
    match v {
        Value::Obj(h) => match ctx.heap.get(h) {
            Some(Object::List(_)) => Ok(()),
            Some(other) => Err(RuntimeError::TypeError { expected: "List", got: other.type_name() }),
            None => Err(RuntimeError::TypeError { expected: "List", got: "freed" }),
        },
        other => Err(RuntimeError::TypeError { expected: "List", got: other.type_name() }),
    }
}

pub fn dispatch_list(id: Primitive, ctx: &mut PrimitiveContext<'_>) -> PrimitiveResult {
    if id == Primitive::ListNew {
        let handle = ctx.alloc(Object::List(Vec::new()));
        return Value::Obj(handle).into();
    }

    let receiver = ctx.receiver();
    if let Err(e) = expect_list(ctx, receiver) {
        return e.into();
    }
    let Value::Obj(handle) = receiver else { unreachable!() };

    match id {
        Primitive::ListAdd => {
            let item = ctx.arg(0);
            let Some(Object::List(list)) = ctx.heap.get_mut(handle) else { unreachable!() };
            list.push(item);
            item.into()
        }
        Primitive::ListCount => {
            let Some(Object::List(list)) = ctx.heap.get(handle) else { unreachable!() };
            Value::Num(list.len() as f64).into()
        }
        Primitive::ListSubscript => {
            let index = match ctx.arg(0).as_num() {
                Some(n) => n,
                None => return RuntimeError::TypeError { expected: "Num", got: ctx.arg(0).type_name() }.into(),
            };
            let Some(Object::List(list)) = ctx.heap.get(handle) else { unreachable!() };
            match index_in_bounds(index, list.len()) {
                Some(i) => list[i].into(),
                None => RuntimeError::IndexOutOfBounds { index, len: list.len() }.into(),
            }
        }
        Primitive::ListSubscriptSet => {
            let index = match ctx.arg(0).as_num() {
                Some(n) => n,
                None => return RuntimeError::TypeError { expected: "Num", got: ctx.arg(0).type_name() }.into(),
            };
            let value = ctx.arg(1);
            let Some(Object::List(list)) = ctx.heap.get_mut(handle) else { unreachable!() };
            match index_in_bounds(index, list.len()) {
                Some(i) => {
                    list[i] = value;
                    value.into()
                }
                None => RuntimeError::IndexOutOfBounds { index, len: list.len() }.into(),
            }
        }
        Primitive::ListRemoveAt => {
            let index = match ctx.arg(0).as_num() {
                Some(n) => n,
                None => return RuntimeError::TypeError { expected: "Num", got: ctx.arg(0).type_name() }.into(),
            };
            let Some(Object::List(list)) = ctx.heap.get_mut(handle) else { unreachable!() };
            match index_in_bounds(index, list.len()) {
                Some(i) => list.remove(i).into(),
                None => RuntimeError::IndexOutOfBounds { index, len: list.len() }.into(),
            }
        }
        Primitive::ListClear => {
            let Some(Object::List(list)) = ctx.heap.get_mut(handle) else { unreachable!() };
            list.clear();
            Value::Null.into()
        }
        Primitive::ListIterate => {
            let Some(Object::List(list)) = ctx.heap.get(handle) else { unreachable!() };
            let next = match ctx.arg(0) {
                Value::Null => {
                    if list.is_empty() {
                        return Value::Bool(false).into();
                    }
                    0i64
                }
                v => match v.as_num() {
                    Some(n) => n as i64 + 1,
                    None => return RuntimeError::TypeError { expected: "Num", got: v.type_name() }.into(),
                },
            };
            if next < 0 || next as usize >= list.len() {
                Value::Bool(false).into()
            } else {
                Value::Num(next as f64).into()
            }
        }
        Primitive::ListIteratorValue => {
            let index = ctx.arg(0).as_num().unwrap_or(0.0) as usize;
            let Some(Object::List(list)) = ctx.heap.get(handle) else { unreachable!() };
            list.get(index).copied().map_or(Value::Null, |v| v).into()
        }
        _ => unreachable!("dispatch_list received a non-List primitive id"),
    }
}

fn map_find(
    ctx: &PrimitiveContext<'_>,
    handle: crate::value::Handle,
    key: Value,
) -> Option<usize> {
    let Some(Object::Map(map)) = ctx.heap.get(handle) else { return None };
    map.entries.iter().position(|e| e.as_ref().is_some_and(|e| ctx.heap.values_equal(e.key, key)))
}

pub fn dispatch_map(id: Primitive, ctx: &mut PrimitiveContext<'_>) -> PrimitiveResult {
    if id == Primitive::MapNew {
        let handle = ctx.alloc(Object::Map(CardMap::default()));
        return Value::Obj(handle).into();
    }

    let Value::Obj(handle) = ctx.receiver() else {
        return RuntimeError::TypeError { expected: "Map", got: ctx.receiver().type_name() }.into();
    };

    match id {
        Primitive::MapCount => {
            let Some(Object::Map(map)) = ctx.heap.get(handle) else {
                return RuntimeError::TypeError { expected: "Map", got: "freed" }.into();
            };
            Value::Num(map.count as f64).into()
        }
        Primitive::MapSubscript => {
            let key = ctx.arg(0);
            match map_find(ctx, handle, key) {
                Some(i) => {
                    let Some(Object::Map(map)) = ctx.heap.get(handle) else { unreachable!() };
                    map.entries[i].as_ref().unwrap().value.into()
                }
                None => Value::Null.into(),
            }
        }
        Primitive::MapSubscriptSet => {
            let key = ctx.arg(0);
            let value = ctx.arg(1);
            let found = map_find(ctx, handle, key);
            let Some(Object::Map(map)) = ctx.heap.get_mut(handle) else {
                return RuntimeError::TypeError { expected: "Map", got: "freed" }.into();
            };
            if let Some(i) = found {
                map.entries[i].as_mut().unwrap().value = value;
            } else {
                map.entries.push(Some(MapEntry { key, value }));
                map.count += 1;
            }
            value.into()
        }
        Primitive::MapContainsKey => {
            let key = ctx.arg(0);
            Value::Bool(map_find(ctx, handle, key).is_some()).into()
        }
        Primitive::MapRemove => {
            let key = ctx.arg(0);
            match map_find(ctx, handle, key) {
                Some(i) => {
                    let Some(Object::Map(map)) = ctx.heap.get_mut(handle) else { unreachable!() };
                    let removed = map.entries[i].take().unwrap();
                    map.count -= 1;
                    map.tombstones += 1;
                    removed.value.into()
                }
                None => Value::Null.into(),
            }
        }
        Primitive::MapIterate => {
            let Some(Object::Map(map)) = ctx.heap.get(handle) else {
                return RuntimeError::TypeError { expected: "Map", got: "freed" }.into();
            };
            let start = match ctx.arg(0) {
                Value::Null => 0,
                v => match v.as_num() {
                    Some(n) => n as usize + 1,
                    None => return RuntimeError::TypeError { expected: "Num", got: v.type_name() }.into(),
                },
            };
            match map.entries.iter().skip(start).position(Option::is_some) {
                Some(rel) => Value::Num((start + rel) as f64).into(),
                None => Value::Bool(false).into(),
            }
        }
        Primitive::MapIteratorValue => {
            let index = ctx.arg(0).as_num().unwrap_or(0.0) as usize;
            let Some(Object::Map(map)) = ctx.heap.get(handle) else {
                return RuntimeError::TypeError { expected: "Map", got: "freed" }.into();
            };
            match map.entries.get(index).and_then(Option::as_ref) {
                Some(entry) => {
                    let handle = ctx.alloc(Object::List(vec![entry.key, entry.value]));
                    Value::Obj(handle).into()
                }
                None => Value::Null.into(),
            }
        }
        _ => unreachable!("dispatch_map received a non-Map primitive id"),
    }
}

fn expect_range(ctx: &PrimitiveContext<'_>, v: Value) -> Result<Range, RuntimeError> {
    match v {
        Value::Obj(h) => match ctx.heap.get(h) {
            Some(Object::Range(r)) => Ok(*r),
            Some(other) => Err(RuntimeError::TypeError { expected: "Range", got: other.type_name() }),
            None => Err(RuntimeError::TypeError { expected: "Range", got: "freed" }),
        },
        other => Err(RuntimeError::TypeError { expected: "Range", got: other.type_name() }),
    }
}

pub fn dispatch_range(id: Primitive, ctx: &mut PrimitiveContext<'_>) -> PrimitiveResult {
    let range = match expect_range(ctx, ctx.receiver()) {
        Ok(r) => r,
        Err(e) => return e.into(),
    };

    match id {
        Primitive::RangeFrom => Value::Num(range.from).into(),
        Primitive::RangeTo => Value::Num(range.to).into(),
        Primitive::RangeIsInclusive => Value::Bool(range.inclusive).into(),
        Primitive::RangeIterate => {
            let step = if range.to >= range.from { 1.0 } else { -1.0 };
            let next = match ctx.arg(0) {
                Value::Null => range.from,
                v => match v.as_num() {
                    Some(n) => n + step,
                    None => return RuntimeError::TypeError { expected: "Num", got: v.type_name() }.into(),
                },
            };
            let past_end =
                if range.inclusive { (next - range.to) * step > 0.0 } else { (next - range.to) * step >= 0.0 };
            if past_end {
                Value::Bool(false).into()
            } else {
                Value::Num(next).into()
            }
        }
        Primitive::RangeIteratorValue => ctx.arg(0).into(),
        _ => unreachable!("dispatch_range received a non-Range primitive id"),
    }
}
