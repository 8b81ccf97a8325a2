// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Cardinal Authors

//! The `#CARDINALBC` bytecode blob: `compile_to_bytecode` serializes a
//! compiled [`FnObj`] and its constant pool; `compile_from_bytecode`
//! rebuilds it against a target module. Only the constant kinds the
//! compiler ever actually emits round-trip — `Num`, `Str`, and nested `Fn`
//! (a closure literal's function object) — so this stays a single-chunk
//! blob with no cross-module linking, matching the embedding surface's
//! "optionally load or emit a bytecode blob" rather than a general
//! persistence format.

use super::Chunk;
use crate::error::RuntimeError;
use crate::heap::Heap;
use crate::value::object::{FnObj, Object, Str};
use crate::value::{Handle, Value};

const MAGIC: &[u8; 11] = b"#CARDINALBC";
const FORMAT_VERSION: u32 = 1;

const TAG_NULL: u8 = 0;
const TAG_NUM: u8 = 1;
const TAG_STR: u8 = 2;
const TAG_FN: u8 = 3;

/// Serialize `fn_handle` (and every `Fn`/`Str` constant it transitively
/// references) into a `#CARDINALBC` blob. `fn_handle` must resolve to an
/// [`Object::Fn`]; anything else is a programmer error, not a runtime one,
/// since it can only be reached by passing a handle `Vm::compile` never
/// produced.
#[must_use]
pub fn compile_to_bytecode(heap: &Heap, fn_handle: Handle) -> Vec<u8> {
    let Some(Object::Fn(f)) = heap.get(fn_handle) else {
        panic!("compile_to_bytecode called on a non-Fn handle");
    };
    let mut payload = Vec::new();
    write_fn(heap, f, &mut payload);

    let mut out = Vec::with_capacity(MAGIC.len() + 4 + 8 + payload.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
    out.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    out.extend_from_slice(&payload);
    out
}

/// Rebuild a `Fn` object from a `#CARDINALBC` blob previously produced by
/// [`compile_to_bytecode`], binding it to `module`. `module`'s own contents
/// are untouched — same contract as [`crate::vm::Vm::compile`], which binds
/// a freshly compiled `Fn` to a module without running its body.
pub fn compile_from_bytecode(bytes: &[u8], module: Handle, heap: &mut Heap) -> Result<Handle, RuntimeError> {
    let mut r = Reader { bytes, pos: 0 };
    if r.take(MAGIC.len())? != MAGIC.as_slice() {
        return Err(RuntimeError::InvalidBytecode { reason: "bad magic" });
    }
    let version = r.u32()?;
    if version != FORMAT_VERSION {
        return Err(RuntimeError::InvalidBytecode { reason: "unsupported format version" });
    }
    let payload_len = r.u64()? as usize;
    let payload = r.take(payload_len)?;
    let mut pr = Reader { bytes: payload, pos: 0 };
    read_fn(&mut pr, module, heap)
}

fn write_fn(heap: &Heap, f: &FnObj, out: &mut Vec<u8>) {
    out.push(f.arity);
    out.push(f.upvalue_count);
    write_string(&f.name, out);
    write_string(&f.source_path, out);
    write_chunk(heap, &f.chunk, out);
}

fn write_chunk(heap: &Heap, chunk: &Chunk, out: &mut Vec<u8>) {
    write_bytes(&chunk.code, out);
    out.extend_from_slice(&(chunk.lines.len() as u32).to_be_bytes());
    for &line in &chunk.lines {
        out.extend_from_slice(&line.to_be_bytes());
    }
    out.extend_from_slice(&(chunk.constants.len() as u32).to_be_bytes());
    for &value in &chunk.constants {
        write_constant(heap, value, out);
    }
}

fn write_constant(heap: &Heap, value: Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Num(n) => {
            out.push(TAG_NUM);
            out.extend_from_slice(&n.to_be_bytes());
        }
        Value::Obj(h) => match heap.get(h) {
            Some(Object::Str(s)) => {
                out.push(TAG_STR);
                write_bytes(&s.bytes, out);
            }
            Some(Object::Fn(f)) => {
                out.push(TAG_FN);
                write_fn(heap, f, out);
            }
            _ => panic!("bytecode constant pool held an unsupported heap object"),
        },
        _ => panic!("bytecode constant pool held an unsupported value kind"),
    }
}

fn write_string(s: &str, out: &mut Vec<u8>) {
    write_bytes(s.as_bytes(), out);
}

fn write_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], RuntimeError> {
        let end = self.pos.checked_add(n).ok_or(RuntimeError::InvalidBytecode { reason: "truncated blob" })?;
        let slice = self.bytes.get(self.pos..end).ok_or(RuntimeError::InvalidBytecode { reason: "truncated blob" })?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, RuntimeError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, RuntimeError> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, RuntimeError> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn f64(&mut self) -> Result<f64, RuntimeError> {
        Ok(f64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn bytes_field(&mut self) -> Result<Vec<u8>, RuntimeError> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn string_field(&mut self) -> Result<String, RuntimeError> {
        let bytes = self.bytes_field()?;
        String::from_utf8(bytes).map_err(|_| RuntimeError::InvalidBytecode { reason: "invalid utf-8 string" })
    }
}

fn read_fn(r: &mut Reader<'_>, module: Handle, heap: &mut Heap) -> Result<Handle, RuntimeError> {
    let arity = r.u8()?;
    let upvalue_count = r.u8()?;
    let name = r.string_field()?;
    let source_path = r.string_field()?;
    let chunk = read_chunk(r, module, heap)?;
    let fn_obj = FnObj { chunk, arity, upvalue_count, module, name, source_path };
    Ok(heap.alloc(Object::Fn(fn_obj), &[module]))
}

fn read_chunk(r: &mut Reader<'_>, module: Handle, heap: &mut Heap) -> Result<Chunk, RuntimeError> {
    let code = r.bytes_field()?;
    let line_count = r.u32()? as usize;
    let mut lines = Vec::with_capacity(line_count);
    for _ in 0..line_count {
        lines.push(r.u32()?);
    }
    let constant_count = r.u32()? as usize;
    let mut constants = Vec::with_capacity(constant_count);
    for _ in 0..constant_count {
        constants.push(read_constant(r, module, heap)?);
    }
    Ok(Chunk { code, constants, lines })
}

fn read_constant(r: &mut Reader<'_>, module: Handle, heap: &mut Heap) -> Result<Value, RuntimeError> {
    match r.u8()? {
        TAG_NULL => Ok(Value::Null),
        TAG_NUM => Ok(Value::Num(r.f64()?)),
        TAG_STR => {
            let bytes = r.bytes_field()?;
            let handle = heap.alloc(Object::Str(Str::new(bytes)), &[module]);
            Ok(Value::Obj(handle))
        }
        TAG_FN => Ok(Value::Obj(read_fn(r, module, heap)?)),
        _ => Err(RuntimeError::InvalidBytecode { reason: "unknown constant tag" }),
    }
}
