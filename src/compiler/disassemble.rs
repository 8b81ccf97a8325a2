// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Cardinal Authors

//! Bytecode disassembler used by the REPL's `--disassemble` flag and by
//! tests that want to assert on emitted shapes without matching raw bytes.

use crate::bytecode::{Chunk, Op};
use crate::realm::Realm;

/// Renders every instruction in `chunk` as one line, resolving constant and
/// method-symbol operands to something readable.
#[must_use]
pub fn disassemble(chunk: &Chunk, name: &str, realm: &Realm) -> String {
    let mut out = format!("== {name} ==\n");
    let mut offset = 0usize;
    while offset < chunk.len() {
        offset = disassemble_instruction(chunk, offset, realm, &mut out);
    }
    out
}

#[allow(clippy::too_many_lines)]
fn disassemble_instruction(chunk: &Chunk, offset: usize, realm: &Realm, out: &mut String) -> usize {
    let line = chunk.line_at(offset);
    let byte = chunk.code[offset];
    let Some(op) = Op::from_u8(byte) else {
        out.push_str(&format!("{offset:04} {line:4} INVALID({byte})\n"));
        return offset + 1;
    };

    let mut next = offset + 1;
    let mut detail = String::new();

    match op {
        Op::Constant => {
            let idx = chunk.read_u16(next);
            next += 2;
            detail = format!("{idx} ; {:?}", chunk.constants.get(idx as usize));
        }
        Op::LoadLocal | Op::StoreLocal => {
            detail = format!("slot {}", chunk.code[next]);
            next += 1;
        }
        Op::LoadUpvalue | Op::StoreUpvalue | Op::CloseUpvalue => {
            detail = format!("upvalue {}", chunk.code[next]);
            next += 1;
        }
        Op::LoadModuleVar | Op::StoreModuleVar | Op::LoadModule => {
            let idx = chunk.read_u16(next);
            next += 2;
            detail = format!("const {idx}");
        }
        Op::ImportVariable => {
            let module_idx = chunk.read_u16(next);
            let var_idx = chunk.read_u16(next + 2);
            next += 4;
            detail = format!("module {module_idx}, var {var_idx}");
        }
        Op::LoadField | Op::StoreField | Op::LoadFieldThis | Op::StoreFieldThis => {
            let idx = chunk.read_u16(next);
            next += 2;
            detail = format!("field {idx}");
        }
        Op::Jump | Op::Loop | Op::JumpIf | Op::And | Op::Or => {
            let ofs = chunk.read_u16(next);
            next += 2;
            let target = if op == Op::Loop { offset + 3 - ofs as usize } else { offset + 3 + ofs as usize };
            detail = format!("-> {target}");
        }
        _ if op.call_arity().is_some() => {
            let symbol = chunk.read_u16(next);
            next += 2;
            let name = realm.methods.name_of(crate::value::Symbol(u32::from(symbol))).unwrap_or("?");
            detail = format!("'{name}'");
            if op as u8 >= Op::Super0 as u8 {
                detail.push_str(&format!(" super {}", chunk.code[next]));
                next += 1;
            }
        }
        Op::Class => {
            let fields = chunk.read_u16(next);
            let supers = chunk.code[next + 2];
            let name_idx = chunk.read_u16(next + 3);
            next += 5;
            detail = format!("fields={fields} supers={supers} name_const={name_idx}");
        }
        Op::MethodInstance | Op::MethodStatic => {
            let symbol = chunk.read_u16(next);
            next += 2;
            let name = realm.methods.name_of(crate::value::Symbol(u32::from(symbol))).unwrap_or("?");
            detail = format!("'{name}'");
        }
        Op::Closure => {
            let idx = chunk.read_u16(next);
            next += 2;
            // Upvalue descriptor `(isLocal, index)` pairs follow but their
            // count isn't recoverable from the chunk alone without decoding
            // the referenced `Fn`'s `upvalue_count`.
            detail = format!("const {idx}");
        }
        _ => {}
    }

    out.push_str(&format!("{offset:04} {line:4} {op:?} {detail}\n"));
    next
}
