// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Cardinal Authors

//! Per-VM state threaded explicitly through every internal entry point: the
//! module table, the globally interned method-name table, and the
//! embedder-facing handle table. Keeping this as an explicit `Realm` struct
//! (rather than process-global statics) is what makes multiple independent
//! `Vm` instances in one process safe.

#[cfg(test)]
mod realm_test;

use crate::value::object::SymbolTable;
use crate::value::{Handle, Symbol, Value};
use std::collections::HashMap;

/// Interns method-signature strings (`"name(_,_)"`-shaped, see the method
/// signature grammar) into dense `Symbol`s so `CALL_n`/`SUPER_n` opcodes
/// dispatch by integer, never by name comparison.
#[derive(Debug, Default)]
pub struct MethodTable {
    by_name: SymbolTable,
    names: Vec<String>,
}

impl MethodTable {
    pub fn intern(&mut self, signature: &str) -> Symbol {
        if let Some(sym) = self.by_name.get(signature) {
            return *sym;
        }
        let sym = Symbol(self.names.len() as u32);
        self.names.push(signature.to_string());
        self.by_name.insert(signature.to_string(), sym);
        sym
    }

    #[must_use]
    pub fn lookup(&self, signature: &str) -> Option<Symbol> {
        self.by_name.get(signature).copied()
    }

    #[must_use]
    pub fn name_of(&self, symbol: Symbol) -> Option<&str> {
        self.names.get(symbol.0 as usize).map(String::as_str)
    }
}

/// The module table: every loaded module, keyed by name, plus a cache of
/// already-loaded source text keyed by the loader callback.
#[derive(Debug, Default)]
pub struct ModuleTable {
    by_name: HashMap<String, Handle>,
}

impl ModuleTable {
    pub fn insert(&mut self, name: impl Into<String>, handle: Handle) {
        self.by_name.insert(name.into(), handle);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Handle> {
        self.by_name.get(name).copied()
    }

    #[must_use]
    pub fn handles(&self) -> Vec<Handle> {
        self.by_name.values().copied().collect()
    }
}

/// The embedder-facing handle table: stable small-integer keys the host uses
/// to read/write values and pass them as method arguments without exposing
/// arena handles directly (arena handles are invalidated by generation reuse;
/// embedder handles are stable until explicitly released).
#[derive(Debug, Default)]
pub struct HandleTable {
    slots: Vec<Option<Value>>,
    free: Vec<u32>,
}

/// A stable key exposed to the embedder, distinct from [`Handle`] (the
/// internal arena index) so releasing an embedder handle never races with GC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EmbedderHandle(pub u32);

impl HandleTable {
    pub fn acquire(&mut self, value: Value) -> EmbedderHandle {
        if let Some(index) = self.free.pop() {
            self.slots[index as usize] = Some(value);
            EmbedderHandle(index)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Some(value));
            EmbedderHandle(index)
        }
    }

    #[must_use]
    pub fn get(&self, handle: EmbedderHandle) -> Option<Value> {
        self.slots.get(handle.0 as usize).copied().flatten()
    }

    pub fn set(&mut self, handle: EmbedderHandle, value: Value) {
        if let Some(slot) = self.slots.get_mut(handle.0 as usize) {
            *slot = Some(value);
        }
    }

    pub fn release(&mut self, handle: EmbedderHandle) {
        if let Some(slot) = self.slots.get_mut(handle.0 as usize) {
            *slot = None;
            self.free.push(handle.0);
        }
    }

    /// All live values, used as GC roots.
    #[must_use]
    pub fn live_values(&self) -> Vec<Value> {
        self.slots.iter().flatten().copied().collect()
    }
}

/// Per-VM context: everything that would otherwise be global mutable state
/// (method-name table, compiler scratch, module map) lives here and is
/// threaded explicitly instead.
#[derive(Default)]
pub struct Realm {
    pub methods: MethodTable,
    pub modules: ModuleTable,
    pub handles: HandleTable,
    /// Foreign methods registered by the embedder, keyed by id (stored on a
    /// `Class`'s `MethodImpl::Foreign`).
    pub foreign_methods: Vec<ForeignMethod>,
    pub foreign_destructors: Vec<ForeignDestructor>,
}

impl std::fmt::Debug for Realm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Realm")
            .field("methods", &self.methods)
            .field("modules", &self.modules)
            .field("handles", &self.handles)
            .field("foreign_methods", &self.foreign_methods.len())
            .field("foreign_destructors", &self.foreign_destructors.len())
            .finish()
    }
}

pub type ForeignMethod = Box<dyn FnMut(&mut ForeignCallContext<'_>)>;
pub type ForeignDestructor = Box<dyn FnMut(&mut crate::value::object::Instance)>;

/// The slice the VM exposes to a foreign method during a call: receiver plus
/// arguments, and a single write-once return slot.
pub struct ForeignCallContext<'a> {
    pub args: &'a [Value],
    pub result: Value,
}

impl<'a> ForeignCallContext<'a> {
    #[must_use]
    pub fn new(args: &'a [Value]) -> Self {
        Self { args, result: Value::Null }
    }

    pub fn ret(&mut self, value: Value) {
        self.result = value;
    }
}

impl Realm {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_foreign(&mut self, f: ForeignMethod) -> u32 {
        self.foreign_methods.push(f);
        (self.foreign_methods.len() - 1) as u32
    }

    pub fn register_destructor(&mut self, f: ForeignDestructor) -> u32 {
        self.foreign_destructors.push(f);
        (self.foreign_destructors.len() - 1) as u32
    }

    /// Root handles owned by the realm: every loaded module plus every live
    /// embedder handle that wraps an `Obj`.
    #[must_use]
    pub fn roots(&self) -> Vec<Handle> {
        let mut roots = self.modules.handles();
        for value in self.handles.live_values() {
            if let Value::Obj(h) = value {
                roots.push(h);
            }
        }
        roots
    }
}
