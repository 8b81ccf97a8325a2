// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Cardinal Authors

//! Heap object variants.
//!
//! Every variant here is reachable only through a [`super::Handle`]; none of
//! them embed raw pointers to one another. Back-references (a closure's
//! function, an instance's class, an upvalue's fiber) are handles or
//! `(fiber_id, slot)` pairs, never owning references, so the arena's
//! mark-and-sweep pass is the sole owner of lifetime.

use super::{Handle, Symbol, Value};
use crate::bytecode::Chunk;
use std::collections::HashMap;

/// An immutable, hash-precomputed byte string.
#[derive(Debug, Clone)]
pub struct Str {
    pub bytes: Vec<u8>,
    pub hash: u64,
}

impl Str {
    #[must_use]
    pub fn new(s: impl Into<Vec<u8>>) -> Self {
        let bytes = s.into();
        let hash = hash_bytes(&bytes);
        Self { bytes, hash }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes).unwrap_or("<invalid utf-8>")
    }
}

/// FNV-1a, matching the hash family the ancestor's string/symbol interning
/// uses for its keyword table.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01B3);
    }
    hash
}

/// An open-addressed `Value -> Value` hash table, keyed only by immutable
/// value kinds (the dispatcher in `heap::map` enforces this at insert time).
#[derive(Debug, Clone, Default)]
pub struct CardMap {
    pub entries: Vec<Option<MapEntry>>,
    pub count: usize,
    /// Number of tombstones (deleted-but-not-compacted slots).
    pub tombstones: usize,
}

#[derive(Debug, Clone)]
pub struct MapEntry {
    pub key: Value,
    pub value: Value,
}

/// `(from, to, inclusive)`; iteration direction derives from the sign of
/// `to - from`.
#[derive(Debug, Clone, Copy)]
pub struct Range {
    pub from: f64,
    pub to: f64,
    pub inclusive: bool,
}

/// An immutable compiled unit.
#[derive(Debug, Clone)]
pub struct FnObj {
    pub chunk: Chunk,
    pub arity: u8,
    pub upvalue_count: u8,
    pub module: Handle,
    pub name: String,
    pub source_path: String,
}

#[derive(Debug, Clone)]
pub struct Closure {
    pub function: Handle,
    pub upvalues: Vec<Handle>,
}

/// Either open (still pointing into a live fiber's stack) or closed (owns the
/// captured value). Keyed by `(fiber_id, slot_index)` rather than a raw
/// pointer so that growing or shrinking the owning fiber's stack never
/// invalidates it: the pair is stable, only the backing `Vec` moves.
#[derive(Debug, Clone)]
pub enum Upvalue {
    Open { fiber_id: u64, slot: usize },
    Closed(Value),
}

/// How a method is implemented.
#[derive(Debug, Clone)]
pub enum MethodImpl {
    /// Slot exists but has no implementation (used for abstract/forward decls).
    None,
    /// Host-implemented builtin, dispatched by id through `intrinsics::dispatch`.
    Primitive(u16),
    /// Host-registered foreign method, dispatched by id through the realm's
    /// foreign-method table.
    Foreign(u32),
    /// A compiled method body.
    Block(Handle),
}

/// Identifies a foreign destructor registered by the embedder for a foreign
/// class. Kept as an opaque id (an enum discriminant + data in spirit) rather
/// than a function pointer on the struct, so `Class` stays plain data; the
/// realm resolves the id to the actual callback at sweep time.
pub type DestructorId = u32;

#[derive(Debug, Clone)]
pub struct Class {
    pub name: String,
    /// Total field count, self plus inherited.
    pub field_count: u32,
    /// Declared superclasses in `is` order; first is primary.
    pub supers: Vec<Handle>,
    /// Field offset inherited from the primary superclass.
    pub inherited_field_offset: u32,
    /// Dense method table indexed by `Symbol`.
    pub methods: Vec<MethodImpl>,
    /// The class's metaclass (carries static methods), if bound yet.
    pub metaclass: Option<Handle>,
    pub is_foreign: bool,
    pub foreign_destructor: Option<DestructorId>,
}

impl Class {
    pub fn method(&self, symbol: Symbol) -> Option<&MethodImpl> {
        self.methods.get(symbol.0 as usize).filter(|m| !matches!(m, MethodImpl::None))
    }

    pub fn set_method(&mut self, symbol: Symbol, m: MethodImpl) {
        let idx = symbol.0 as usize;
        if self.methods.len() <= idx {
            self.methods.resize(idx + 1, MethodImpl::None);
        }
        self.methods[idx] = m;
    }
}

#[derive(Debug, Clone)]
pub struct Instance {
    pub class: Handle,
    pub fields: Vec<Value>,
    /// Per-instance stack of field-offset deltas used while executing a
    /// method inherited from a secondary superclass.
    pub super_adjust: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub var_names: Vec<String>,
    pub vars: Vec<Value>,
    pub body: Option<Handle>,
    pub source_path: Option<String>,
}

impl Module {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            var_names: Vec::new(),
            vars: Vec::new(),
            body: None,
            source_path: None,
        }
    }

    #[must_use]
    pub fn find_var(&self, name: &str) -> Option<usize> {
        self.var_names.iter().position(|n| n == name)
    }

    pub fn define_var(&mut self, name: impl Into<String>, value: Value) -> usize {
        let name = name.into();
        if let Some(idx) = self.find_var(&name) {
            self.vars[idx] = value;
            idx
        } else {
            self.var_names.push(name);
            self.vars.push(value);
            self.vars.len() - 1
        }
    }
}

/// A first-class method: a `(symbol, name, receiver)` triple curried at
/// runtime by `Method.new`/`Method.new(_)`/`Method.new(_,_)`. All three
/// fields start unset (`Method.new()`'s bare form) and fill in independently
/// as `load`/`loadCaller` are called; `.call(...)` only works once both a
/// symbol and a receiver are present.
#[derive(Debug, Clone, Default)]
pub struct BoundMethod {
    pub symbol: Option<Symbol>,
    pub name: Option<String>,
    pub receiver: Option<Value>,
}

impl BoundMethod {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.symbol.is_some() && self.receiver.is_some()
    }
}

/// Dispatch tag for a heap object, used by the mark phase and by error
/// messages (`type_name`).
#[derive(Debug, Clone)]
pub enum Object {
    Str(Str),
    List(Vec<Value>),
    Map(CardMap),
    Range(Range),
    Fn(FnObj),
    Closure(Closure),
    Upvalue(Upvalue),
    Fiber(crate::process::Fiber),
    Class(Class),
    Instance(Instance),
    Module(Module),
    Method(BoundMethod),
}

impl Object {
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Object::Str(_) => "String",
            Object::List(_) => "List",
            Object::Map(_) => "Map",
            Object::Range(_) => "Range",
            Object::Fn(_) => "Fn",
            Object::Closure(_) => "Closure",
            Object::Upvalue(_) => "Upvalue",
            Object::Fiber(_) => "Fiber",
            Object::Class(_) => "Class",
            Object::Instance(_) => "Instance",
            Object::Module(_) => "Module",
            Object::Method(_) => "Method",
        }
    }
}

/// Not a heap object itself; interned symbol -> name mapping lives in the
/// realm's method-name table, backed by a plain map so lookups in either
/// direction are O(1).
pub type SymbolTable = HashMap<String, Symbol>;
