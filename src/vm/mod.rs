// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Cardinal Authors

//! The bytecode interpreter: opcode dispatch, method dispatch, closures,
//! classes, fibers, and module loading, all threaded through an explicit
//! [`Vm`] rather than process-global state.

pub mod bootstrap;
#[cfg(test)]
mod vm_test;

use crate::bytecode::{Chunk, Op};
use crate::compiler;
use crate::config::Configuration;
use crate::error::{CardinalError, CompileError, RuntimeError};
use crate::heap::Heap;
use crate::intrinsics::{self, FiberMode, Primitive, PrimitiveContext, PrimitiveResult};
use crate::loader::SourceCache;
use crate::process::{CallFrame, Fiber, FiberStatus};
use crate::realm::Realm;
use crate::value::object::{Class, Closure, Instance, MethodImpl, Module, Object, Str, Upvalue};
use crate::value::{Handle, Symbol, Value};

/// The embeddable interpreter. Owns the heap, the per-VM realm, the module
/// source cache, the embedder configuration, and the handle of the fiber
/// currently executing.
pub struct Vm {
    pub heap: Heap,
    pub realm: Realm,
    pub loader: SourceCache,
    pub config: Configuration,
    pub core: bootstrap::CoreClasses,
    current: Handle,
    main_fiber: Handle,
}

impl Vm {
    #[must_use]
    pub fn new(mut config: Configuration) -> Self {
        let mut heap = Heap::new(config.initial_heap_size, config.min_heap_size, config.heap_growth_percent);
        let mut realm = Realm::new();
        let core = bootstrap::install(&mut heap, &mut realm);
        let main_fiber = heap.alloc(Object::Fiber(Fiber::new(config.stack_max / 8, config.call_depth)), &[]);
        let _ = &mut config;
        Self { heap, realm, loader: SourceCache::new(), config, core, current: main_fiber, main_fiber }
    }

    /// Compile `source` as a fresh or existing module named `module_name` and
    /// run its top-level body to completion on the main fiber.
    pub fn interpret(&mut self, source: &str, module_name: &str) -> Result<Value, CardinalError> {
        let module = self.get_or_create_module(module_name);
        let script_fn = compiler::compile(source, module_name, module, &mut self.heap, &mut self.realm)
            .map_err(CardinalError::Compile)?;
        self.run_script(script_fn).map_err(|error| {
            let stack_trace = self.capture_stack_trace();
            CardinalError::Runtime { error, stack_trace }
        })
    }

    /// Compile only, without running — the embedding API's `compile`. The
    /// returned handle is a plain `Fn`: pass it to [`Vm::run_compiled`] to
    /// execute it, or to [`Vm::dump_bytecode`] to serialize it.
    pub fn compile(&mut self, source: &str, module_name: &str) -> Result<Handle, Vec<CompileError>> {
        let module = self.get_or_create_module(module_name);
        compiler::compile(source, module_name, module, &mut self.heap, &mut self.realm)
    }

    /// Run a handle previously returned by [`Vm::compile`] or
    /// [`Vm::load_bytecode`] to completion on the main fiber.
    pub fn run_compiled(&mut self, script_fn: Handle) -> Result<Value, CardinalError> {
        self.run_script(script_fn).map_err(|error| {
            let stack_trace = self.capture_stack_trace();
            CardinalError::Runtime { error, stack_trace }
        })
    }

    /// Serialize a handle previously returned by [`Vm::compile`] into a
    /// `#CARDINALBC` blob — the embedding surface's "emit a bytecode blob".
    #[must_use]
    pub fn dump_bytecode(&self, script_fn: Handle) -> Vec<u8> {
        crate::bytecode::compile_to_bytecode(&self.heap, script_fn)
    }

    /// Rebuild a handle from a `#CARDINALBC` blob, binding it to
    /// `module_name` (created fresh if it doesn't exist yet) — the
    /// embedding surface's "load a bytecode blob". The returned handle runs
    /// the same way a freshly compiled one does, via [`Vm::run_compiled`].
    pub fn load_bytecode(&mut self, bytes: &[u8], module_name: &str) -> Result<Handle, RuntimeError> {
        let module = self.get_or_create_module(module_name);
        crate::bytecode::compile_from_bytecode(bytes, module, &mut self.heap)
    }

    fn get_or_create_module(&mut self, name: &str) -> Handle {
        if let Some(h) = self.realm.modules.get(name) {
            return h;
        }
        let mut module = Module::new(name);
        bootstrap::inject_core_globals(&mut module, &self.core);
        let handle = self.heap.alloc(Object::Module(module), &[]);
        self.realm.modules.insert(name, handle);
        handle
    }

    /// Run a freshly compiled script `Fn` to completion on the main fiber,
    /// resetting that fiber first so repeated `interpret` calls don't pile up
    /// stale frames.
    fn run_script(&mut self, script_fn: Handle) -> Result<Value, RuntimeError> {
        self.current = self.main_fiber;
        if let Some(Object::Fiber(fiber)) = self.heap.get_mut(self.main_fiber) {
            fiber.stack.clear();
            fiber.frames.clear();
            fiber.status = FiberStatus::Running;
        }
        let closure = self.make_closure(script_fn, Vec::new());
        let base_depth = self.frame_depth(self.main_fiber);
        self.push_call(self.main_fiber, closure, &[])?;
        self.run(base_depth)
    }

    fn make_closure(&mut self, function: Handle, upvalues: Vec<Handle>) -> Handle {
        self.heap.alloc(Object::Closure(Closure { function, upvalues }), &[function])
    }

    /// Push a new call frame for `closure` onto `fiber`, with `args` already
    /// meant to follow the receiver. The receiver itself must already be the
    /// value just below `args` on the fiber's stack; this only happens at a
    /// script's very first call, where there is no receiver yet, so we push
    /// `Null` as a synthetic one.
    fn push_call(&mut self, fiber_handle: Handle, closure: Handle, args: &[Value]) -> Result<(), RuntimeError> {
        let Some(Object::Fiber(fiber)) = self.heap.get_mut(fiber_handle) else {
            return Err(RuntimeError::NotCallable { type_name: "Fiber" });
        };
        fiber.push(Value::Null).map_err(|_| RuntimeError::StackOverflow)?;
        for &a in args {
            fiber.push(a).map_err(|_| RuntimeError::StackOverflow)?;
        }
        let base = fiber.stack.len() - args.len() - 1;
        fiber
            .push_frame(CallFrame { closure, ip: 0, base, pushed_super_adjust: false, defining_class: None })
            .map_err(|_| RuntimeError::StackOverflow)?;
        Ok(())
    }

    fn capture_stack_trace(&self) -> Vec<String> {
        let Some(Object::Fiber(fiber)) = self.heap.get(self.current) else { return Vec::new() };
        fiber
            .frames
            .iter()
            .rev()
            .filter_map(|frame| {
                let Object::Closure(closure) = self.heap.get(frame.closure)? else { return None };
                let Object::Fn(f) = self.heap.get(closure.function)? else { return None };
                Some(format!("{} ({}:{})", f.name, f.source_path, f.chunk.line_at(frame.ip)))
            })
            .collect()
    }

    // --- the interpreter loop ---

    /// Run until the top fiber's frame stack drops back to `base_depth` (the
    /// depth it had before the initiating call's frame was pushed), handling
    /// any fiber switches requested along the way. Returns the value the
    /// initiating call produced.
    fn run(&mut self, base_depth: usize) -> Result<Value, RuntimeError> {
        let top_fiber = self.current;

        loop {
            if self.current == top_fiber && self.frame_depth(top_fiber) == base_depth {
                let Some(Object::Fiber(fiber)) = self.heap.get_mut(self.current) else {
                    return Err(RuntimeError::StackOverflow);
                };
                fiber.status = FiberStatus::Finished;
                return Ok(fiber.pop());
            }
            if self.current != top_fiber && self.frame_depth(self.current) == 0 {
                self.finish_current_fiber()?;
                continue;
            }

            match self.step() {
                Ok(()) => {}
                Err(err) => self.propagate_error(err, top_fiber, base_depth)?,
            }
        }
    }

    /// A fiber reached the bottom of its own frame stack by returning
    /// normally (as opposed to yielding): hand its last value back to
    /// whichever fiber resumed it and keep running there.
    fn finish_current_fiber(&mut self) -> Result<(), RuntimeError> {
        let Some(Object::Fiber(fiber)) = self.heap.get_mut(self.current) else {
            return Err(RuntimeError::StackOverflow);
        };
        let result = fiber.pop();
        fiber.status = FiberStatus::Finished;
        let caller_handle = fiber.caller.take().ok_or(RuntimeError::StackOverflow)?;
        self.current = caller_handle;
        if let Some(Object::Fiber(caller_fiber)) = self.heap.get_mut(caller_handle) {
            caller_fiber.push(result).ok();
        }
        Ok(())
    }

    fn frame_depth(&self, fiber: Handle) -> usize {
        match self.heap.get(fiber) {
            Some(Object::Fiber(f)) => f.frames.len(),
            _ => 0,
        }
    }

    /// An uncaught error either unwinds into the nearest `try` boundary
    /// (switching back to the calling fiber with the error as the call's
    /// result) or, if no fiber on the caller chain was a `try`, aborts the
    /// whole `run`.
    fn propagate_error(&mut self, error: RuntimeError, top_fiber: Handle, base_depth: usize) -> Result<(), RuntimeError> {
        let error_value = self.error_to_value(&error);
        loop {
            let Some(Object::Fiber(fiber)) = self.heap.get_mut(self.current) else {
                return Err(error);
            };
            let called_with_try = fiber.called_with_try;
            let caller = fiber.caller;
            fiber.status = FiberStatus::Errored;
            fiber.error = Some(error_value);

            let Some(caller_handle) = caller else {
                return Err(error);
            };
            if self.current == top_fiber && self.frame_depth(self.current) == base_depth {
                return Err(error);
            }
            self.current = caller_handle;
            if called_with_try {
                if let Some(Object::Fiber(caller_fiber)) = self.heap.get_mut(caller_handle) {
                    caller_fiber.push(error_value).ok();
                }
                return Ok(());
            }
        }
    }

    /// Render a `RuntimeError` as the script-visible value that reaches a
    /// `try`-block's caller: the wrapped value itself for `raise`/`abort`
    /// (`RuntimeError::User`), otherwise a rendered message string.
    fn error_to_value(&mut self, error: &RuntimeError) -> Value {
        if let RuntimeError::User(value) = error {
            return *value;
        }
        let handle = self.heap.alloc(Object::Str(Str::new(error.to_string())), &[]);
        Value::Obj(handle)
    }

    /// Execute exactly one instruction on the current fiber.
    fn step(&mut self) -> Result<(), RuntimeError> {
        let fiber_handle = self.current;
        let (op, line) = self.fetch_op(fiber_handle)?;

        match op {
            Op::Null => self.push(fiber_handle, Value::Null)?,
            Op::True => self.push(fiber_handle, Value::Bool(true))?,
            Op::False => self.push(fiber_handle, Value::Bool(false))?,
            Op::Constant => {
                let idx = self.fetch_u16(fiber_handle)?;
                let v = self.current_chunk(fiber_handle)?.constants[idx as usize];
                self.push(fiber_handle, v)?;
            }

            Op::LoadLocal0
            | Op::LoadLocal1
            | Op::LoadLocal2
            | Op::LoadLocal3
            | Op::LoadLocal4
            | Op::LoadLocal5
            | Op::LoadLocal6
            | Op::LoadLocal7
            | Op::LoadLocal8 => {
                let slot = (op as u8) - (Op::LoadLocal0 as u8);
                self.load_local(fiber_handle, slot)?;
            }
            Op::LoadLocal => {
                let slot = self.fetch_byte(fiber_handle)?;
                self.load_local(fiber_handle, slot)?;
            }
            Op::StoreLocal => {
                let slot = self.fetch_byte(fiber_handle)?;
                let v = self.peek(fiber_handle, 0)?;
                self.store_local(fiber_handle, slot, v)?;
            }

            Op::LoadUpvalue => {
                let idx = self.fetch_byte(fiber_handle)?;
                let v = self.read_upvalue(fiber_handle, idx)?;
                self.push(fiber_handle, v)?;
            }
            Op::StoreUpvalue => {
                let idx = self.fetch_byte(fiber_handle)?;
                let v = self.peek(fiber_handle, 0)?;
                self.write_upvalue(fiber_handle, idx, v)?;
            }
            Op::CloseUpvalue => {
                let v = self.pop(fiber_handle)?;
                let top_slot = self.stack_len(fiber_handle)?;
                self.close_upvalues_from(fiber_handle, top_slot, Some(v));
            }

            Op::LoadModuleVar => {
                let idx = self.fetch_u16(fiber_handle)?;
                let v = self.load_module_var(fiber_handle, idx)?;
                self.push(fiber_handle, v)?;
            }
            Op::StoreModuleVar => {
                let idx = self.fetch_u16(fiber_handle)?;
                let v = self.peek(fiber_handle, 0)?;
                self.store_module_var(fiber_handle, idx, v)?;
            }

            Op::LoadField => {
                let idx = self.fetch_u16(fiber_handle)?;
                let target = self.pop(fiber_handle)?;
                let v = self.read_field(target, idx as usize)?;
                self.push(fiber_handle, v)?;
            }
            Op::StoreField => {
                let idx = self.fetch_u16(fiber_handle)?;
                let v = self.pop(fiber_handle)?;
                let target = self.pop(fiber_handle)?;
                self.write_field(target, idx as usize, v)?;
                self.push(fiber_handle, v)?;
            }
            Op::LoadFieldThis => {
                let idx = self.fetch_u16(fiber_handle)?;
                let slot = self.field_slot(fiber_handle, idx)?;
                let receiver = self.receiver_of_current_frame(fiber_handle)?;
                let v = self.read_field(receiver, slot)?;
                self.push(fiber_handle, v)?;
            }
            Op::StoreFieldThis => {
                let idx = self.fetch_u16(fiber_handle)?;
                let slot = self.field_slot(fiber_handle, idx)?;
                let v = self.peek(fiber_handle, 0)?;
                let receiver = self.receiver_of_current_frame(fiber_handle)?;
                self.write_field(receiver, slot, v)?;
            }

            Op::Pop => {
                self.pop(fiber_handle)?;
            }
            Op::Dup => {
                let v = self.peek(fiber_handle, 0)?;
                self.push(fiber_handle, v)?;
            }

            Op::Jump => {
                let ofs = self.fetch_u16(fiber_handle)?;
                self.advance_ip(fiber_handle, ofs as i32)?;
            }
            Op::Loop => {
                let ofs = self.fetch_u16(fiber_handle)?;
                self.advance_ip(fiber_handle, -(ofs as i32))?;
            }
            Op::JumpIf => {
                let ofs = self.fetch_u16(fiber_handle)?;
                let cond = self.pop(fiber_handle)?;
                if !cond.is_truthy() {
                    self.advance_ip(fiber_handle, ofs as i32)?;
                }
            }
            Op::And => {
                let ofs = self.fetch_u16(fiber_handle)?;
                let v = self.peek(fiber_handle, 0)?;
                if v.is_truthy() {
                    self.pop(fiber_handle)?;
                } else {
                    self.advance_ip(fiber_handle, ofs as i32)?;
                }
            }
            Op::Or => {
                let ofs = self.fetch_u16(fiber_handle)?;
                let v = self.peek(fiber_handle, 0)?;
                if v.is_truthy() {
                    self.advance_ip(fiber_handle, ofs as i32)?;
                } else {
                    self.pop(fiber_handle)?;
                }
            }

            Op::Is => {
                let target = self.pop(fiber_handle)?;
                let receiver = self.pop(fiber_handle)?;
                let result = self.is_instance_of(receiver, target);
                self.push(fiber_handle, Value::Bool(result))?;
            }
            Op::Construct => self.construct(fiber_handle)?,
            Op::Class => self.create_class(fiber_handle)?,
            Op::MethodInstance => self.bind_method(fiber_handle, false)?,
            Op::MethodStatic => self.bind_method(fiber_handle, true)?,

            Op::Closure => self.create_closure(fiber_handle)?,

            Op::LoadModule => self.load_module(fiber_handle)?,
            Op::ImportVariable => self.import_variable(fiber_handle)?,
            Op::Module => {}

            Op::Return => self.do_return(fiber_handle)?,
            Op::End => return Err(RuntimeError::InvalidOpcode(Op::End as u8)),
            Op::Break => return Err(RuntimeError::InvalidOpcode(Op::Break as u8)),

            _ => self.call_or_super(fiber_handle, op)?,
        }

        let _ = line;
        Ok(())
    }

    // --- fetch/decode ---

    fn fetch_op(&mut self, fiber_handle: Handle) -> Result<(Op, u32), RuntimeError> {
        let frame_ip_closure = self.frame_ip_and_closure(fiber_handle)?;
        let (ip, closure) = frame_ip_closure;
        let Some(Object::Closure(c)) = self.heap.get(closure) else { return Err(RuntimeError::StackOverflow) };
        let Some(Object::Fn(f)) = self.heap.get(c.function) else { return Err(RuntimeError::StackOverflow) };
        let byte = *f.chunk.code.get(ip).ok_or(RuntimeError::InvalidOpcode(0))?;
        let line = f.chunk.line_at(ip);
        let op = Op::from_u8(byte).ok_or(RuntimeError::InvalidOpcode(byte))?;
        self.set_frame_ip(fiber_handle, ip + 1);
        Ok((op, line))
    }

    fn fetch_byte(&mut self, fiber_handle: Handle) -> Result<u8, RuntimeError> {
        let (ip, closure) = self.frame_ip_and_closure(fiber_handle)?;
        let Some(Object::Closure(c)) = self.heap.get(closure) else { return Err(RuntimeError::StackOverflow) };
        let Some(Object::Fn(f)) = self.heap.get(c.function) else { return Err(RuntimeError::StackOverflow) };
        let byte = *f.chunk.code.get(ip).ok_or(RuntimeError::InvalidOpcode(0))?;
        self.set_frame_ip(fiber_handle, ip + 1);
        Ok(byte)
    }

    fn fetch_u16(&mut self, fiber_handle: Handle) -> Result<u16, RuntimeError> {
        let hi = self.fetch_byte(fiber_handle)?;
        let lo = self.fetch_byte(fiber_handle)?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    fn frame_ip_and_closure(&self, fiber_handle: Handle) -> Result<(usize, Handle), RuntimeError> {
        let Some(Object::Fiber(fiber)) = self.heap.get(fiber_handle) else { return Err(RuntimeError::StackOverflow) };
        let frame = fiber.current_frame().ok_or(RuntimeError::StackOverflow)?;
        Ok((frame.ip, frame.closure))
    }

    fn set_frame_ip(&mut self, fiber_handle: Handle, ip: usize) {
        if let Some(Object::Fiber(fiber)) = self.heap.get_mut(fiber_handle) {
            if let Some(frame) = fiber.current_frame_mut() {
                frame.ip = ip;
            }
        }
    }

    fn advance_ip(&mut self, fiber_handle: Handle, delta: i32) -> Result<(), RuntimeError> {
        let (ip, _) = self.frame_ip_and_closure(fiber_handle)?;
        let new_ip = (ip as i32 + delta) as usize;
        self.set_frame_ip(fiber_handle, new_ip);
        Ok(())
    }

    fn current_chunk(&self, fiber_handle: Handle) -> Result<&Chunk, RuntimeError> {
        let (_, closure) = self.frame_ip_and_closure(fiber_handle)?;
        let Some(Object::Closure(c)) = self.heap.get(closure) else { return Err(RuntimeError::StackOverflow) };
        let Some(Object::Fn(f)) = self.heap.get(c.function) else { return Err(RuntimeError::StackOverflow) };
        Ok(&f.chunk)
    }

    // --- stack access ---

    fn push(&mut self, fiber_handle: Handle, value: Value) -> Result<(), RuntimeError> {
        let Some(Object::Fiber(fiber)) = self.heap.get_mut(fiber_handle) else { return Err(RuntimeError::StackOverflow) };
        fiber.push(value).map_err(|_| RuntimeError::StackOverflow)
    }

    fn pop(&mut self, fiber_handle: Handle) -> Result<Value, RuntimeError> {
        let Some(Object::Fiber(fiber)) = self.heap.get_mut(fiber_handle) else { return Err(RuntimeError::StackOverflow) };
        Ok(fiber.pop())
    }

    fn peek(&self, fiber_handle: Handle, distance: usize) -> Result<Value, RuntimeError> {
        let Some(Object::Fiber(fiber)) = self.heap.get(fiber_handle) else { return Err(RuntimeError::StackOverflow) };
        Ok(fiber.peek(distance))
    }

    fn stack_len(&self, fiber_handle: Handle) -> Result<usize, RuntimeError> {
        let Some(Object::Fiber(fiber)) = self.heap.get(fiber_handle) else { return Err(RuntimeError::StackOverflow) };
        Ok(fiber.stack.len())
    }

    fn frame_base(&self, fiber_handle: Handle) -> Result<usize, RuntimeError> {
        let Some(Object::Fiber(fiber)) = self.heap.get(fiber_handle) else { return Err(RuntimeError::StackOverflow) };
        Ok(fiber.current_frame().ok_or(RuntimeError::StackOverflow)?.base)
    }

    fn frame_defining_class(&self, fiber_handle: Handle) -> Result<Option<Handle>, RuntimeError> {
        let Some(Object::Fiber(fiber)) = self.heap.get(fiber_handle) else { return Err(RuntimeError::StackOverflow) };
        Ok(fiber.current_frame().ok_or(RuntimeError::StackOverflow)?.defining_class)
    }

    fn frame_pushed_super_adjust(&self, fiber_handle: Handle) -> Result<bool, RuntimeError> {
        let Some(Object::Fiber(fiber)) = self.heap.get(fiber_handle) else { return Err(RuntimeError::StackOverflow) };
        Ok(fiber.current_frame().ok_or(RuntimeError::StackOverflow)?.pushed_super_adjust)
    }

    fn load_local(&mut self, fiber_handle: Handle, slot: u8) -> Result<(), RuntimeError> {
        let base = self.frame_base(fiber_handle)?;
        let Some(Object::Fiber(fiber)) = self.heap.get(fiber_handle) else { return Err(RuntimeError::StackOverflow) };
        let v = fiber.stack[base + slot as usize];
        self.push(fiber_handle, v)
    }

    fn store_local(&mut self, fiber_handle: Handle, slot: u8, value: Value) -> Result<(), RuntimeError> {
        let base = self.frame_base(fiber_handle)?;
        let Some(Object::Fiber(fiber)) = self.heap.get_mut(fiber_handle) else { return Err(RuntimeError::StackOverflow) };
        fiber.stack[base + slot as usize] = value;
        Ok(())
    }

    // --- upvalues ---

    /// Find or create an open upvalue for `slot` on `fiber_handle`'s stack.
    fn capture_upvalue(&mut self, fiber_handle: Handle, slot: usize) -> Handle {
        let fiber_id = match self.heap.get(fiber_handle) {
            Some(Object::Fiber(f)) => f.id,
            _ => 0,
        };
        if let Some(Object::Fiber(fiber)) = self.heap.get(fiber_handle) {
            for &h in &fiber.open_upvalues {
                if let Some(Object::Upvalue(Upvalue::Open { fiber_id: fid, slot: s })) = self.heap.get(h) {
                    if *fid == fiber_id && *s == slot {
                        return h;
                    }
                }
            }
        }
        let handle = self.heap.alloc(Object::Upvalue(Upvalue::Open { fiber_id, slot }), &[fiber_handle]);
        let open_upvalues: Vec<Handle> = if let Some(Object::Fiber(fiber)) = self.heap.get(fiber_handle) {
            fiber.open_upvalues.clone()
        } else {
            Vec::new()
        };
        let pos = open_upvalues.iter().position(|&h| {
            matches!(self.heap.get(h), Some(Object::Upvalue(Upvalue::Open { slot: s, .. })) if *s < slot)
        });
        // Keep the list sorted by descending slot.
        if let Some(Object::Fiber(fiber)) = self.heap.get_mut(fiber_handle) {
            match pos {
                Some(i) => fiber.open_upvalues.insert(i, handle),
                None => fiber.open_upvalues.push(handle),
            }
        }
        handle
    }

    /// Simplification: every upvalue this VM reads or writes belongs to the
    /// fiber currently executing, since a closure can only be created while
    /// its enclosing frame is live on that same fiber. Closures handed across
    /// a `Fiber.call`/`transfer` boundary without being invoked there yet are
    /// out of scope.
    fn read_upvalue(&self, fiber_handle: Handle, index: u8) -> Result<Value, RuntimeError> {
        let (_, closure) = self.frame_ip_and_closure(fiber_handle)?;
        let Some(Object::Closure(c)) = self.heap.get(closure) else { return Err(RuntimeError::StackOverflow) };
        let uv_handle = *c.upvalues.get(index as usize).ok_or(RuntimeError::StackOverflow)?;
        match self.heap.get(uv_handle) {
            Some(Object::Upvalue(Upvalue::Closed(v))) => Ok(*v),
            Some(Object::Upvalue(Upvalue::Open { slot, .. })) => {
                let Some(Object::Fiber(fiber)) = self.heap.get(fiber_handle) else {
                    return Err(RuntimeError::StackOverflow);
                };
                Ok(fiber.stack[*slot])
            }
            _ => Err(RuntimeError::StackOverflow),
        }
    }

    fn write_upvalue(&mut self, fiber_handle: Handle, index: u8, value: Value) -> Result<(), RuntimeError> {
        let (_, closure) = self.frame_ip_and_closure(fiber_handle)?;
        let Some(Object::Closure(c)) = self.heap.get(closure) else { return Err(RuntimeError::StackOverflow) };
        let uv_handle = *c.upvalues.get(index as usize).ok_or(RuntimeError::StackOverflow)?;
        match self.heap.get(uv_handle).map(|o| {
            if let Object::Upvalue(u) = o { Some(u.clone()) } else { None }
        }) {
            Some(Some(Upvalue::Closed(_))) => {
                if let Some(Object::Upvalue(u)) = self.heap.get_mut(uv_handle) {
                    *u = Upvalue::Closed(value);
                }
            }
            Some(Some(Upvalue::Open { slot, .. })) => {
                if let Some(Object::Fiber(fiber)) = self.heap.get_mut(fiber_handle) {
                    fiber.stack[slot] = value;
                }
            }
            _ => return Err(RuntimeError::StackOverflow),
        }
        Ok(())
    }

    /// Close every open upvalue at or above `from_slot` on `fiber_handle`,
    /// snapshotting its current stack value. `top_value`, if given, is the
    /// value most recently popped for `CLOSE_UPVALUE` (the compiler emits
    /// `CloseUpvalue` for a captured local going out of scope, so the value
    /// being closed over is the one just popped, not re-read from the stack).
    fn close_upvalues_from(&mut self, fiber_handle: Handle, from_slot: usize, top_value: Option<Value>) {
        let Some(Object::Fiber(fiber)) = self.heap.get(fiber_handle) else { return };
        let to_close: Vec<Handle> = fiber
            .open_upvalues
            .iter()
            .copied()
            .filter(|&h| match self.heap.get(h) {
                Some(Object::Upvalue(Upvalue::Open { slot, .. })) => *slot >= from_slot,
                _ => false,
            })
            .collect();
        for h in &to_close {
            let value = match self.heap.get(*h) {
                Some(Object::Upvalue(Upvalue::Open { slot, .. })) => {
                    if *slot == from_slot {
                        top_value.unwrap_or(Value::Null)
                    } else if let Some(Object::Fiber(fiber)) = self.heap.get(fiber_handle) {
                        fiber.stack[*slot]
                    } else {
                        Value::Null
                    }
                }
                _ => Value::Null,
            };
            if let Some(Object::Upvalue(u)) = self.heap.get_mut(*h) {
                *u = Upvalue::Closed(value);
            }
        }
        if let Some(Object::Fiber(fiber)) = self.heap.get_mut(fiber_handle) {
            fiber.open_upvalues.retain(|h| !to_close.contains(h));
        }
    }

    // --- module variables & fields ---

    fn current_module(&self, fiber_handle: Handle) -> Result<Handle, RuntimeError> {
        let (_, closure) = self.frame_ip_and_closure(fiber_handle)?;
        let Some(Object::Closure(c)) = self.heap.get(closure) else { return Err(RuntimeError::StackOverflow) };
        let Some(Object::Fn(f)) = self.heap.get(c.function) else { return Err(RuntimeError::StackOverflow) };
        Ok(f.module)
    }

    fn constant_string(&self, fiber_handle: Handle, const_idx: u16) -> Result<String, RuntimeError> {
        let chunk = self.current_chunk(fiber_handle)?;
        let value = *chunk.constants.get(const_idx as usize).ok_or(RuntimeError::StackOverflow)?;
        let Value::Obj(h) = value else { return Err(RuntimeError::StackOverflow) };
        let Some(Object::Str(s)) = self.heap.get(h) else { return Err(RuntimeError::StackOverflow) };
        Ok(s.as_str().to_string())
    }

    fn load_module_var(&mut self, fiber_handle: Handle, const_idx: u16) -> Result<Value, RuntimeError> {
        let name = self.constant_string(fiber_handle, const_idx)?;
        let module = self.current_module(fiber_handle)?;
        let Some(Object::Module(m)) = self.heap.get(module) else { return Err(RuntimeError::StackOverflow) };
        match m.find_var(&name) {
            Some(idx) => Ok(m.vars[idx]),
            None => Err(RuntimeError::UndefinedModuleVariable { name }),
        }
    }

    fn store_module_var(&mut self, fiber_handle: Handle, const_idx: u16, value: Value) -> Result<(), RuntimeError> {
        let name = self.constant_string(fiber_handle, const_idx)?;
        let module = self.current_module(fiber_handle)?;
        let Some(Object::Module(m)) = self.heap.get_mut(module) else { return Err(RuntimeError::StackOverflow) };
        m.define_var(name, value);
        Ok(())
    }

    fn read_field(&self, target: Value, idx: usize) -> Result<Value, RuntimeError> {
        let Value::Obj(h) = target else {
            return Err(RuntimeError::TypeError { expected: "Instance", got: target.type_name() });
        };
        let Some(Object::Instance(inst)) = self.heap.get(h) else {
            return Err(RuntimeError::TypeError { expected: "Instance", got: "freed" });
        };
        inst.fields.get(idx).copied().ok_or(RuntimeError::IndexOutOfBounds { index: idx as f64, len: inst.fields.len() })
    }

    fn write_field(&mut self, target: Value, idx: usize, value: Value) -> Result<(), RuntimeError> {
        let Value::Obj(h) = target else {
            return Err(RuntimeError::TypeError { expected: "Instance", got: target.type_name() });
        };
        let Some(Object::Instance(inst)) = self.heap.get_mut(h) else {
            return Err(RuntimeError::TypeError { expected: "Instance", got: "freed" });
        };
        if let Some(slot) = inst.fields.get_mut(idx) {
            *slot = value;
            Ok(())
        } else {
            Err(RuntimeError::IndexOutOfBounds { index: idx as f64, len: inst.fields.len() })
        }
    }

    fn receiver_of_current_frame(&self, fiber_handle: Handle) -> Result<Value, RuntimeError> {
        let base = self.frame_base(fiber_handle)?;
        let Some(Object::Fiber(fiber)) = self.heap.get(fiber_handle) else { return Err(RuntimeError::StackOverflow) };
        Ok(fiber.stack[base])
    }

    /// `LOAD_FIELD_THIS`/`STORE_FIELD_THIS`'s field index is relative to the
    /// class whose method body is executing; add that class's
    /// `inherited_field_offset`, plus any secondary-superclass delta pushed
    /// for this call, to get the receiver's real slot.
    fn field_slot(&self, fiber_handle: Handle, idx: u16) -> Result<usize, RuntimeError> {
        let defining = self.frame_defining_class(fiber_handle)?;
        let base_offset = match defining.and_then(|d| self.heap.get(d)) {
            Some(Object::Class(c)) => c.inherited_field_offset,
            _ => 0,
        };
        let adjust = if self.frame_pushed_super_adjust(fiber_handle)? {
            let receiver = self.receiver_of_current_frame(fiber_handle)?;
            match receiver.as_obj().and_then(|h| self.heap.get(h)) {
                Some(Object::Instance(inst)) => inst.super_adjust.last().copied().unwrap_or(0),
                _ => 0,
            }
        } else {
            0
        };
        Ok((base_offset + adjust) as usize + idx as usize)
    }

    // --- `is` / class model ---

    fn is_instance_of(&self, receiver: Value, target: Value) -> bool {
        let Some(target_handle) = target.as_obj() else { return false };
        let Some(receiver_class) = self.receiver_class(receiver) else { return false };
        is_subclass_of(&self.heap, receiver_class, target_handle)
    }

    fn receiver_class(&self, value: Value) -> Option<Handle> {
        match value {
            Value::Obj(h) => match self.heap.get(h)? {
                Object::Instance(inst) => Some(inst.class),
                Object::Class(c) => c.metaclass,
                _ => None,
            },
            _ => None,
        }
    }

    fn construct(&mut self, fiber_handle: Handle) -> Result<(), RuntimeError> {
        let base = self.frame_base(fiber_handle)?;
        let Some(Object::Fiber(fiber)) = self.heap.get(fiber_handle) else { return Err(RuntimeError::StackOverflow) };
        let class_value = fiber.stack[base];
        let Some(class_handle) = class_value.as_obj() else {
            return Err(RuntimeError::TypeError { expected: "Class", got: class_value.type_name() });
        };
        let Some(Object::Class(class)) = self.heap.get(class_handle) else {
            return Err(RuntimeError::TypeError { expected: "Class", got: "freed" });
        };
        let field_count = class.field_count as usize;
        let instance = Instance { class: class_handle, fields: vec![Value::Null; field_count], super_adjust: Vec::new() };
        let handle = self.heap.alloc(Object::Instance(instance), &[fiber_handle]);
        if let Some(Object::Fiber(fiber)) = self.heap.get_mut(fiber_handle) {
            fiber.stack[base] = Value::Obj(handle);
        }
        Ok(())
    }

    fn create_class(&mut self, fiber_handle: Handle) -> Result<(), RuntimeError> {
        let own_field_count = self.fetch_u16(fiber_handle)?;
        let super_count = self.fetch_byte(fiber_handle)?;
        let name_idx = self.fetch_u16(fiber_handle)?;
        let name = self.constant_string(fiber_handle, name_idx)?;

        let mut supers = Vec::with_capacity(super_count as usize);
        for _ in 0..super_count {
            let v = self.pop(fiber_handle)?;
            let Some(h) = v.as_obj() else { return Err(RuntimeError::TypeError { expected: "Class", got: v.type_name() }) };
            supers.push(h);
        }
        supers.reverse();

        let inherited_field_offset = supers.first().and_then(|&h| self.heap.get(h)).map_or(0, |o| {
            if let Object::Class(c) = o { c.field_count } else { 0 }
        });
        let secondary_total: u32 = supers
            .iter()
            .skip(1)
            .filter_map(|&h| self.heap.get(h))
            .map(|o| if let Object::Class(c) = o { c.field_count } else { 0 })
            .sum();
        let field_count = inherited_field_offset + u32::from(own_field_count) + secondary_total;

        let class = Class {
            name: name.clone(),
            field_count,
            supers: supers.clone(),
            inherited_field_offset,
            methods: Vec::new(),
            metaclass: None,
            is_foreign: false,
            foreign_destructor: None,
        };
        let class_handle = self.heap.alloc(Object::Class(class), &supers);

        let metaclass = Class {
            name: format!("{name} metaclass"),
            field_count: 0,
            supers: Vec::new(),
            inherited_field_offset: 0,
            methods: Vec::new(),
            metaclass: None,
            is_foreign: false,
            foreign_destructor: None,
        };
        let metaclass_handle = self.heap.alloc(Object::Class(metaclass), &[class_handle]);
        if let Some(Object::Class(c)) = self.heap.get_mut(class_handle) {
            c.metaclass = Some(metaclass_handle);
        }

        self.push(fiber_handle, Value::Obj(class_handle))
    }

    fn bind_method(&mut self, fiber_handle: Handle, is_static: bool) -> Result<(), RuntimeError> {
        let symbol = Symbol(u32::from(self.fetch_u16(fiber_handle)?));
        let closure = self.pop(fiber_handle)?;
        let Some(closure_handle) = closure.as_obj() else {
            return Err(RuntimeError::TypeError { expected: "Fn", got: closure.type_name() });
        };
        let class_value = self.peek(fiber_handle, 0)?;
        let Some(class_handle) = class_value.as_obj() else {
            return Err(RuntimeError::TypeError { expected: "Class", got: class_value.type_name() });
        };
        let target = if is_static {
            match self.heap.get(class_handle) {
                Some(Object::Class(c)) => c.metaclass.unwrap_or(class_handle),
                _ => class_handle,
            }
        } else {
            class_handle
        };
        if let Some(Object::Class(c)) = self.heap.get_mut(target) {
            c.set_method(symbol, MethodImpl::Block(closure_handle));
        }
        Ok(())
    }

    fn create_closure(&mut self, fiber_handle: Handle) -> Result<(), RuntimeError> {
        let const_idx = self.fetch_u16(fiber_handle)?;
        let chunk = self.current_chunk(fiber_handle)?;
        let fn_value = *chunk.constants.get(const_idx as usize).ok_or(RuntimeError::StackOverflow)?;
        let Some(fn_handle) = fn_value.as_obj() else { return Err(RuntimeError::StackOverflow) };
        let Some(Object::Fn(f)) = self.heap.get(fn_handle) else { return Err(RuntimeError::StackOverflow) };
        let upvalue_count = f.upvalue_count;
        let base = self.frame_base(fiber_handle)?;

        let mut upvalues = Vec::with_capacity(upvalue_count as usize);
        for _ in 0..upvalue_count {
            let is_local = self.fetch_byte(fiber_handle)? != 0;
            let index = self.fetch_byte(fiber_handle)?;
            if is_local {
                upvalues.push(self.capture_upvalue(fiber_handle, base + index as usize));
            } else {
                let (_, enclosing_closure) = self.frame_ip_and_closure(fiber_handle)?;
                let Some(Object::Closure(c)) = self.heap.get(enclosing_closure) else {
                    return Err(RuntimeError::StackOverflow);
                };
                upvalues.push(c.upvalues[index as usize]);
            }
        }

        let handle = self.make_closure(fn_handle, upvalues);
        self.push(fiber_handle, Value::Obj(handle))
    }

    fn load_module(&mut self, fiber_handle: Handle) -> Result<(), RuntimeError> {
        let const_idx = self.fetch_u16(fiber_handle)?;
        let name = self.constant_string(fiber_handle, const_idx)?;

        if self.realm.modules.get(&name).is_none() {
            let source = self
                .loader
                .load(&name, &mut *self.config.load_module)
                .ok_or_else(|| RuntimeError::ModuleNotFound { name: name.clone() })?
                .to_string();
            let module_handle = self.get_or_create_module(&name);
            let script_fn = compiler::compile(&source, &name, module_handle, &mut self.heap, &mut self.realm)
                .map_err(|_| RuntimeError::ModuleNotFound { name: name.clone() })?;
            let closure = self.make_closure(script_fn, Vec::new());
            self.push(fiber_handle, Value::Null)?;
            let base = self.stack_len(fiber_handle)? - 1;
            let Some(Object::Fiber(fiber)) = self.heap.get_mut(fiber_handle) else {
                return Err(RuntimeError::StackOverflow);
            };
            fiber
                .push_frame(CallFrame { closure, ip: 0, base, pushed_super_adjust: false, defining_class: None })
                .map_err(|_| RuntimeError::StackOverflow)?;
        } else {
            self.push(fiber_handle, Value::Null)?;
        }
        Ok(())
    }

    fn import_variable(&mut self, fiber_handle: Handle) -> Result<(), RuntimeError> {
        let mod_idx = self.fetch_u16(fiber_handle)?;
        let var_idx = self.fetch_u16(fiber_handle)?;
        let module_name = self.constant_string(fiber_handle, mod_idx)?;
        let var_name = self.constant_string(fiber_handle, var_idx)?;
        let module_handle = self
            .realm
            .modules
            .get(&module_name)
            .ok_or_else(|| RuntimeError::ModuleNotFound { name: module_name.clone() })?;
        let Some(Object::Module(m)) = self.heap.get(module_handle) else { return Err(RuntimeError::StackOverflow) };
        let value = m
            .find_var(&var_name)
            .map(|idx| m.vars[idx])
            .ok_or(RuntimeError::UndefinedModuleVariable { name: var_name })?;
        self.push(fiber_handle, value)
    }

    fn do_return(&mut self, fiber_handle: Handle) -> Result<(), RuntimeError> {
        let retval = self.pop(fiber_handle)?;
        let Some(Object::Fiber(fiber)) = self.heap.get_mut(fiber_handle) else { return Err(RuntimeError::StackOverflow) };
        let frame = fiber.pop_frame().ok_or(RuntimeError::StackOverflow)?;
        let receiver = fiber.stack.get(frame.base).copied();
        self.close_upvalues_from(fiber_handle, frame.base, None);
        if frame.pushed_super_adjust {
            if let Some(Value::Obj(h)) = receiver {
                if let Some(Object::Instance(inst)) = self.heap.get_mut(h) {
                    inst.super_adjust.pop();
                }
            }
        }
        let Some(Object::Fiber(fiber)) = self.heap.get_mut(fiber_handle) else { return Err(RuntimeError::StackOverflow) };
        fiber.truncate(frame.base);
        fiber.push(retval).map_err(|_| RuntimeError::StackOverflow)
    }

    // --- method dispatch ---

    /// Resolve and invoke a `Call_n`/`Super_n` opcode: fiber-control methods
    /// are intercepted ahead of the normal class-method-table lookup (the VM
    /// owns fiber scheduling, a `Primitive` body cannot reschedule itself),
    /// everything else resolves through [`Vm::find_method_rec`].
    fn call_or_super(&mut self, fiber_handle: Handle, op: Op) -> Result<(), RuntimeError> {
        let arity = op.call_arity().expect("call_or_super dispatched on a non-call opcode");
        let is_super = (op as u8) >= Op::Super0 as u8;
        let symbol = Symbol(u32::from(self.fetch_u16(fiber_handle)?));
        let superclass_index = if is_super { self.fetch_byte(fiber_handle)? } else { 0 };

        let nargs = arity as usize;
        let base = self.stack_len(fiber_handle)? - nargs - 1;
        let receiver = self.peek(fiber_handle, nargs)?;

        if !is_super && self.try_dispatch_fiber_control(fiber_handle, receiver, symbol, base, nargs)? {
            return Ok(());
        }
        if !is_super && self.try_dispatch_closure_call(fiber_handle, receiver, symbol, base, nargs)? {
            return Ok(());
        }
        if !is_super && self.try_dispatch_method_call(fiber_handle, receiver, symbol, base, nargs)? {
            return Ok(());
        }

        let (start_class, start_delta) = if is_super {
            let defining = self.frame_defining_class(fiber_handle)?;
            let defining_handle = defining.ok_or_else(|| self.method_not_found_error(receiver, symbol))?;
            match self.super_deltas(defining_handle, 0).get(superclass_index as usize) {
                Some(&(h, d)) => (Some(h), d),
                None => (None, 0),
            }
        } else {
            (self.core.class_of(&self.heap, receiver), 0)
        };
        let Some(start_class) = start_class else {
            return Err(self.method_not_found_error(receiver, symbol));
        };

        let Some((method, defining_class, delta)) = self.find_method_rec(start_class, symbol, start_delta) else {
            return Err(self.method_not_found_error(receiver, symbol));
        };

        match method {
            MethodImpl::None => Err(self.method_not_found_error(receiver, symbol)),
            MethodImpl::Primitive(id) => self.call_primitive(fiber_handle, id, base, nargs),
            MethodImpl::Foreign(id) => self.call_foreign(fiber_handle, id, base, nargs),
            MethodImpl::Block(closure) => {
                self.call_block(fiber_handle, closure, base, nargs, Some(defining_class), delta, receiver)
            }
        }
    }

    fn method_not_found_error(&self, receiver: Value, symbol: Symbol) -> RuntimeError {
        let class_name = self
            .core
            .class_of(&self.heap, receiver)
            .and_then(|h| self.heap.get(h))
            .map(|o| match o {
                Object::Class(c) => c.name.clone(),
                _ => receiver.type_name().to_string(),
            })
            .unwrap_or_else(|| receiver.type_name().to_string());
        let signature = self.realm.methods.name_of(symbol).unwrap_or("?").to_string();
        RuntimeError::MethodNotFound { class_name, signature }
    }

    /// For each of `class_handle`'s direct superclasses (primary first),
    /// the field-offset delta a method or field reached through that
    /// superclass needs on top of its own local offset: `delta` unchanged
    /// for the primary superclass (it starts at this class's own base
    /// offset), and the flattened position its fields begin at, relative to
    /// `class_handle`'s instance layout, for each secondary superclass.
    /// Shared by [`Vm::find_method_rec`]'s own recursion and by
    /// `call_or_super`'s `super.m()` dispatch, which needs the same
    /// per-superclass delta without re-walking from the receiver's dynamic
    /// class.
    fn super_deltas(&self, class_handle: Handle, delta: u32) -> Vec<(Handle, u32)> {
        let Some(Object::Class(class)) = self.heap.get(class_handle) else { return Vec::new() };

        let secondary_field_counts: Vec<u32> = class
            .supers
            .iter()
            .skip(1)
            .map(|&h| match self.heap.get(h) {
                Some(Object::Class(c)) => c.field_count,
                _ => 0,
            })
            .collect();
        let own_count =
            class.field_count - class.inherited_field_offset - secondary_field_counts.iter().sum::<u32>();
        let mut block_start = class.inherited_field_offset + own_count;

        class
            .supers
            .iter()
            .enumerate()
            .map(|(i, &super_handle)| {
                let child_delta = if i == 0 {
                    delta
                } else {
                    let d = delta + block_start;
                    block_start += secondary_field_counts[i - 1];
                    d
                };
                (super_handle, child_delta)
            })
            .collect()
    }

    /// Walk `class_handle`'s inheritance graph for `symbol`, primary
    /// superclass first. Returns the method, the class whose table it was
    /// found on, and the field-offset delta to push onto the receiver's
    /// `super_adjust` stack if the method was reached only through a
    /// secondary (non-primary) superclass.
    fn find_method_rec(&self, class_handle: Handle, symbol: Symbol, delta: u32) -> Option<(MethodImpl, Handle, u32)> {
        let Some(Object::Class(class)) = self.heap.get(class_handle) else { return None };
        if let Some(m) = class.method(symbol) {
            return Some((m.clone(), class_handle, delta));
        }

        for (super_handle, child_delta) in self.super_deltas(class_handle, delta) {
            if let Some(found) = self.find_method_rec(super_handle, symbol, child_delta) {
                return Some(found);
            }
        }
        None
    }

    fn call_primitive(&mut self, fiber_handle: Handle, id: u16, base: usize, nargs: usize) -> Result<(), RuntimeError> {
        let Some(primitive) = Primitive::from_u16(id) else { return Err(RuntimeError::InvalidOpcode(0)) };
        let Some(Object::Fiber(fiber)) = self.heap.get(fiber_handle) else { return Err(RuntimeError::StackOverflow) };
        let args: Vec<Value> = fiber.stack[base..=base + nargs].to_vec();

        let mut ctx = PrimitiveContext {
            heap: &mut self.heap,
            realm: &mut self.realm,
            args: &args,
            current_fiber: fiber_handle,
            print: Some(&mut *self.config.print),
        };
        let result = intrinsics::dispatch(primitive, &mut ctx);

        match result {
            PrimitiveResult::Value(v) => {
                let Some(Object::Fiber(fiber)) = self.heap.get_mut(fiber_handle) else {
                    return Err(RuntimeError::StackOverflow);
                };
                fiber.truncate(base);
                fiber.push(v).map_err(|_| RuntimeError::StackOverflow)
            }
            PrimitiveResult::Error(e) => Err(e),
            PrimitiveResult::RunFiber { .. } => unreachable!(
                "primitives never request a fiber switch; call/run/try/yield are special-cased ahead of dispatch in call_or_super"
            ),
        }
    }

    fn call_foreign(&mut self, fiber_handle: Handle, id: u32, base: usize, nargs: usize) -> Result<(), RuntimeError> {
        let Some(Object::Fiber(fiber)) = self.heap.get(fiber_handle) else { return Err(RuntimeError::StackOverflow) };
        let args: Vec<Value> = fiber.stack[base..=base + nargs].to_vec();
        let mut call_ctx = crate::realm::ForeignCallContext::new(&args);

        // Swap the callback out so it isn't borrowed from `realm` while it
        // runs; foreign methods never need to reenter the realm's own
        // foreign-method table.
        let mut callback = std::mem::replace(&mut self.realm.foreign_methods[id as usize], Box::new(|_| {}));
        callback(&mut call_ctx);
        self.realm.foreign_methods[id as usize] = callback;
        let result = call_ctx.result;

        let Some(Object::Fiber(fiber)) = self.heap.get_mut(fiber_handle) else { return Err(RuntimeError::StackOverflow) };
        fiber.truncate(base);
        fiber.push(result).map_err(|_| RuntimeError::StackOverflow)
    }

    #[allow(clippy::too_many_arguments)]
    fn call_block(
        &mut self,
        fiber_handle: Handle,
        closure: Handle,
        base: usize,
        nargs: usize,
        defining_class: Option<Handle>,
        delta: u32,
        receiver: Value,
    ) -> Result<(), RuntimeError> {
        let Some(Object::Closure(c)) = self.heap.get(closure) else { return Err(RuntimeError::StackOverflow) };
        let Some(Object::Fn(f)) = self.heap.get(c.function) else { return Err(RuntimeError::StackOverflow) };
        let expected = f.arity;
        if expected as usize != nargs {
            return Err(RuntimeError::ArityMismatch { expected, got: nargs as u8 });
        }

        let pushed_super_adjust = delta != 0;
        if pushed_super_adjust {
            if let Value::Obj(h) = receiver {
                if let Some(Object::Instance(inst)) = self.heap.get_mut(h) {
                    inst.super_adjust.push(delta);
                }
            }
        }

        let Some(Object::Fiber(fiber)) = self.heap.get_mut(fiber_handle) else { return Err(RuntimeError::StackOverflow) };
        fiber
            .push_frame(CallFrame { closure, ip: 0, base, pushed_super_adjust, defining_class })
            .map_err(|_| RuntimeError::StackOverflow)
    }

    /// Intercept `.call`/`.call(_)`/... on a bare `Fn`/`Closure` receiver:
    /// neither core class binds these to the method table (`bootstrap`'s
    /// comment on `Fn`), since invoking a closure is just pushing a frame for
    /// it directly rather than resolving anything by name. Not a method
    /// lookup at all, so this runs ahead of `find_method` the same way fiber
    /// control does.
    fn try_dispatch_closure_call(
        &mut self,
        fiber_handle: Handle,
        receiver: Value,
        symbol: Symbol,
        base: usize,
        nargs: usize,
    ) -> Result<bool, RuntimeError> {
        let Value::Obj(closure) = receiver else { return Ok(false) };
        if !matches!(self.heap.get(closure), Some(Object::Closure(_))) {
            return Ok(false);
        }
        let Some(name) = self.realm.methods.name_of(symbol) else { return Ok(false) };
        if name != "call" && !name.starts_with("call(") {
            return Ok(false);
        }

        self.call_block(fiber_handle, closure, base, nargs, None, 0, receiver)?;
        Ok(true)
    }

    /// Intercept `.call`/`.call(_)`/... on a `Method` receiver: a bound
    /// method redispatches against whatever class its stored receiver
    /// actually has, using its stored symbol, rather than resolving `call`
    /// against `Method`'s own method table. Mirrors the original's
    /// `callMethodCore`: the call's receiver slot is rewritten in place to
    /// the bound receiver before falling through to ordinary dispatch, so
    /// the callee sees exactly the stack shape a direct `receiver.m(...)`
    /// call would have produced.
    fn try_dispatch_method_call(
        &mut self,
        fiber_handle: Handle,
        receiver: Value,
        symbol: Symbol,
        base: usize,
        nargs: usize,
    ) -> Result<bool, RuntimeError> {
        let Value::Obj(method_handle) = receiver else { return Ok(false) };
        let Some(Object::Method(bound)) = self.heap.get(method_handle) else { return Ok(false) };
        let Some(name) = self.realm.methods.name_of(symbol) else { return Ok(false) };
        if name != "call" && !name.starts_with("call(") {
            return Ok(false);
        }
        if !bound.is_ready() {
            return Err(RuntimeError::NotCallable { type_name: "Method" });
        }
        let target_symbol = bound.symbol.expect("is_ready checked symbol");
        let target_receiver = bound.receiver.expect("is_ready checked receiver");

        if let Some(Object::Fiber(fiber)) = self.heap.get_mut(fiber_handle) {
            fiber.stack[base] = target_receiver;
        }

        let Some(start_class) = self.core.class_of(&self.heap, target_receiver) else {
            return Err(self.method_not_found_error(target_receiver, target_symbol));
        };
        let Some((method, defining_class, delta)) = self.find_method_rec(start_class, target_symbol, 0) else {
            return Err(self.method_not_found_error(target_receiver, target_symbol));
        };

        match method {
            MethodImpl::None => return Err(self.method_not_found_error(target_receiver, target_symbol)),
            MethodImpl::Primitive(id) => self.call_primitive(fiber_handle, id, base, nargs)?,
            MethodImpl::Foreign(id) => self.call_foreign(fiber_handle, id, base, nargs)?,
            MethodImpl::Block(closure) => {
                self.call_block(fiber_handle, closure, base, nargs, Some(defining_class), delta, target_receiver)?
            }
        }
        Ok(true)
    }

    // --- fiber control (`call`/`run`/`try`/`yield`/`transfer`) ---

    /// Intercept `Fiber` instance control methods and the static
    /// `Fiber.yield`/`yield(_)`, which aren't in `Fiber`'s method table at
    /// all ([`bootstrap::install`]'s comment on the `Fiber` class) because
    /// only the VM can switch which fiber is running. Returns `true` if
    /// `symbol` named one of these and the switch was performed.
    fn try_dispatch_fiber_control(
        &mut self,
        fiber_handle: Handle,
        receiver: Value,
        symbol: Symbol,
        base: usize,
        nargs: usize,
    ) -> Result<bool, RuntimeError> {
        let Some(name) = self.realm.methods.name_of(symbol) else { return Ok(false) };
        let name = name.to_string();

        let is_fiber_instance =
            matches!(receiver, Value::Obj(h) if matches!(self.heap.get(h), Some(Object::Fiber(_))));
        let is_fiber_class = receiver.as_obj() == Some(self.core.fiber);

        let mode = match name.as_str() {
            "call" | "call(_)" if is_fiber_instance => FiberMode::Call,
            "run" | "run(_)" if is_fiber_instance => FiberMode::Run,
            "try" | "try(_)" if is_fiber_instance => FiberMode::Try,
            "transfer" | "transfer(_)" if is_fiber_instance => FiberMode::Transfer,
            "yield" | "yield(_)" if is_fiber_class => FiberMode::Yield,
            _ => return Ok(false),
        };

        let transfer_value = if nargs == 1 { self.peek(fiber_handle, 0)? } else { Value::Null };

        let target = if mode == FiberMode::Yield {
            let Some(Object::Fiber(current)) = self.heap.get(fiber_handle) else {
                return Err(RuntimeError::StackOverflow);
            };
            current.caller.ok_or(RuntimeError::NotCallable { type_name: "Fiber" })?
        } else {
            receiver.as_obj().ok_or(RuntimeError::NotCallable { type_name: "Fiber" })?
        };

        self.switch_fiber(fiber_handle, target, mode, transfer_value, base, nargs)?;
        Ok(true)
    }

    /// Consume the call's receiver and arguments from `from`'s stack and
    /// hand control to `to`. `yield` delivers `transfer_value` straight onto
    /// the resumed caller's stack (finishing the `Fiber.yield(_)` call that
    /// suspended it, the same way an ordinary `RETURN` delivers a value
    /// into its caller); `call`/`run`/`try`/`transfer` start `to` fresh (if
    /// it's never run) or resume it the same way. `run` additionally
    /// tail-transfers `from`'s own caller chain onto `to` instead of
    /// pointing `to` back at `from` — `to`'s eventual `yield`/return
    /// resumes whoever was waiting on `from`, not `from` itself.
    fn switch_fiber(
        &mut self,
        from: Handle,
        to: Handle,
        mode: FiberMode,
        transfer_value: Value,
        base: usize,
        nargs: usize,
    ) -> Result<(), RuntimeError> {
        if let Some(Object::Fiber(f)) = self.heap.get_mut(from) {
            f.truncate(base);
        }

        if mode == FiberMode::Yield {
            if let Some(Object::Fiber(target)) = self.heap.get_mut(to) {
                target.status = FiberStatus::Running;
                target.push(transfer_value).map_err(|_| RuntimeError::StackOverflow)?;
            }
            if let Some(Object::Fiber(f)) = self.heap.get_mut(from) {
                f.status = FiberStatus::Suspended;
            }
            self.current = to;
            return Ok(());
        }

        let (status, entry) = match self.heap.get(to) {
            Some(Object::Fiber(f)) => (f.status, f.entry),
            _ => return Err(RuntimeError::NotCallable { type_name: "Fiber" }),
        };
        let new_caller = if mode == FiberMode::Run {
            match self.heap.get(from) {
                Some(Object::Fiber(f)) => f.caller,
                _ => None,
            }
        } else {
            Some(from)
        };
        if let Some(Object::Fiber(f)) = self.heap.get_mut(to) {
            f.caller = new_caller;
            f.called_with_try = mode == FiberMode::Try;
            f.status = FiberStatus::Running;
            f.entry = None;
        }

        self.current = to;
        if status == FiberStatus::New {
            let entry = entry.ok_or(RuntimeError::NotCallable { type_name: "Fiber" })?;
            let args = if nargs == 1 { vec![transfer_value] } else { Vec::new() };
            self.push_call(to, entry, &args)?;
        } else {
            self.push(to, transfer_value)?;
        }
        Ok(())
    }
}

/// `true` if `class` is `target` or inherits from it, transitively through
/// every declared superclass (not just the primary one).
fn is_subclass_of(heap: &Heap, class: Handle, target: Handle) -> bool {
    let mut seen = std::collections::HashSet::new();
    let mut frontier = vec![class];
    while let Some(h) = frontier.pop() {
        if h == target {
            return true;
        }
        if !seen.insert(h) {
            continue;
        }
        if let Some(Object::Class(c)) = heap.get(h) {
            frontier.extend(c.supers.iter().copied());
        }
    }
    false
}
