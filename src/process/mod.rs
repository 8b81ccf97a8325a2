// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Cardinal Authors

//! Fiber: an independently scheduled execution context.
//!
//! A fiber owns a value stack and a call-frame stack, both `Vec`s grown
//! explicitly by [`push`](Fiber::push)/[`push_frame`](Fiber::push_frame)
//! rather than left to `Vec`'s own growth curve, matching the original's
//! distinct per-buffer growth factors. Because every stack slot is addressed
//! by index rather than by raw pointer, growing either `Vec` needs no
//! rebasing pass: indices stay valid across a reallocation by construction.
//! Open upvalues follow the same discipline — they name a `(fiber_id, slot)`
//! pair (see [`crate::value::object::Upvalue`]) instead of embedding a
//! pointer into the stack.

#[cfg(test)]
mod process_test;

use crate::value::{Handle, Value};

/// Fiber execution status, observable from script code via `Fiber` methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberStatus {
    /// Not yet started.
    New,
    /// Currently running or on the caller chain of the running fiber.
    Running,
    /// Suspended at a `yield`, resumable.
    Suspended,
    /// All frames returned normally.
    Finished,
    /// Terminated by an uncaught runtime error.
    Errored,
}

/// A saved call frame on a fiber's call stack.
#[derive(Debug, Clone)]
pub struct CallFrame {
    /// The running closure.
    pub closure: Handle,
    /// Instruction pointer into the closure's function's bytecode.
    pub ip: usize,
    /// Index into the fiber's value stack where this frame's locals begin
    /// (slot 0 is the receiver/`this`).
    pub base: usize,
    /// `true` if the receiver is an instance whose super-adjustment stack was
    /// pushed for this call; `RETURN` must pop it exactly once in that case.
    pub pushed_super_adjust: bool,
    /// The class whose method body this frame is executing, if it's a method
    /// (`None` for plain functions and the top-level script). Grounds both
    /// `LOAD_FIELD_THIS`/`STORE_FIELD_THIS` (via its `inherited_field_offset`)
    /// and `super.foo()` (which starts its search at this class's own
    /// superclass list, not the receiver's dynamic class).
    pub defining_class: Option<Handle>,
}

/// Value-stack growth factor, inherited from the original's
/// `STACKSIZE_GROW_FACTOR`. Smaller than the call-frame factor since value
/// stack slots vastly outnumber frames and over-growing wastes more memory.
const STACK_GROW_FACTOR: f64 = 1.7;
/// Call-frame stack growth factor, inherited from the original's
/// `CALLFRAME_GROW_FACTOR`.
const FRAME_GROW_FACTOR: f64 = 2.0;

/// The capacity a buffer should grow to from `current`, per `factor`. Always
/// grows by at least one slot so a zero-capacity buffer can get off the
/// ground.
fn grow_capacity(current: usize, factor: f64) -> usize {
    ((current as f64 * factor).ceil() as usize).max(current + 1)
}

static NEXT_FIBER_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);

#[derive(Debug, Clone)]
pub struct Fiber {
    pub id: u64,
    pub status: FiberStatus,

    /// The operand/local value stack. Locals, call arguments and expression
    /// temporaries all live here; frames address into it by `base`.
    pub stack: Vec<Value>,
    /// Active call frames, innermost last.
    pub frames: Vec<CallFrame>,

    /// The closure to start running on the first `call`/`run`, for a fiber
    /// that hasn't been started yet. Cleared once the fiber's initial frame
    /// is pushed.
    pub entry: Option<Handle>,
    /// The fiber that resumed this one via `call`/`run`/`try`, if any.
    pub caller: Option<Handle>,
    /// `true` if `caller` invoked this fiber with `try` (errors unwind to it
    /// instead of propagating further and aborting the program).
    pub called_with_try: bool,
    /// Set when the fiber terminates with an uncaught error: the `Exception`
    /// instance (or raw value passed to `abort`/`throw`).
    pub error: Option<Value>,

    /// Open upvalues capturing into this fiber's stack, sorted by descending
    /// slot index (innermost first) as the spec requires so closing a frame's
    /// locals only has to scan a prefix.
    pub open_upvalues: Vec<Handle>,

    pub stack_max: usize,
    pub call_depth_max: usize,
}

impl Fiber {
    #[must_use]
    pub fn new(stack_max: usize, call_depth_max: usize) -> Self {
        Self {
            id: NEXT_FIBER_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
            status: FiberStatus::New,
            stack: Vec::with_capacity(64),
            frames: Vec::with_capacity(16),
            entry: None,
            caller: None,
            called_with_try: false,
            error: None,
            open_upvalues: Vec::new(),
            stack_max,
            call_depth_max,
        }
    }

    pub fn push(&mut self, value: Value) -> Result<(), StackOverflow> {
        if self.stack.len() >= self.stack_max {
            return Err(StackOverflow);
        }
        if self.stack.len() == self.stack.capacity() {
            let target = grow_capacity(self.stack.capacity(), STACK_GROW_FACTOR);
            self.stack.reserve_exact(target - self.stack.capacity());
        }
        self.stack.push(value);
        Ok(())
    }

    pub fn pop(&mut self) -> Value {
        self.stack.pop().expect("pop from empty fiber stack")
    }

    #[must_use]
    pub fn peek(&self, distance_from_top: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance_from_top]
    }

    pub fn truncate(&mut self, new_len: usize) {
        self.stack.truncate(new_len);
    }

    pub fn push_frame(&mut self, frame: CallFrame) -> Result<(), StackOverflow> {
        if self.frames.len() >= self.call_depth_max {
            return Err(StackOverflow);
        }
        if self.frames.len() == self.frames.capacity() {
            let target = grow_capacity(self.frames.capacity(), FRAME_GROW_FACTOR);
            self.frames.reserve_exact(target - self.frames.capacity());
        }
        self.frames.push(frame);
        Ok(())
    }

    pub fn pop_frame(&mut self) -> Option<CallFrame> {
        self.frames.pop()
    }

    #[must_use]
    pub fn current_frame(&self) -> Option<&CallFrame> {
        self.frames.last()
    }

    #[must_use]
    pub fn current_frame_mut(&mut self) -> Option<&mut CallFrame> {
        self.frames.last_mut()
    }

    #[must_use]
    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackOverflow;
