// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Cardinal Authors

//! The memory manager: a generational arena plus a tri-color-conceptual,
//! single-mark-bit mark-and-sweep collector.
//!
//! Every heap object lives in one arena slot, addressed by a [`Handle`]
//! (index + generation). All allocation funnels through [`Heap::alloc`],
//! which is the one place the running byte counter is updated and compared
//! against `next_gc`; `stress_mode` makes every allocation a collection
//! point, matching the ancestor project's debug-build GC-stress switch.

#[cfg(test)]
mod heap_test;

use crate::value::object::{DestructorId, MethodImpl, Object, Upvalue};
use crate::value::{Handle, Value};

struct Slot {
    generation: u32,
    marked: bool,
    size: usize,
    object: Option<Object>,
}

pub struct Heap {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    bytes_in_use: usize,
    next_gc: usize,
    min_heap_size: usize,
    heap_growth_percent: u32,
    /// Temporary roots pinned around allocations that aren't reachable yet
    /// (e.g. a freshly allocated list before it's stored anywhere). Push
    /// before any allocation that might collect, pop once the new object is
    /// linked into a reachable structure.
    pin_stack: Vec<Handle>,
    pub stress_mode: bool,
    pub on_free_instance: Option<Box<dyn FnMut(DestructorId, &crate::value::object::Instance)>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CollectStats {
    pub freed: usize,
    pub bytes_freed: usize,
    pub bytes_in_use_after: usize,
}

impl Heap {
    #[must_use]
    pub fn new(initial_heap_size: usize, min_heap_size: usize, heap_growth_percent: u32) -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            bytes_in_use: 0,
            next_gc: initial_heap_size,
            min_heap_size,
            heap_growth_percent,
            pin_stack: Vec::new(),
            stress_mode: false,
            on_free_instance: None,
        }
    }

    #[must_use]
    pub const fn bytes_in_use(&self) -> usize {
        self.bytes_in_use
    }

    #[must_use]
    pub const fn next_gc(&self) -> usize {
        self.next_gc
    }

    pub fn pin(&mut self, handle: Handle) {
        self.pin_stack.push(handle);
    }

    pub fn unpin(&mut self) {
        self.pin_stack.pop();
    }

    /// Allocate a new object, returning its handle. `extra_roots` is the
    /// caller's live root set (current fiber, module table, handle table) used
    /// if the allocation counter crosses `next_gc` and a collection runs.
    pub fn alloc(&mut self, object: Object, extra_roots: &[Handle]) -> Handle {
        let size = object_size(&object);
        self.bytes_in_use += size;

        if self.stress_mode || self.bytes_in_use > self.next_gc {
            self.collect(extra_roots);
        }

        let handle = if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.object = Some(object);
            slot.size = size;
            slot.marked = false;
            Handle::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot { generation: 0, marked: false, size, object: Some(object) });
            Handle::new(index, 0)
        };
        handle
    }

    #[must_use]
    pub fn get(&self, handle: Handle) -> Option<&Object> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.object.as_ref()
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut Object> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.object.as_mut()
    }

    /// Run a full mark-and-sweep collection. `roots` are handles reachable
    /// from outside the arena: the current fiber, every module, the pinned
    /// handle table, and anything on the internal pin stack.
    pub fn collect(&mut self, roots: &[Handle]) -> CollectStats {
        for slot in &mut self.slots {
            slot.marked = false;
        }

        let mut worklist: Vec<Handle> = Vec::new();
        let seeds: Vec<Handle> = roots.iter().chain(self.pin_stack.iter()).copied().collect();
        for root in seeds {
            self.mark_seed(root, &mut worklist);
        }
        while let Some(handle) = worklist.pop() {
            self.trace(handle, &mut worklist);
        }

        let mut freed = 0usize;
        let mut bytes_freed = 0usize;
        for index in 0..self.slots.len() {
            let should_sweep = self.slots[index].object.is_some() && !self.slots[index].marked;
            if !should_sweep {
                continue;
            }
            let destructor_id = if let Some(Object::Instance(instance)) = &self.slots[index].object {
                destructor_of(&self.slots, instance.class)
            } else {
                None
            };
            if let Some(destructor_id) = destructor_id {
                if let Some(cb) = &mut self.on_free_instance {
                    let Some(Object::Instance(instance)) = &self.slots[index].object else {
                        unreachable!()
                    };
                    cb(destructor_id, instance);
                }
            }
            let slot = &mut self.slots[index];
            slot.object = None;
            slot.generation = slot.generation.wrapping_add(1);
            bytes_freed += slot.size;
            slot.size = 0;
            freed += 1;
            self.free_list.push(index as u32);
        }

        self.bytes_in_use = self.bytes_in_use.saturating_sub(bytes_freed);
        self.next_gc = self
            .min_heap_size
            .max(self.bytes_in_use * (100 + self.heap_growth_percent as usize) / 100);

        CollectStats { freed, bytes_freed, bytes_in_use_after: self.bytes_in_use }
    }

    fn mark_seed(&mut self, handle: Handle, worklist: &mut Vec<Handle>) {
        if let Some(slot) = self.slots.get_mut(handle.index as usize) {
            if slot.generation == handle.generation && !slot.marked {
                slot.marked = true;
                worklist.push(handle);
            }
        }
    }

    fn mark_value(&mut self, value: Value, worklist: &mut Vec<Handle>) {
        if let Value::Obj(h) = value {
            self.mark_seed(h, worklist);
        }
    }

    /// Visit the handles referenced directly by `handle`'s object, marking
    /// and enqueuing the ones not yet seen. This is the "object-specific
    /// marking" step; it also folds freshly-discovered sizes in implicitly
    /// since sizes are already accounted at allocation time.
    fn trace(&mut self, handle: Handle, worklist: &mut Vec<Handle>) {
        let Some(slot) = self.slots.get(handle.index as usize) else { return };
        let Some(object) = &slot.object else { return };

        // Collect the referenced handles/values first (immutable borrow),
        // then mark them (mutable borrow) to keep the borrow checker happy
        // without cloning the whole object.
        let mut child_handles: Vec<Handle> = Vec::new();
        let mut child_values: Vec<Value> = Vec::new();

        match object {
            Object::Str(_) | Object::Range(_) => {}
            Object::List(items) => child_values.extend(items.iter().copied()),
            Object::Map(map) => {
                for entry in map.entries.iter().flatten() {
                    child_values.push(entry.key);
                    child_values.push(entry.value);
                }
            }
            Object::Fn(f) => {
                child_values.extend(f.chunk.constants.iter().copied());
                child_handles.push(f.module);
            }
            Object::Closure(c) => {
                child_handles.push(c.function);
                child_handles.extend(c.upvalues.iter().copied());
            }
            Object::Upvalue(Upvalue::Closed(v)) => child_values.push(*v),
            Object::Upvalue(Upvalue::Open { .. }) => {}
            Object::Fiber(fiber) => {
                child_values.extend(fiber.stack.iter().copied());
                for frame in &fiber.frames {
                    child_handles.push(frame.closure);
                }
                if let Some(caller) = fiber.caller {
                    child_handles.push(caller);
                }
                if let Some(err) = fiber.error {
                    child_values.push(err);
                }
                child_handles.extend(fiber.open_upvalues.iter().copied());
            }
            Object::Class(class) => {
                child_handles.extend(class.supers.iter().copied());
                if let Some(mc) = class.metaclass {
                    child_handles.push(mc);
                }
                for m in &class.methods {
                    if let MethodImpl::Block(h) = m {
                        child_handles.push(*h);
                    }
                }
            }
            Object::Instance(instance) => {
                child_handles.push(instance.class);
                child_values.extend(instance.fields.iter().copied());
            }
            Object::Module(module) => {
                if let Some(body) = module.body {
                    child_handles.push(body);
                }
                child_values.extend(module.vars.iter().copied());
            }
            Object::Method(m) => {
                if let Some(r) = m.receiver {
                    child_values.push(r);
                }
            }
        }

        for h in child_handles {
            self.mark_seed(h, worklist);
        }
        for v in child_values {
            self.mark_value(v, worklist);
        }
    }

    /// Content-aware equality: strings and ranges compare by value, every
    /// other object kind by identity (same handle).
    #[must_use]
    pub fn values_equal(&self, a: Value, b: Value) -> bool {
        match (a, b) {
            (Value::Obj(ha), Value::Obj(hb)) => {
                if ha == hb {
                    return true;
                }
                match (self.get(ha), self.get(hb)) {
                    (Some(Object::Str(sa)), Some(Object::Str(sb))) => sa.bytes == sb.bytes,
                    (Some(Object::Range(ra)), Some(Object::Range(rb))) => {
                        ra.from == rb.from && ra.to == rb.to && ra.inclusive == rb.inclusive
                    }
                    _ => false,
                }
            }
            _ => a.identity_eq(&b),
        }
    }

    /// Render a value as a script-visible string, recursing into heap
    /// objects. Used by `System.print` and `toString`.
    #[must_use]
    pub fn print_value(&self, value: Value) -> String {
        match value {
            Value::Obj(h) => match self.get(h) {
                Some(Object::Str(s)) => s.as_str().to_string(),
                Some(Object::List(items)) => {
                    let parts: Vec<String> = items.iter().map(|v| self.print_value(*v)).collect();
                    format!("[{}]", parts.join(", "))
                }
                Some(Object::Map(map)) => {
                    let parts: Vec<String> = map
                        .entries
                        .iter()
                        .flatten()
                        .map(|e| format!("{}: {}", self.print_value(e.key), self.print_value(e.value)))
                        .collect();
                    format!("{{{}}}", parts.join(", "))
                }
                Some(Object::Range(r)) => {
                    format!("{}{}{}", r.from, if r.inclusive { "..." } else { ".." }, r.to)
                }
                Some(Object::Class(c)) => c.name.clone(),
                Some(Object::Instance(inst)) => match self.get(inst.class) {
                    Some(Object::Class(c)) => format!("instance of {}", c.name),
                    _ => "instance".to_string(),
                },
                Some(other) => format!("<{}>", other.type_name()),
                None => "<freed>".to_string(),
            },
            other => other.to_string(),
        }
    }
}

fn destructor_of(slots: &[Slot], class_handle: Handle) -> Option<DestructorId> {
    let slot = slots.get(class_handle.index as usize)?;
    if let Some(Object::Class(class)) = &slot.object {
        return class.foreign_destructor;
    }
    None
}

/// A coarse per-kind size estimate, used only to drive the GC's growth
/// policy (not an exact memory accounting).
fn object_size(object: &Object) -> usize {
    match object {
        Object::Str(s) => 32 + s.bytes.len(),
        Object::List(items) => 24 + items.len() * 16,
        Object::Map(map) => 24 + map.entries.len() * 40,
        Object::Range(_) => 24,
        Object::Fn(f) => 64 + f.chunk.code.len() + f.chunk.constants.len() * 16,
        Object::Closure(c) => 24 + c.upvalues.len() * 8,
        Object::Upvalue(_) => 24,
        Object::Fiber(f) => 64 + f.stack.len() * 16 + f.frames.len() * 32,
        Object::Class(c) => 64 + c.methods.len() * 16 + c.supers.len() * 8,
        Object::Instance(inst) => 24 + inst.fields.len() * 16,
        Object::Module(m) => 48 + m.vars.len() * 16,
        Object::Method(_) => 32,
    }
}
