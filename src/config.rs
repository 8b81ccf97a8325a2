// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Cardinal Authors

//! Embedder-facing configuration record (§6): the callbacks and ceilings a
//! host supplies when creating a `Vm`.

use std::path::PathBuf;

/// Event delivered to the debug callback before each instruction executes,
/// when debug mode is enabled (the `BREAK` opcode).
#[derive(Debug, Clone, Copy)]
pub struct DebugEvent {
    pub line: u32,
    pub ip: usize,
}

/// VM lifecycle and resource configuration. Matches the embedding API's
/// configuration record: `reallocate` is implicit (the `Heap` itself is the
/// reallocate primitive), everything else is here.
pub struct Configuration {
    pub print: Box<dyn FnMut(&str)>,
    pub load_module: Box<dyn FnMut(&str) -> Option<String>>,
    pub debug_callback: Option<Box<dyn FnMut(DebugEvent)>>,
    pub initial_heap_size: usize,
    pub min_heap_size: usize,
    pub heap_growth_percent: u32,
    pub root_directory: Option<PathBuf>,
    pub stack_max: usize,
    pub call_depth: usize,
}

impl Configuration {
    #[must_use]
    pub fn with_print(mut self, print: impl FnMut(&str) + 'static) -> Self {
        self.print = Box::new(print);
        self
    }

    #[must_use]
    pub fn with_load_module(mut self, load: impl FnMut(&str) -> Option<String> + 'static) -> Self {
        self.load_module = Box::new(load);
        self
    }

    #[must_use]
    pub fn with_debug_callback(mut self, cb: impl FnMut(DebugEvent) + 'static) -> Self {
        self.debug_callback = Some(Box::new(cb));
        self
    }

    #[must_use]
    pub fn with_root_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.root_directory = Some(dir.into());
        self
    }
}

impl Default for Configuration {
    /// The §6 defaults: 10 MiB initial heap, 1 MiB minimum, 50% growth
    /// (`nextGC = 1.5 × inUse`), 1 MiB stack, 255 call depth.
    fn default() -> Self {
        Self {
            print: Box::new(|s| print!("{s}")),
            load_module: Box::new(|_| None),
            debug_callback: None,
            initial_heap_size: 10 * 1024 * 1024,
            min_heap_size: 1024 * 1024,
            heap_growth_percent: 50,
            root_directory: None,
            stack_max: 1024 * 1024,
            call_depth: 255,
        }
    }
}
