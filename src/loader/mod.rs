// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Cardinal Authors

//! Module source loader: given a module name, produce its source text. The
//! real callback lives on [`crate::config::Configuration`]; this module adds
//! the cache the module subsystem requires ("the result is cached by the
//! module subsystem", §6) on top of it.

#[cfg(test)]
mod loader_test;

use std::collections::HashMap;

/// Caches loaded module source so a re-imported module name doesn't invoke
/// the embedder callback twice.
#[derive(Debug, Default)]
pub struct SourceCache {
    sources: HashMap<String, String>,
}

impl SourceCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `name`'s source, consulting the cache first and falling back to
    /// `load_module`. Returns `None` if neither has it ("module not found").
    pub fn load(
        &mut self,
        name: &str,
        load_module: &mut dyn FnMut(&str) -> Option<String>,
    ) -> Option<&str> {
        if !self.sources.contains_key(name) {
            let source = load_module(name)?;
            self.sources.insert(name.to_string(), source);
        }
        self.sources.get(name).map(String::as_str)
    }

    pub fn invalidate(&mut self, name: &str) {
        self.sources.remove(name);
    }
}
