// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Cardinal Authors

use super::*;

#[test]
fn loads_and_caches_a_module() {
    let mut cache = SourceCache::new();
    let mut calls = 0;
    let mut load = |name: &str| {
        calls += 1;
        (name == "greeter").then(|| "System.print(\"hi\")".to_string())
    };
    assert_eq!(cache.load("greeter", &mut load), Some("System.print(\"hi\")"));
    assert_eq!(cache.load("greeter", &mut load), Some("System.print(\"hi\")"));
    assert_eq!(calls, 1, "second load should hit the cache, not the callback");
}

#[test]
fn missing_module_reports_none_without_caching() {
    let mut cache = SourceCache::new();
    let mut load = |_: &str| None;
    assert_eq!(cache.load("missing", &mut load), None);
    assert_eq!(cache.load("missing", &mut load), None);
}

#[test]
fn invalidate_forces_a_reload() {
    let mut cache = SourceCache::new();
    let mut version = 0;
    let mut load = |_: &str| {
        version += 1;
        Some(format!("var v = {version}"))
    };
    assert_eq!(cache.load("m", &mut load), Some("var v = 1".to_string()).as_deref());
    cache.invalidate("m");
    assert_eq!(cache.load("m", &mut load), Some("var v = 2".to_string()).as_deref());
}
