// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Cardinal Authors

use super::*;

#[test]
fn interning_a_signature_twice_returns_the_same_symbol() {
    let mut methods = MethodTable::default();
    let a = methods.intern("+(_)");
    let b = methods.intern("+(_)");
    assert_eq!(a, b);
    assert_eq!(methods.name_of(a), Some("+(_)"));
}

#[test]
fn distinct_signatures_get_distinct_symbols() {
    let mut methods = MethodTable::default();
    let a = methods.intern("+(_)");
    let b = methods.intern("-(_)");
    assert_ne!(a, b);
}

#[test]
fn lookup_of_unseen_signature_is_none() {
    let methods = MethodTable::default();
    assert_eq!(methods.lookup("never seen"), None);
}

#[test]
fn module_table_round_trips() {
    let mut modules = ModuleTable::default();
    let handle = Handle::new(3, 0);
    modules.insert("core", handle);
    assert_eq!(modules.get("core"), Some(handle));
    assert_eq!(modules.get("missing"), None);
}

#[test]
fn embedder_handles_reuse_released_slots() {
    let mut handles = HandleTable::default();
    let a = handles.acquire(Value::Num(1.0));
    handles.release(a);
    let b = handles.acquire(Value::Num(2.0));
    assert_eq!(a, b, "released slot should be reused rather than growing the table");
    assert_eq!(handles.get(b).unwrap().as_num(), Some(2.0));
}

#[test]
fn released_handle_reads_as_none() {
    let mut handles = HandleTable::default();
    let handle = handles.acquire(Value::Num(9.0));
    handles.release(handle);
    assert!(handles.get(handle).is_none());
}

#[test]
fn roots_include_modules_and_live_object_handles() {
    let mut realm = Realm::new();
    let module_handle = Handle::new(1, 0);
    realm.modules.insert("main", module_handle);
    let obj_handle = Handle::new(2, 0);
    let embedder = realm.handles.acquire(Value::Obj(obj_handle));
    realm.handles.acquire(Value::Num(5.0));
    let roots = realm.roots();
    assert!(roots.contains(&module_handle));
    assert!(roots.contains(&obj_handle));
    let _ = embedder;
}
