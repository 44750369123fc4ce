// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;
use stoker_core::test_support::call_fixture;
use stoker_core::CallStatus;
use tempfile::TempDir;

fn call(id: u64) -> Call {
    Call::new(CallId(id), "execute", json!({"payload": "x".repeat(32)}), 1_000)
}

#[test]
fn create_writes_a_versioned_header() {
    let dir = TempDir::new().unwrap();
    let store = CallStore::create(dir.path(), 4096).unwrap();
    let header = store.read_header().unwrap();
    assert_eq!(header.version, STORE_VERSION);
    assert_eq!(header.allocated_bytes, 4096);
}

#[test]
fn attach_picks_up_capacity_from_header() {
    let dir = TempDir::new().unwrap();
    CallStore::create(dir.path(), 4096).unwrap();
    let store = CallStore::attach(dir.path()).unwrap();
    assert_eq!(store.capacity(), 4096);
}

#[test]
fn attach_rejects_non_object_header() {
    let dir = TempDir::new().unwrap();
    CallStore::create(dir.path(), 4096).unwrap();
    std::fs::write(dir.path().join("header.json"), "42").unwrap();

    assert!(matches!(
        CallStore::attach(dir.path()).unwrap_err(),
        TransportError::Corruption(_)
    ));
}

#[test]
fn attach_rejects_missing_header() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        CallStore::attach(dir.path()).unwrap_err(),
        TransportError::Corruption(_)
    ));
}

#[test]
fn write_read_remove_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = CallStore::create(dir.path(), 64 * 1024).unwrap();

    let mut original = call_fixture(2);
    store.write_call(&mut original).unwrap();
    assert!(original.size > 0);

    let loaded = store.read_call(CallId(2)).unwrap().unwrap();
    assert_eq!(loaded.id, original.id);
    assert_eq!(loaded.args, original.args);
    assert_eq!(loaded.size, original.size);

    store.remove_call(CallId(2)).unwrap();
    assert_eq!(store.read_call(CallId(2)).unwrap(), None);
    // Removing again is not an error
    store.remove_call(CallId(2)).unwrap();
}

#[test]
fn missing_slot_reads_none() {
    let dir = TempDir::new().unwrap();
    let store = CallStore::create(dir.path(), 4096).unwrap();
    assert_eq!(store.read_call(CallId(99)).unwrap(), None);
}

#[test]
fn capacity_is_enforced() {
    let dir = TempDir::new().unwrap();
    let store = CallStore::create(dir.path(), 300).unwrap();

    let mut first = call(2);
    store.write_call(&mut first).unwrap();

    let mut second = call(3);
    let err = store.write_call(&mut second).unwrap_err();
    assert!(matches!(err, TransportError::Capacity { .. }));
}

#[test]
fn rewriting_a_slot_accounts_the_delta_not_the_sum() {
    let dir = TempDir::new().unwrap();
    let store = CallStore::create(dir.path(), 250).unwrap();

    let mut call = call(2);
    store.write_call(&mut call).unwrap();
    // Rewriting the same slot must not double-count against capacity
    call.transition(CallStatus::Returned, 2_000).unwrap();
    call.result = Some(json!(9));
    call.args = None;
    store.write_call(&mut call).unwrap();
}

#[test]
fn live_calls_lists_sorted_and_skips_damage() {
    let dir = TempDir::new().unwrap();
    let store = CallStore::create(dir.path(), 64 * 1024).unwrap();

    for id in [5, 2, 9] {
        store.write_call(&mut call(id)).unwrap();
    }
    std::fs::write(dir.path().join("store").join("call-7.json"), "junk").unwrap();

    let live = store.live_calls().unwrap();
    let ids: Vec<u64> = live.iter().map(|c| c.id.as_u64()).collect();
    assert_eq!(ids, vec![2, 5, 9]);
}

#[test]
fn verify_round_trips() {
    let dir = TempDir::new().unwrap();
    let store = CallStore::create(dir.path(), 4096).unwrap();
    store.verify().unwrap();
}

#[test]
fn purge_removes_everything() {
    let dir = TempDir::new().unwrap();
    let pool = dir.path().join("pool");
    let store = CallStore::create(&pool, 4096).unwrap();
    store.write_call(&mut call(2)).unwrap();

    CallStore::purge(&pool).unwrap();
    assert!(!pool.exists());
    // Purging an absent directory is fine
    CallStore::purge(&pool).unwrap();
}
