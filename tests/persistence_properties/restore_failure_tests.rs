//! A call that cannot be rebuilt fails alone and leaves nothing behind.

use crate::test_utils::*;
use relaystate::durability::RestoreError;
use relaystate::store::testing::StoredValue;
use std::sync::Arc;

fn persisted(store: &MemoryStore, ids: &[(&str, u16)], port: u16) {
    let intf = interfaces(port);
    let table = Arc::new(CallTable::new());
    let p = open(store, StorageMode::MultiKey, &table, &intf);
    for (id, first) in ids {
        let handle = register(&table, rich_call(&intf, id, *first, 1));
        assert!(p.persist(&handle).is_written());
    }
}

#[test]
fn test_missing_stream_record_fails_cleanly() {
    init_tracing();
    let store = MemoryStore::new();
    persisted(&store, &[("short", 38000)], 38000);
    // root still claims num_streams=2
    assert!(store.remove(0, "stream-short-1"));

    let table = Arc::new(CallTable::new());
    let intf = interfaces(38000);
    let p = open(&store, StorageMode::MultiKey, &table, &intf);
    let err = p.restore_one(&CallId::new("short"), CallType::Own).unwrap_err();
    assert!(matches!(err, RestoreError::Incomplete { .. }), "{}", err);
    assert!(table.lookup(&CallId::new("short")).is_none());

    // nothing was bound: the same ports are still free
    let lif = intf.lookup(None, AddressFamily::Ipv4).unwrap();
    assert!(Socket::bind(lif, 0, 38000).is_ok());
}

#[test]
fn test_taken_port_fails_only_that_call() {
    init_tracing();
    let store = MemoryStore::new();
    persisted(&store, &[("blocked", 38100), ("fine", 38110)], 38100);

    let table = Arc::new(CallTable::new());
    let intf = interfaces(38100);
    let lif = intf.lookup(None, AddressFamily::Ipv4).unwrap();
    let squatter = Socket::bind(lif, 0, 38100).unwrap();

    let p = open(&store, StorageMode::MultiKey, &table, &intf);
    let summary = p.restore_all().unwrap();
    assert_eq!(summary.listed, 2);
    assert_eq!(summary.restored, 1);
    assert_eq!(summary.failed, 1);
    assert!(table.lookup(&CallId::new("blocked")).is_none());
    assert_eq!(table.lookup(&CallId::new("fine")).unwrap().state().read().num_sockets(), 2);

    // own call that failed is purged from the store
    assert!(!store.exists(0, "call-blocked"));
    assert!(!store.exists(0, "sfd-blocked-0"));
    assert!(store.exists(0, "call-fine"));
    drop(squatter);
}

#[test]
fn test_store_error_on_shared_connection_fails_only_that_call() {
    init_tracing();
    let store = MemoryStore::new();
    persisted(&store, &[("wrong", 38400), ("next", 38410), ("last", 38420)], 38400);
    // LRANGE on a string key is an error reply, which drops the connection
    store.put(0, "payload_types-wrong-0", StoredValue::Str(b"garbage".to_vec()));

    let table = Arc::new(CallTable::new());
    let config = PersistConfig {
        restore_threads: 1,
        ..PersistConfig::default()
    };
    let p = Persistence::connect(config, store.connector(), Arc::clone(&table), interfaces(38400)).unwrap();
    let summary = p.restore_all().unwrap();
    assert_eq!(summary.listed, 3);
    assert_eq!(summary.restored, 2);
    assert_eq!(summary.failed, 1);
    assert!(table.lookup(&CallId::new("next")).is_some());
    assert!(table.lookup(&CallId::new("last")).is_some());
    assert!(table.lookup(&CallId::new("wrong")).is_none());

    assert!(!store.exists(0, "call-wrong"));
    assert!(!store.exists(0, "payload_types-wrong-0"));
    assert!(!store.members(0, "calls").unwrap().contains("wrong"));
}

#[test]
fn test_dangling_reference_is_link_error() {
    let store = MemoryStore::new();
    persisted(&store, &[("dangling", 38200)], 38200);
    store.set_field(0, "media-dangling-0", "tag", b"7");

    let table = Arc::new(CallTable::new());
    let intf = interfaces(38200);
    let p = open(&store, StorageMode::MultiKey, &table, &intf);
    let err = p.restore_one(&CallId::new("dangling"), CallType::Own).unwrap_err();
    assert!(matches!(err, RestoreError::Link { kind: "media", index: 0, .. }), "{}", err);
    assert!(table.is_empty());
}

#[test]
fn test_unknown_call_is_not_found() {
    let store = MemoryStore::new();
    let table = Arc::new(CallTable::new());
    let intf = interfaces(38300);
    let p = open(&store, StorageMode::Json, &table, &intf);
    let err = p.restore_one(&CallId::new("nobody"), CallType::Own).unwrap_err();
    assert!(matches!(err, RestoreError::NotFound));
    assert!(table.is_empty());
}
