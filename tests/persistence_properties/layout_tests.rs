//! Stored layout: idempotence, truncation on shrink, keys and TTLs.

use crate::test_utils::*;
use std::sync::Arc;

#[test]
fn test_persist_is_idempotent() {
    for (mode, port) in [(StorageMode::MultiKey, 37000), (StorageMode::Json, 37100)] {
        let store = MemoryStore::new();
        let intf = interfaces(port);
        let table = Arc::new(CallTable::new());
        let p = open(&store, mode, &table, &intf);
        let handle = register(&table, rich_call(&intf, "idem", port, 2));

        assert!(p.persist(&handle).is_written());
        let first = store.dump(0);
        assert!(p.persist(&handle).is_written());
        assert_eq!(store.dump(0), first, "mode {}", mode);
    }
}

#[test]
fn test_shrink_from_three_streams_to_one() {
    let store = MemoryStore::new();
    let intf = interfaces(37200);
    let table = Arc::new(CallTable::new());
    let p = open(&store, StorageMode::MultiKey, &table, &intf);
    let handle = register(&table, rich_call(&intf, "shrink", 37200, 3));
    assert!(p.persist(&handle).is_written());
    assert!(store.exists(0, "stream-shrink-5"));

    {
        let mut call = handle.state().write();
        let extra: Vec<StreamId> = call.streams().map(|(id, _)| id).skip(1).collect();
        for id in extra {
            call.remove_stream(id).unwrap();
        }
        assert_eq!(call.num_streams(), 1);
    }
    assert!(p.persist(&handle).is_written());

    assert!(store.exists(0, "stream-shrink-0"));
    assert!(store.exists(0, "sfd-shrink-0"));
    for n in 1..6 {
        assert!(!store.exists(0, &format!("stream-shrink-{}", n)), "stream {} left", n);
        assert!(!store.exists(0, &format!("stream_sfds-shrink-{}", n)), "stream_sfds {} left", n);
        assert!(!store.exists(0, &format!("sfd-shrink-{}", n)), "sfd {} left", n);
    }
    let root = store.hash(0, "call-shrink").unwrap();
    assert_eq!(root["num_streams"], b"1".to_vec());
}

#[test]
fn test_multikey_layout() {
    let store = MemoryStore::new();
    let intf = interfaces(37300);
    let table = Arc::new(CallTable::new());
    let p = open(&store, StorageMode::MultiKey, &table, &intf);
    let handle = register(&table, rich_call(&intf, "lay", 37300, 2));
    assert!(p.persist(&handle).is_written());

    assert!(store.members(0, "calls").unwrap().contains("lay"));
    assert!(store.members(0, "notifier-lay").unwrap().contains("lay"));
    for key in [
        "call-lay",
        "sfd-lay-3",
        "stream-lay-3",
        "stream_sfds-lay-0",
        "tag-lay-1",
        "other_tags-lay-0",
        "medias-lay-1",
        "media-lay-1",
        "streams-lay-0",
        "maps-lay-0",
        "payload_types-lay-1",
        "map-lay-0",
        "map_sfds-lay-0",
    ] {
        assert!(store.exists(0, key), "{} missing", key);
        assert_eq!(store.ttl(0, key), Some(3600), "{} ttl", key);
    }
    assert!(!store.exists(0, "sfd-lay-4"));
    assert!(!store.exists(0, "json-lay"));
}

#[test]
fn test_json_layout() {
    let store = MemoryStore::new();
    let intf = interfaces(37400);
    let table = Arc::new(CallTable::new());
    let p = open(&store, StorageMode::Json, &table, &intf);
    let handle = register(&table, rich_call(&intf, "doc", 37400, 2));
    assert!(p.persist(&handle).is_written());

    assert_eq!(store.keys(0), vec!["json-doc".to_string()]);
    assert_eq!(store.ttl(0, "json-doc"), Some(3600));
}
