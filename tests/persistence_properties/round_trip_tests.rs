//! Persist followed by a full rebuild yields the same graph.

use crate::test_utils::*;
use std::sync::Arc;

fn round_trip(mode: StorageMode, streams_per_media: usize, port: u16) {
    init_tracing();
    let store = MemoryStore::new();
    let intf = interfaces(port);
    let table = Arc::new(CallTable::new());
    let p = open(&store, mode, &table, &intf);
    let original = register(&table, rich_call(&intf, "rt", port, streams_per_media));
    assert!(p.persist(&original).is_written());

    let fresh_table = Arc::new(CallTable::new());
    let fresh_intf = interfaces(port);
    let restarted = open(&store, mode, &fresh_table, &fresh_intf);
    let summary = restarted.restore_all().unwrap();
    assert_eq!(summary.restored, 1, "mode {}", mode);

    let restored = fresh_table.lookup(&CallId::new("rt")).unwrap();
    assert_eq!(comparable_snapshot(&restored), comparable_snapshot(&original), "mode {}", mode);
}

#[test]
fn test_round_trip_multikey() {
    round_trip(StorageMode::MultiKey, 2, 36000);
}

#[test]
fn test_round_trip_json() {
    round_trip(StorageMode::Json, 2, 36100);
}

#[test]
fn test_round_trip_odd_stream_count() {
    round_trip(StorageMode::MultiKey, 3, 36200);
}

#[test]
fn test_restored_call_keeps_roles() {
    let store = MemoryStore::new();
    let intf = interfaces(36300);
    let table = Arc::new(CallTable::new());
    let p = open(&store, StorageMode::MultiKey, &table, &intf);
    let original = register(&table, rich_call(&intf, "roles", 36300, 2));
    assert!(p.persist(&original).is_written());

    let fresh_table = Arc::new(CallTable::new());
    let fresh_intf = interfaces(36300);
    let restarted = open(&store, StorageMode::MultiKey, &fresh_table, &fresh_intf);
    let handle = restarted.restore_one(&CallId::new("roles"), CallType::Own).unwrap();
    let call = handle.state().read();

    let from = call.find_tag("from-tag").unwrap();
    let to = call.find_tag("to-tag").unwrap();
    assert_eq!(call.tag(from).unwrap().active, Some(to));
    assert_eq!(call.tag(to).unwrap().active, Some(from));
    assert_eq!(call.tag(from).unwrap().via_branch.as_deref(), Some("z9hG4bK776asdhds"));

    let media = call.media(call.tag(from).unwrap().medias[0]).unwrap();
    assert_eq!(media.payload_types.len(), 3);
    assert_eq!(media.payload_types[&101].params, "1");
    assert_eq!(media.sdes_out.params.as_ref().unwrap().suite.name, "AES_256_CM_HMAC_SHA1_32");
    assert_eq!(media.fingerprint.as_ref().unwrap().digest, vec![0xab; 32]);

    let rtp = call.stream(media.streams[0]).unwrap();
    assert_eq!(rtp.rtcp_sibling, Some(media.streams[1]));
    let sock = call.socket(rtp.sfds[0]).unwrap();
    assert_eq!(sock.stream, Some(media.streams[0]));
    assert_eq!(sock.crypto.as_ref().unwrap().ssrc, 0xdead_0000);

    assert_eq!(call.recording, original.state().read().recording);
    assert_eq!(call.created_from_addr, Some("192.0.2.10:5060".parse().unwrap()));
    assert_eq!(call.tos, 46);
}
