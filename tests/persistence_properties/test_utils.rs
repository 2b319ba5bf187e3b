//! Shared fixtures for the property suite.

#![allow(dead_code)]

pub use relaystate::core::{
    AddressFamily, Call, CallHandle, CallId, CallTable, CallType, CryptoContext, CryptoParams, CryptoSuite,
    DtlsFingerprint, EndpointMap, HashFunc, InterfaceRegistry, InterfaceTable, Media, PayloadType,
    Recording, SessionParams, Socket, SocketId, Stream, StreamId, Tag, TransportProtocol,
};
pub use relaystate::durability::{CallSnapshot, StorageMode};
pub use relaystate::engine::{NotifyConfig, PersistConfig, Persistence, StoreConfig};
pub use relaystate::store::testing::MemoryStore;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};

static TRACING: Once = Once::new();

/// Route logs through the test writer once per process.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

/// One logical interface "default" with two local addresses.
pub fn interfaces(min: u16) -> Arc<InterfaceTable> {
    Arc::new(InterfaceTable::new().with_interface(
        "default",
        AddressFamily::Ipv4,
        &[IpAddr::V4(Ipv4Addr::LOCALHOST), IpAddr::V4(Ipv4Addr::new(127, 0, 0, 2))],
        min,
        min + 499,
    ))
}

fn sdes(suite: &str, fill: u8) -> CryptoParams {
    let mut params = CryptoParams::new(CryptoSuite::find(suite).unwrap());
    let key_len = params.suite.master_key_len;
    params.master_key[..key_len].fill(fill);
    params.master_salt.fill(fill.wrapping_add(1));
    params.mki = Some(vec![1, 2]);
    params.session = SessionParams {
        unencrypted_srtp: false,
        unencrypted_srtcp: true,
        unauthenticated_srtp: false,
    };
    params
}

/// A fully populated call: two legs, `streams_per_media` streams per
/// media section (RTP/RTCP paired when even), one socket per stream,
/// SDES crypto, a DTLS fingerprint, payload types, recording metadata and
/// one endpoint map spanning both local interfaces.
///
/// Sockets take ports `first_port..`.
pub fn rich_call(intf: &InterfaceTable, id: &str, first_port: u16, streams_per_media: usize) -> Call {
    let lif = intf.lookup(None, AddressFamily::Ipv4).unwrap();
    let mut call = Call::new(CallId::new(id), 1_700_000_000);
    call.last_signal = Some(1_700_000_050);
    call.tos = 46;
    call.ml_deleted = 1_700_000_040;
    call.created_from = Some("192.0.2.10:5060".to_string());
    call.created_from_addr = Some("192.0.2.10:5060".parse().unwrap());
    call.recording = Some(Recording {
        meta_prefix: format!("{}-rec", id),
        metadata: Some("caller=alice".to_string()),
    });

    let mut from = Tag::new(Some("from-tag"), 1_700_000_000);
    from.via_branch = Some("z9hG4bK776asdhds".to_string());
    let a = call.add_tag(from);
    let b = call.add_tag(Tag::new(Some("to-tag"), 1_700_000_010));
    call.pair_tags(a, b).unwrap();

    let mut port = first_port;
    let mut medias = Vec::new();
    for (n, tag) in [a, b].into_iter().enumerate() {
        let mut media = Media::new("audio", 1);
        media.protocol = TransportProtocol::from_name("RTP/SAVP");
        media.desired_family = Some(AddressFamily::Ipv4);
        media.logical_intf = Some(Arc::clone(&lif));
        media.media_flags = 0x11;
        media.sdes_in.tag = 1;
        media.sdes_in.params = Some(sdes("AES_CM_128_HMAC_SHA1_80", 0x10 + n as u8));
        media.sdes_out.tag = 2;
        media.sdes_out.params = Some(sdes("AES_256_CM_HMAC_SHA1_32", 0x20 + n as u8));
        media.fingerprint = Some(DtlsFingerprint {
            hash_func: HashFunc::find("sha-256").unwrap(),
            digest: vec![0xab; 32],
        });
        for (pt, enc) in [(0, "PCMU"), (8, "PCMA"), (101, "telephone-event")] {
            media.add_payload_type(PayloadType {
                payload_type: pt,
                encoding: enc.to_string(),
                clock_rate: 8000,
                params: if pt == 101 { "1".to_string() } else { String::new() },
            });
        }
        let media = call.add_media(tag, media).unwrap();
        medias.push(media);

        let mut streams = Vec::new();
        for s in 0..streams_per_media {
            let mut stream = Stream::default();
            stream.component = 1 + (s % 2) as u32;
            stream.endpoint = format!("198.51.100.{}:{}", 10 + n, 30000 + s).parse().unwrap();
            stream.stats.packets = 100 + s as u64;
            stream.stats.bytes = 16_000;
            let sid = call.add_stream(media, stream).unwrap();
            let mut sock = Socket::bind(Arc::clone(&lif), (s % 2) as u32, port).unwrap();
            port += 1;
            sock.crypto = Some(CryptoContext {
                params: sdes("AES_CM_128_HMAC_SHA1_80", 0x30 + s as u8),
                last_index: 1000 + s as u64,
                ssrc: 0xdead_0000 + s as u32,
            });
            call.add_socket(sid, sock).unwrap();
            streams.push(sid);
        }
        for pair in streams.chunks(2) {
            if let [rtp, rtcp] = pair {
                call.pair_rtcp(*rtp, *rtcp).unwrap();
            }
        }
    }

    let map = call
        .add_map(medias[0], EndpointMap::new(lif, "203.0.113.50:40000".parse().unwrap(), 2))
        .unwrap();
    let sockets: Vec<SocketId> = call.sockets().map(|(id, _)| id).take(2).collect();
    for sock in sockets {
        call.map_socket(map, sock).unwrap();
    }
    call
}

/// Register `call` in `table` as an own call.
pub fn register(table: &CallTable, call: Call) -> Arc<CallHandle> {
    let (handle, _) = table.create_or_get(&call.id.clone(), CallType::Own);
    handle.state().write().replace_with(call);
    handle
}

/// Persistence over `store` with short retention and two restore threads.
pub fn open(
    store: &MemoryStore,
    mode: StorageMode,
    table: &Arc<CallTable>,
    intf: &Arc<InterfaceTable>,
) -> Persistence {
    let config = PersistConfig {
        mode,
        expires_secs: 3600,
        restore_threads: 2,
        ..PersistConfig::default()
    };
    let intf: Arc<dyn InterfaceRegistry> = Arc::clone(intf) as Arc<dyn InterfaceRegistry>;
    Persistence::connect(config, store.connector(), Arc::clone(table), intf).unwrap()
}

/// Snapshot with fields that restore deliberately resets zeroed out.
pub fn comparable_snapshot(handle: &CallHandle) -> CallSnapshot {
    let mut call = handle.state().write();
    let ids: Vec<StreamId> = call.streams().map(|(id, _)| id).collect();
    for id in ids {
        if let Some(stream) = call.stream_mut(id) {
            stream.last_packet = 0;
        }
    }
    CallSnapshot::capture(&call, handle.hosted_db())
}

/// Poll `cond` until it holds or five seconds pass.
pub fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(20));
    }
}
