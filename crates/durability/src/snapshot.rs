//! Call snapshot capture
//!
//! Walks a live [`Call`] under its read lock and produces the complete set
//! of records a persist writes: the root hash plus, per entity kind in
//! write order, one hash and its lists per entity.
//!
//! ## Surrogate indices
//!
//! Entity ids are not persisted. Each entity is numbered by its position in
//! id order at capture time, and every cross-reference is written as that
//! position. Restore rebuilds entities in the same order, so the index of
//! an entity becomes its id in the restored call.
//!
//! Capture touches no store state.

use crate::keys::EntityKind;
use crate::record::{format_local_marker, format_payload_token, HashRecord};
use relaystate_core::{Call, CallId, CryptoContext, CryptoParams};
use rustc_hash::FxHashMap;

/// Records of one entity: its hash and its lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRecord {
    /// Scalar fields
    pub hash: HashRecord,
    /// `(list prefix, values)`, one per list of the kind, possibly empty
    pub lists: Vec<(&'static str, Vec<Vec<u8>>)>,
}

impl EntityRecord {
    fn new(hash: HashRecord) -> Self {
        EntityRecord {
            hash,
            lists: Vec::new(),
        }
    }

    fn with_list(mut self, prefix: &'static str, values: Vec<Vec<u8>>) -> Self {
        self.lists.push((prefix, values));
        self
    }
}

/// All records of one entity kind, indexed by surrogate id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindRecords {
    /// Entity kind
    pub kind: EntityKind,
    /// Records, position is the surrogate index
    pub items: Vec<EntityRecord>,
}

/// Everything persisted for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSnapshot {
    /// Call id
    pub id: CallId,
    /// Root hash
    pub root: HashRecord,
    /// Entity records in write order
    pub kinds: Vec<KindRecords>,
}

impl CallSnapshot {
    /// Capture `call` as it will be stored in database `hosted_db`.
    pub fn capture(call: &Call, hosted_db: u32) -> Self {
        let ix = Surrogates::new(call);
        let kinds = EntityKind::WRITE_ORDER
            .iter()
            .map(|&kind| KindRecords {
                kind,
                items: match kind {
                    EntityKind::Socket => capture_sockets(call, &ix),
                    EntityKind::Stream => capture_streams(call, &ix),
                    EntityKind::Tag => capture_tags(call, &ix),
                    EntityKind::Media => capture_medias(call, &ix),
                    EntityKind::Map => capture_maps(call, &ix),
                },
            })
            .collect();
        CallSnapshot {
            id: call.id.clone(),
            root: capture_root(call, hosted_db),
            kinds,
        }
    }

    /// Records of `kind`.
    pub fn records(&self, kind: EntityKind) -> &[EntityRecord] {
        self.kinds
            .iter()
            .find(|k| k.kind == kind)
            .map(|k| k.items.as_slice())
            .unwrap_or(&[])
    }

    /// Number of entities of `kind`.
    pub fn count(&self, kind: EntityKind) -> u32 {
        self.records(kind).len() as u32
    }
}

/// Id → position maps for every kind.
struct Surrogates {
    sockets: FxHashMap<u32, u32>,
    streams: FxHashMap<u32, u32>,
    tags: FxHashMap<u32, u32>,
    medias: FxHashMap<u32, u32>,
    maps: FxHashMap<u32, u32>,
}

fn positions(ids: impl Iterator<Item = u32>) -> FxHashMap<u32, u32> {
    ids.enumerate().map(|(pos, id)| (id, pos as u32)).collect()
}

impl Surrogates {
    fn new(call: &Call) -> Self {
        Surrogates {
            sockets: positions(call.sockets().map(|(id, _)| id.0)),
            streams: positions(call.streams().map(|(id, _)| id.0)),
            tags: positions(call.tags().map(|(id, _)| id.0)),
            medias: positions(call.medias().map(|(id, _)| id.0)),
            maps: positions(call.maps().map(|(id, _)| id.0)),
        }
    }
}

fn lookup(map: &FxHashMap<u32, u32>, id: Option<u32>) -> Option<u32> {
    id.and_then(|id| map.get(&id).copied())
}

/// Positions of `ids`, dropping ids that no longer resolve.
fn index_list(map: &FxHashMap<u32, u32>, ids: impl Iterator<Item = u32>) -> Vec<Vec<u8>> {
    ids.filter_map(|id| map.get(&id))
        .map(|pos| pos.to_string().into_bytes())
        .collect()
}

fn capture_root(call: &Call, hosted_db: u32) -> HashRecord {
    let mut r = HashRecord::new();
    r.put("created", call.created);
    // -1 marks a call that was never signaled
    r.put("last_signal", call.last_signal.unwrap_or(-1));
    r.put("tos", call.tos);
    r.put("deleted", call.deleted);
    r.put("ml_deleted", call.ml_deleted);
    r.put(EntityKind::Socket.count_field(), call.num_sockets());
    r.put(EntityKind::Stream.count_field(), call.num_streams());
    r.put(EntityKind::Tag.count_field(), call.num_tags());
    r.put(EntityKind::Media.count_field(), call.num_medias());
    r.put(EntityKind::Map.count_field(), call.num_maps());
    if let Some(from) = &call.created_from {
        r.put("created_from", from);
    }
    if let Some(addr) = &call.created_from_addr {
        r.put("created_from_addr", addr);
    }
    r.put("hosted_db", hosted_db);
    if let Some(rec) = &call.recording {
        r.put("recording_meta_prefix", &rec.meta_prefix);
        if let Some(meta) = &rec.metadata {
            r.put("recording_metadata", meta);
        }
    }
    r
}

fn put_params(r: &mut HashRecord, prefix: &str, p: &CryptoParams) {
    r.put(format!("{prefix}crypto_suite"), p.suite.name);
    r.put_bytes(format!("{prefix}master_key"), p.master_key.to_vec());
    r.put_bytes(format!("{prefix}master_salt"), p.master_salt.to_vec());
    if let Some(mki) = &p.mki {
        r.put_bytes(format!("{prefix}mki"), mki.clone());
    }
    r.put_bool(format!("{prefix}unenc-srtp"), p.session.unencrypted_srtp);
    r.put_bool(format!("{prefix}unenc-srtcp"), p.session.unencrypted_srtcp);
    r.put_bool(format!("{prefix}unauth-srtp"), p.session.unauthenticated_srtp);
}

fn put_context(r: &mut HashRecord, ctx: &Option<CryptoContext>) {
    if let Some(ctx) = ctx {
        put_params(r, "", &ctx.params);
        r.put("last_index", ctx.last_index);
        r.put("ssrc", ctx.ssrc);
    }
}

fn capture_sockets(call: &Call, ix: &Surrogates) -> Vec<EntityRecord> {
    call.sockets()
        .map(|(_, sock)| {
            let mut r = HashRecord::new();
            r.put("pref_family", sock.family.rfc_name());
            r.put("localport", sock.local_port());
            r.put("logical_intf", &sock.logical.name);
            r.put("local_intf_uid", sock.local.unique_id);
            r.put_ref("stream", lookup(&ix.streams, sock.stream.map(|s| s.0)));
            put_context(&mut r, &sock.crypto);
            EntityRecord::new(r)
        })
        .collect()
}

fn capture_streams(call: &Call, ix: &Surrogates) -> Vec<EntityRecord> {
    call.streams()
        .map(|(_, s)| {
            let mut r = HashRecord::new();
            r.put_ref("media", lookup(&ix.medias, s.media.map(|m| m.0)));
            r.put_ref("sfd", lookup(&ix.sockets, s.selected_sfd.map(|x| x.0)));
            r.put_ref("rtp_sink", lookup(&ix.streams, s.rtp_sink.map(|x| x.0)));
            r.put_ref("rtcp_sink", lookup(&ix.streams, s.rtcp_sink.map(|x| x.0)));
            r.put_ref("rtcp_sibling", lookup(&ix.streams, s.rtcp_sibling.map(|x| x.0)));
            r.put("last_packet", s.last_packet);
            r.put("ps_flags", s.flags);
            r.put("component", s.component);
            r.put("endpoint", s.endpoint);
            r.put("advertised_endpoint", s.advertised_endpoint);
            r.put("stats-packets", s.stats.packets);
            r.put("stats-bytes", s.stats.bytes);
            r.put("stats-errors", s.stats.errors);
            put_context(&mut r, &s.crypto);
            EntityRecord::new(r).with_list(
                "stream_sfds",
                index_list(&ix.sockets, s.sfds.iter().map(|x| x.0)),
            )
        })
        .collect()
}

fn capture_tags(call: &Call, ix: &Surrogates) -> Vec<EntityRecord> {
    call.tags()
        .map(|(_, t)| {
            let mut r = HashRecord::new();
            r.put("created", t.created);
            r.put_ref("active", lookup(&ix.tags, t.active.map(|x| x.0)));
            r.put("deleted", t.deleted);
            if let Some(tag) = &t.tag {
                r.put("tag", tag);
            }
            if let Some(branch) = &t.via_branch {
                r.put("via-branch", branch);
            }
            EntityRecord::new(r)
                .with_list(
                    "other_tags",
                    index_list(&ix.tags, t.other_tags.values().map(|x| x.0)),
                )
                .with_list("medias", index_list(&ix.medias, t.medias.iter().map(|x| x.0)))
        })
        .collect()
}

fn capture_medias(call: &Call, ix: &Surrogates) -> Vec<EntityRecord> {
    call.medias()
        .map(|(_, m)| {
            let mut r = HashRecord::new();
            r.put_ref("tag", lookup(&ix.tags, m.tag.map(|x| x.0)));
            r.put("index", m.index);
            r.put("type", &m.media_type);
            r.put("protocol", m.protocol.map(|p| p.name()).unwrap_or(""));
            r.put(
                "desired_family",
                m.desired_family.map(|f| f.rfc_name()).unwrap_or(""),
            );
            r.put(
                "logical_intf",
                m.logical_intf.as_ref().map(|l| l.name.as_str()).unwrap_or(""),
            );
            r.put("media_flags", m.media_flags);
            r.put("sdes_in_tag", m.sdes_in.tag);
            r.put("sdes_out_tag", m.sdes_out.tag);
            if let Some(p) = &m.sdes_in.params {
                put_params(&mut r, "sdes_in-", p);
            }
            if let Some(p) = &m.sdes_out.params {
                put_params(&mut r, "sdes_out-", p);
            }
            if let Some(fp) = &m.fingerprint {
                r.put("hash_func", fp.hash_func.name);
                r.put_bytes("fingerprint", fp.digest.clone());
            }
            let payload_types = m
                .payload_types
                .values()
                .map(|pt| {
                    format_payload_token(pt.payload_type, &pt.encoding, pt.clock_rate, &pt.params)
                        .into_bytes()
                })
                .collect();
            EntityRecord::new(r)
                .with_list("streams", index_list(&ix.streams, m.streams.iter().map(|x| x.0)))
                .with_list("maps", index_list(&ix.maps, m.maps.iter().map(|x| x.0)))
                .with_list("payload_types", payload_types)
        })
        .collect()
}

fn capture_maps(call: &Call, ix: &Surrogates) -> Vec<EntityRecord> {
    call.maps()
        .map(|(_, em)| {
            let mut r = HashRecord::new();
            r.put_bool("wildcard", em.wildcard);
            r.put("num_ports", em.num_ports);
            r.put(
                "intf_preferred_family",
                em.logical_intf.preferred_family.rfc_name(),
            );
            r.put("logical_intf", &em.logical_intf.name);
            r.put("endpoint", em.endpoint);

            let mut sfds = Vec::new();
            for group in &em.intf_sfds {
                sfds.push(format_local_marker(group.local.unique_id).into_bytes());
                sfds.extend(index_list(&ix.sockets, group.sockets.iter().map(|x| x.0)));
            }
            EntityRecord::new(r).with_list("map_sfds", sfds)
        })
        .collect()
}
