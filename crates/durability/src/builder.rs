//! Object-graph builder
//!
//! Rebuilds one call from its persisted records in three phases:
//!
//! 1. **Fetch**: read the root hash, then every entity hash group in the
//!    order tags, sockets, streams, medias, maps. A short group aborts.
//! 2. **Construct**: build entities in dependency order socket, stream,
//!    tag, media, map. Sockets re-acquire their exact persisted port.
//! 3. **Link**: resolve surrogate indices into entity ids.
//!
//! The graph is built into a staging [`Call`] while the live call's write
//! lock is held, and swapped in only when every phase succeeded. On
//! failure the staging call is dropped (its ports are released) and a call
//! created by this restore is destroyed, so the table never holds a
//! half-linked call.

use crate::backend::GraphSource;
use crate::error::{FieldError, OptionalField, RestoreError, RestoreResult};
use crate::keys::EntityKind;
use crate::record::{parse_index, parse_local_marker, parse_payload_token, HashRecord};
use relaystate_core::{
    stream_flags, unix_now, AddressFamily, Call, CallHandle, CallId, CallTable, CallType,
    CoreError, CryptoContext, CryptoParams, CryptoSuite, DtlsFingerprint, EndpointMap, HashFunc,
    InterfaceRegistry, InterfaceSockets, LogicalInterface, MapId, Media, MediaId, PayloadType,
    Recording, Socket, SocketId, Stream, StreamId, StreamStats, Tag, TagId, DEFAULT_TOS,
    MAX_MASTER_KEY_LEN, MAX_MASTER_SALT_LEN, MAX_MKI_LEN,
};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Why one entity could not be constructed or linked.
#[derive(Debug, Error)]
enum Cause {
    #[error(transparent)]
    Field(#[from] FieldError),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("{0}")]
    Invalid(String),
}

fn invalid(msg: impl Into<String>) -> Cause {
    Cause::Invalid(msg.into())
}

/// Entity hashes of one call, indexed by surrogate id.
struct Groups {
    sockets: Vec<HashRecord>,
    streams: Vec<HashRecord>,
    tags: Vec<HashRecord>,
    medias: Vec<HashRecord>,
    maps: Vec<HashRecord>,
}

impl Groups {
    fn fetch(source: &mut dyn GraphSource, root: &HashRecord) -> RestoreResult<Self> {
        let mut groups = Groups {
            sockets: Vec::new(),
            streams: Vec::new(),
            tags: Vec::new(),
            medias: Vec::new(),
            maps: Vec::new(),
        };
        for kind in EntityKind::FETCH_ORDER {
            let count = root
                .get_unsigned(kind.count_field())
                .map_err(|e| RestoreError::incomplete(kind.group_name(), e))?;
            let mut records = Vec::with_capacity(count as usize);
            for (n, rec) in source.fetch_hashes(kind.hash_prefix(), count)?.into_iter().enumerate() {
                let rec = rec.ok_or_else(|| {
                    RestoreError::incomplete(kind.group_name(), format!("record {} of {} missing", n, count))
                })?;
                records.push(rec);
            }
            *groups.get_mut(kind) = records;
        }
        Ok(groups)
    }

    fn get_mut(&mut self, kind: EntityKind) -> &mut Vec<HashRecord> {
        match kind {
            EntityKind::Socket => &mut self.sockets,
            EntityKind::Stream => &mut self.streams,
            EntityKind::Tag => &mut self.tags,
            EntityKind::Media => &mut self.medias,
            EntityKind::Map => &mut self.maps,
        }
    }
}

/// Rebuilds calls from a [`GraphSource`].
pub struct CallBuilder<'r> {
    interfaces: &'r dyn InterfaceRegistry,
}

impl<'r> CallBuilder<'r> {
    /// Builder resolving interface names through `interfaces`.
    pub fn new(interfaces: &'r dyn InterfaceRegistry) -> Self {
        CallBuilder { interfaces }
    }

    /// Restore call `id` into `table`.
    ///
    /// Holds the call's write lock for the whole rebuild. Fails with
    /// [`RestoreError::AlreadyExists`] when the call already has a
    /// last-signal time; that call is left untouched.
    pub fn restore(
        &self,
        table: &CallTable,
        id: &CallId,
        call_type: CallType,
        source: &mut dyn GraphSource,
    ) -> RestoreResult<Arc<CallHandle>> {
        let (handle, created) = table.create_or_get(id, call_type);

        let result = {
            let mut state = handle.state().write();
            if state.last_signal.is_some() {
                return Err(RestoreError::AlreadyExists);
            }
            let built = self.build(id, source);
            match built {
                Ok((call, hosted_db)) => {
                    state.replace_with(call);
                    handle.set_hosted_db(hosted_db);
                    Ok(())
                }
                Err(e) => Err(e),
            }
        };

        match result {
            Ok(()) => {
                debug!(target: "relaystate::restore", call_id = %id, ?call_type, "Call restored");
                Ok(handle)
            }
            Err(e) => {
                if created {
                    table.destroy(&handle);
                }
                Err(e)
            }
        }
    }

    /// Run all three phases into a fresh call.
    ///
    /// Returns the call and the database it was persisted to.
    pub fn build(&self, id: &CallId, source: &mut dyn GraphSource) -> RestoreResult<(Call, u32)> {
        let root = source.fetch_root()?.ok_or(RestoreError::NotFound)?;
        let groups = Groups::fetch(source, &root)?;

        let (mut call, hosted_db) = call_scalars(id, &root)?;

        for (n, rec) in indexed(&groups.sockets) {
            let sock = self
                .socket(rec)
                .map_err(|e| RestoreError::construct(SocketId::KIND, n, e))?;
            call.push_socket(sock);
        }
        for (n, rec) in indexed(&groups.streams) {
            let stream = construct_stream(rec).map_err(|e| RestoreError::construct(StreamId::KIND, n, e))?;
            call.push_stream(stream);
        }
        for (n, rec) in indexed(&groups.tags) {
            let tag = construct_tag(rec).map_err(|e| RestoreError::construct(TagId::KIND, n, e))?;
            call.push_tag(tag);
        }
        for (n, rec) in indexed(&groups.medias) {
            let media = self
                .media(rec, n, source)
                .map_err(|e| RestoreError::construct(MediaId::KIND, n, e))?;
            call.push_media(media);
        }
        for (n, rec) in indexed(&groups.maps) {
            let map = self.map(rec).map_err(|e| RestoreError::construct(MapId::KIND, n, e))?;
            call.push_map(map);
        }

        link_sockets(&mut call, &groups.sockets)?;
        link_streams(&mut call, &groups.streams, source)?;
        link_tags(&mut call, &groups.tags, source)?;
        link_medias(&mut call, &groups.medias, source)?;
        link_maps(&mut call, &groups.maps, source)?;

        restore_recording(&mut call, &root).map_err(|e| RestoreError::incomplete("recording", e))?;
        Ok((call, hosted_db))
    }

    /// Named interface, or the family default when the name is unknown.
    fn interface(&self, name: &str, family: AddressFamily) -> Option<Arc<LogicalInterface>> {
        if let Some(lif) = self.interfaces.lookup(Some(name), family) {
            return Some(lif);
        }
        let fallback = self.interfaces.lookup(None, family);
        if let Some(lif) = &fallback {
            info!(target: "relaystate::restore", wanted = name, family = %family, using = %lif.name,
                "Unknown logical interface, falling back to default");
        }
        fallback
    }

    fn socket(&self, rec: &HashRecord) -> Result<Socket, Cause> {
        let port: u16 = rec.get_parsed("localport")?;
        let family = family_field(rec, "pref_family")?.ok_or_else(|| invalid("empty pref_family"))?;
        let name = rec.get_str("logical_intf")?;
        let uid = rec.get_unsigned("local_intf_uid")?;
        let lif = self
            .interfaces
            .lookup(Some(name), family)
            .ok_or_else(|| invalid(format!("unknown logical interface '{}'", name)))?;
        let mut sock = Socket::bind(lif, uid, port)?;
        sock.crypto = read_context(rec)?;
        Ok(sock)
    }

    fn media(&self, rec: &HashRecord, n: u32, source: &mut dyn GraphSource) -> Result<Media, Cause> {
        let mut media = Media::new(rec.get_str("type")?, rec.get_unsigned("index")?);
        media.protocol = rec
            .get_str("protocol")
            .optional()?
            .and_then(relaystate_core::TransportProtocol::from_name);
        media.desired_family = family_field(rec, "desired_family").optional()?.flatten();
        media.logical_intf = match rec.get_str("logical_intf").optional()? {
            Some(name) if !name.is_empty() => {
                let family = media.desired_family.unwrap_or(AddressFamily::Ipv4);
                self.interface(name, family)
            }
            _ => None,
        };
        media.media_flags = rec.get_unsigned("media_flags").optional()?.unwrap_or(0);
        media.sdes_in.tag = rec.get_unsigned("sdes_in_tag").optional()?.unwrap_or(0);
        media.sdes_out.tag = rec.get_unsigned("sdes_out_tag").optional()?.unwrap_or(0);
        media.sdes_in.params = read_params(rec, "sdes_in-")?;
        media.sdes_out.params = read_params(rec, "sdes_out-")?;
        media.fingerprint = read_fingerprint(rec)?;

        for raw in source.fetch_list("payload_types", n).map_err(|e| invalid(e.to_string()))? {
            let token = String::from_utf8_lossy(&raw);
            let (pt, encoding, clock, params) =
                parse_payload_token(&token).ok_or_else(|| invalid(format!("bad payload type '{}'", token)))?;
            media.add_payload_type(PayloadType {
                payload_type: pt,
                encoding: encoding.to_string(),
                clock_rate: clock,
                params: params.to_string(),
            });
        }
        Ok(media)
    }

    fn map(&self, rec: &HashRecord) -> Result<EndpointMap, Cause> {
        let family = family_field(rec, "intf_preferred_family")?
            .ok_or_else(|| invalid("empty intf_preferred_family"))?;
        let name = rec.get_str("logical_intf")?;
        let lif = self
            .interface(name, family)
            .ok_or_else(|| invalid(format!("no interface for '{}' and no default", name)))?;
        let mut map = EndpointMap::new(lif, rec.get_endpoint("endpoint")?, rec.get_unsigned("num_ports")?);
        map.wildcard = rec.get_bool("wildcard").optional()?.unwrap_or(false);
        Ok(map)
    }
}

fn indexed(records: &[HashRecord]) -> impl Iterator<Item = (u32, &HashRecord)> {
    records.iter().enumerate().map(|(n, r)| (n as u32, r))
}

/// `field` as an address family; `None` when stored empty.
fn family_field(rec: &HashRecord, field: &str) -> Result<Option<AddressFamily>, FieldError> {
    let name = rec.get_str(field)?;
    if name.is_empty() {
        return Ok(None);
    }
    AddressFamily::from_rfc(name).map(Some).ok_or_else(|| FieldError::Parse {
        field: field.to_string(),
        value: name.to_string(),
    })
}

fn call_scalars(id: &CallId, root: &HashRecord) -> RestoreResult<(Call, u32)> {
    let incomplete = |e: FieldError| RestoreError::incomplete("call", e);
    let mut call = Call::new(id.clone(), root.get_time("created").map_err(incomplete)?);
    let last_signal = root.get_time("last_signal").map_err(incomplete)?;
    call.last_signal = (last_signal >= 0).then_some(last_signal);
    call.tos = root
        .get_parsed::<u8>("tos")
        .optional()
        .map_err(incomplete)?
        .unwrap_or(DEFAULT_TOS);
    call.deleted = root.get_time("deleted").optional().map_err(incomplete)?.unwrap_or(0);
    call.ml_deleted = root.get_time("ml_deleted").optional().map_err(incomplete)?.unwrap_or(0);
    call.created_from = root
        .get_str("created_from")
        .optional()
        .map_err(incomplete)?
        .map(str::to_string);
    call.created_from_addr = root.get_endpoint("created_from_addr").optional().map_err(incomplete)?;
    let hosted_db = root.get_unsigned("hosted_db").map_err(incomplete)?;
    Ok((call, hosted_db))
}

fn construct_stream(rec: &HashRecord) -> Result<Stream, Cause> {
    let unspecified = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
    Ok(Stream {
        flags: rec.get_unsigned("ps_flags")? & !stream_flags::KERNELIZED,
        component: rec.get_unsigned("component")?,
        endpoint: rec.get_endpoint("endpoint").optional()?.unwrap_or(unspecified),
        advertised_endpoint: rec
            .get_endpoint("advertised_endpoint")
            .optional()?
            .unwrap_or(unspecified),
        stats: StreamStats {
            packets: rec.get_u64("stats-packets").optional()?.unwrap_or(0),
            bytes: rec.get_u64("stats-bytes").optional()?.unwrap_or(0),
            errors: rec.get_u64("stats-errors").optional()?.unwrap_or(0),
        },
        last_packet: unix_now(),
        crypto: read_context(rec)?,
        ..Stream::default()
    })
}

fn construct_tag(rec: &HashRecord) -> Result<Tag, Cause> {
    let mut tag = Tag::new(rec.get_str("tag").optional()?, rec.get_time("created")?);
    tag.deleted = rec.get_time("deleted").optional()?.unwrap_or(0);
    tag.via_branch = rec.get_str("via-branch").optional()?.map(str::to_string);
    Ok(tag)
}

fn read_params(rec: &HashRecord, prefix: &str) -> Result<Option<CryptoParams>, Cause> {
    let Some(name) = rec.get_str(&format!("{prefix}crypto_suite")).optional()? else {
        return Ok(None);
    };
    let suite = CryptoSuite::find(name).ok_or_else(|| invalid(format!("unknown crypto suite '{}'", name)))?;
    let mut params = CryptoParams::new(suite);
    params.master_key = rec.get_buf::<MAX_MASTER_KEY_LEN>(&format!("{prefix}master_key"))?;
    params.master_salt = rec.get_buf::<MAX_MASTER_SALT_LEN>(&format!("{prefix}master_salt"))?;
    if let Some(mki) = rec.get_bytes(&format!("{prefix}mki")).optional()? {
        if mki.len() > MAX_MKI_LEN {
            return Err(FieldError::TooLong {
                field: format!("{prefix}mki"),
                len: mki.len(),
                max: MAX_MKI_LEN,
            }
            .into());
        }
        params.mki = Some(mki.to_vec());
    }
    let flag = |field: &str| -> Result<bool, FieldError> {
        Ok(rec.get_bool(&format!("{prefix}{field}")).optional()?.unwrap_or(false))
    };
    params.session.unencrypted_srtp = flag("unenc-srtp")?;
    params.session.unencrypted_srtcp = flag("unenc-srtcp")?;
    params.session.unauthenticated_srtp = flag("unauth-srtp")?;
    Ok(Some(params))
}

fn read_context(rec: &HashRecord) -> Result<Option<CryptoContext>, Cause> {
    let Some(params) = read_params(rec, "")? else {
        return Ok(None);
    };
    Ok(Some(CryptoContext {
        params,
        last_index: rec.get_u64("last_index").optional()?.unwrap_or(0),
        ssrc: rec.get_unsigned("ssrc").optional()?.unwrap_or(0),
    }))
}

fn read_fingerprint(rec: &HashRecord) -> Result<Option<DtlsFingerprint>, Cause> {
    let Some(name) = rec.get_str("hash_func").optional()? else {
        return Ok(None);
    };
    let hash_func = HashFunc::find(name).ok_or_else(|| invalid(format!("unknown hash function '{}'", name)))?;
    Ok(Some(DtlsFingerprint {
        hash_func,
        digest: rec.get_bytes("fingerprint")?.to_vec(),
    }))
}

fn restore_recording(call: &mut Call, root: &HashRecord) -> Result<(), FieldError> {
    if let Some(prefix) = root.get_str("recording_meta_prefix").optional()? {
        call.recording = Some(Recording {
            meta_prefix: prefix.to_string(),
            metadata: root
                .get_str("recording_metadata")
                .optional()?
                .map(str::to_string),
        });
    }
    Ok(())
}

// ----------------------------------------------------------------------
// Link phase
// ----------------------------------------------------------------------

/// Check surrogate `index` against the number of constructed entities.
fn resolve(kind: &'static str, index: u32, count: usize) -> Result<u32, Cause> {
    if (index as usize) < count {
        Ok(index)
    } else {
        Err(invalid(format!("{} {} not found", kind, index)))
    }
}

/// Optional reference field; absent or unset is `None`.
fn resolve_field(rec: &HashRecord, field: &str, kind: &'static str, count: usize) -> Result<Option<u32>, Cause> {
    match rec.get_ref(field).optional()?.flatten() {
        Some(index) => resolve(kind, index, count).map(Some),
        None => Ok(None),
    }
}

/// Every element of a surrogate index list, resolved.
fn resolve_list(raw: Vec<Vec<u8>>, kind: &'static str, count: usize) -> Result<Vec<u32>, Cause> {
    raw.iter()
        .map(|v| {
            let index = parse_index(v)
                .ok_or_else(|| invalid(format!("bad {} index '{}'", kind, String::from_utf8_lossy(v))))?;
            resolve(kind, index, count)
        })
        .collect()
}

fn fetch_list(source: &mut dyn GraphSource, prefix: &str, n: u32) -> Result<Vec<Vec<u8>>, Cause> {
    source.fetch_list(prefix, n).map_err(|e| invalid(e.to_string()))
}

fn link_sockets(call: &mut Call, records: &[HashRecord]) -> RestoreResult<()> {
    let num_streams = call.num_streams();
    for (n, rec) in indexed(records) {
        let link = || -> Result<StreamId, Cause> {
            let stream = resolve_field(rec, "stream", StreamId::KIND, num_streams)?
                .ok_or_else(|| invalid("no owning stream"))?;
            Ok(StreamId(stream))
        };
        let stream = link().map_err(|e| RestoreError::link(SocketId::KIND, n, e))?;
        if let Some(sock) = call.socket_mut(SocketId(n)) {
            sock.stream = Some(stream);
        }
    }
    Ok(())
}

fn link_streams(call: &mut Call, records: &[HashRecord], source: &mut dyn GraphSource) -> RestoreResult<()> {
    let (num_sockets, num_streams, num_medias) = (call.num_sockets(), call.num_streams(), call.num_medias());
    for (n, rec) in indexed(records) {
        let mut link = || -> Result<_, Cause> {
            let media = resolve_field(rec, "media", MediaId::KIND, num_medias)?.map(MediaId);
            let selected = resolve_field(rec, "sfd", SocketId::KIND, num_sockets)?.map(SocketId);
            let rtp_sink = resolve_field(rec, "rtp_sink", StreamId::KIND, num_streams)?.map(StreamId);
            let rtcp_sink = resolve_field(rec, "rtcp_sink", StreamId::KIND, num_streams)?.map(StreamId);
            let sibling = resolve_field(rec, "rtcp_sibling", StreamId::KIND, num_streams)?.map(StreamId);
            let sfds = resolve_list(fetch_list(source, "stream_sfds", n)?, SocketId::KIND, num_sockets)?;
            Ok((media, selected, rtp_sink, rtcp_sink, sibling, sfds))
        };
        let (media, selected, rtp_sink, rtcp_sink, sibling, sfds) =
            link().map_err(|e| RestoreError::link(StreamId::KIND, n, e))?;
        if let Some(s) = call.stream_mut(StreamId(n)) {
            s.media = media;
            s.selected_sfd = selected;
            s.rtp_sink = rtp_sink;
            s.rtcp_sink = rtcp_sink;
            s.rtcp_sibling = sibling;
            s.sfds = sfds.into_iter().map(SocketId).collect();
        }
    }
    Ok(())
}

fn link_tags(call: &mut Call, records: &[HashRecord], source: &mut dyn GraphSource) -> RestoreResult<()> {
    let (num_tags, num_medias) = (call.num_tags(), call.num_medias());
    for (n, rec) in indexed(records) {
        let mut link = || -> Result<_, Cause> {
            let active = resolve_field(rec, "active", TagId::KIND, num_tags)?.map(TagId);
            let others = resolve_list(fetch_list(source, "other_tags", n)?, TagId::KIND, num_tags)?;
            let medias = resolve_list(fetch_list(source, "medias", n)?, MediaId::KIND, num_medias)?;
            Ok((active, others, medias))
        };
        let (active, others, medias) = link().map_err(|e| RestoreError::link(TagId::KIND, n, e))?;
        let others: Vec<(String, TagId)> = others
            .into_iter()
            .map(|o| {
                let name = call.tag(TagId(o)).and_then(|t| t.tag.clone()).unwrap_or_default();
                (name, TagId(o))
            })
            .collect();
        if let Some(t) = call.tag_mut(TagId(n)) {
            t.active = active;
            t.other_tags = others.into_iter().collect();
            t.medias = medias.into_iter().map(MediaId).collect();
        }
    }
    Ok(())
}

fn link_medias(call: &mut Call, records: &[HashRecord], source: &mut dyn GraphSource) -> RestoreResult<()> {
    let (num_tags, num_streams, num_maps) = (call.num_tags(), call.num_streams(), call.num_maps());
    for (n, rec) in indexed(records) {
        let mut link = || -> Result<_, Cause> {
            let tag = resolve_field(rec, "tag", TagId::KIND, num_tags)?.ok_or_else(|| invalid("no owning tag"))?;
            let streams = resolve_list(fetch_list(source, "streams", n)?, StreamId::KIND, num_streams)?;
            let maps = resolve_list(fetch_list(source, "maps", n)?, MapId::KIND, num_maps)?;
            Ok((tag, streams, maps))
        };
        let (tag, streams, maps) = link().map_err(|e| RestoreError::link(MediaId::KIND, n, e))?;
        if let Some(m) = call.media_mut(MediaId(n)) {
            m.tag = Some(TagId(tag));
            m.streams = streams.into_iter().map(StreamId).collect();
            m.maps = maps.into_iter().map(MapId).collect();
        }
    }
    Ok(())
}

fn link_maps(call: &mut Call, records: &[HashRecord], source: &mut dyn GraphSource) -> RestoreResult<()> {
    let num_sockets = call.num_sockets();
    for (n, _) in indexed(records) {
        let Some(lif) = call.map(MapId(n)).map(|m| Arc::clone(&m.logical_intf)) else {
            continue;
        };
        let mut link = || -> Result<Vec<InterfaceSockets>, Cause> {
            let mut groups: Vec<InterfaceSockets> = Vec::new();
            for raw in fetch_list(source, "map_sfds", n)? {
                if let Some(uid) = parse_local_marker(&raw) {
                    let local = lif
                        .local(uid)
                        .ok_or_else(|| invalid(format!("local interface {} not found", uid)))?;
                    groups.push(InterfaceSockets {
                        local: Arc::clone(local),
                        sockets: Vec::new(),
                    });
                    continue;
                }
                let index = resolve_list(vec![raw], SocketId::KIND, num_sockets)?[0];
                groups
                    .last_mut()
                    .ok_or_else(|| invalid("socket listed before any local interface"))?
                    .sockets
                    .push(SocketId(index));
            }
            Ok(groups)
        };
        let groups = link().map_err(|e| RestoreError::link(MapId::KIND, n, e))?;
        if let Some(m) = call.map_mut(MapId(n)) {
            m.intf_sfds = groups;
        }
    }
    Ok(())
}
