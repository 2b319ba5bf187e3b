//! Call graph arena
//!
//! A [`Call`] owns every entity of one call in per-kind arenas keyed by a
//! stable per-call id. Ownership edges (call owns tag) are arena membership;
//! every other edge is a plain id that may fail to resolve. Ids are assigned
//! monotonically per kind and never reused within the call.
//!
//! Two ways of populating a call exist:
//! - `add_*` inserts an entity and wires its owner relations in one step
//! - `push_*` inserts an entity as-is, leaving relations to the caller
//!   (used by restore, which links in a separate pass)

use crate::crypto::{CryptoContext, DtlsFingerprint, SdesSlot};
use crate::error::{CoreError, Result};
use crate::interface::{LocalInterface, LogicalInterface};
use crate::ports::PortGuard;
use crate::types::{AddressFamily, CallId, TransportProtocol};
use std::collections::BTreeMap;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall clock time in unix seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Default IP type-of-service byte for media packets.
pub const DEFAULT_TOS: u8 = 184;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            /// Entity kind name used in errors and logs
            pub const KIND: &'static str = $kind;
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", $kind, self.0)
            }
        }
    };
}

entity_id!(
    /// Id of a [`Socket`] within its call
    SocketId,
    "sfd"
);
entity_id!(
    /// Id of a [`Stream`] within its call
    StreamId,
    "stream"
);
entity_id!(
    /// Id of a [`Tag`] within its call
    TagId,
    "tag"
);
entity_id!(
    /// Id of a [`Media`] section within its call
    MediaId,
    "media"
);
entity_id!(
    /// Id of an [`EndpointMap`] within its call
    MapId,
    "map"
);

/// Packet stream flag bits.
pub mod stream_flags {
    /// Carries RTP
    pub const RTP: u32 = 0x0001;
    /// Carries RTCP
    pub const RTCP: u32 = 0x0002;
    /// Endpoint learned from signaling
    pub const FILLED: u32 = 0x0004;
    /// Endpoint confirmed by received traffic
    pub const CONFIRMED: u32 = 0x0008;
    /// RTCP multiplexed on the RTP port
    pub const IMPLICIT_RTCP: u32 = 0x0010;
    /// Forwarding offloaded to the kernel module
    pub const KERNELIZED: u32 = 0x0020;
    /// Kernel offload refused for this stream
    pub const NO_KERNEL_SUPPORT: u32 = 0x0040;
}

fn unspecified_endpoint() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
}

/// One bound local port used by a stream.
#[derive(Debug)]
pub struct Socket {
    /// Logical interface the port was bound on
    pub logical: Arc<LogicalInterface>,
    /// Local interface the port was bound on
    pub local: Arc<LocalInterface>,
    /// Preferred family
    pub family: AddressFamily,
    /// Owning stream
    pub stream: Option<StreamId>,
    /// SRTP context of this socket
    pub crypto: Option<CryptoContext>,
    port: PortGuard,
}

impl Socket {
    /// Bind exactly `port` on local interface `local_uid` of `logical`.
    pub fn bind(logical: Arc<LogicalInterface>, local_uid: u32, port: u16) -> Result<Socket> {
        let local = Arc::clone(
            logical
                .local(local_uid)
                .ok_or_else(|| CoreError::dangling("local_intf", local_uid))?,
        );
        let guard = local.ports.acquire(port)?;
        Ok(Self::with_guard(logical, local, guard))
    }

    /// Bind any free port on local interface `local_uid` of `logical`.
    pub fn bind_any(logical: Arc<LogicalInterface>, local_uid: u32) -> Result<Socket> {
        let local = Arc::clone(
            logical
                .local(local_uid)
                .ok_or_else(|| CoreError::dangling("local_intf", local_uid))?,
        );
        let guard = local
            .ports
            .acquire_range(1)?
            .pop()
            .ok_or_else(|| CoreError::InvalidOperation("empty port grant".to_string()))?;
        Ok(Self::with_guard(logical, local, guard))
    }

    fn with_guard(logical: Arc<LogicalInterface>, local: Arc<LocalInterface>, port: PortGuard) -> Socket {
        Socket {
            family: logical.preferred_family,
            logical,
            local,
            stream: None,
            crypto: None,
            port,
        }
    }

    /// Bound local port.
    pub fn local_port(&self) -> u16 {
        self.port.port()
    }
}

/// Packet and byte counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Packets relayed
    pub packets: u64,
    /// Bytes relayed
    pub bytes: u64,
    /// Packets dropped on error
    pub errors: u64,
}

/// One transport flow within a media section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    /// Owning media section
    pub media: Option<MediaId>,
    /// [`stream_flags`] bits
    pub flags: u32,
    /// RTP component (1 = RTP, 2 = RTCP)
    pub component: u32,
    /// Remote endpoint
    pub endpoint: SocketAddr,
    /// Endpoint advertised in signaling
    pub advertised_endpoint: SocketAddr,
    /// Traffic counters
    pub stats: StreamStats,
    /// Time of last received packet (unix seconds)
    pub last_packet: i64,
    /// SRTP context
    pub crypto: Option<CryptoContext>,
    /// Socket currently used for sending
    pub selected_sfd: Option<SocketId>,
    /// Stream receiving our RTP
    pub rtp_sink: Option<StreamId>,
    /// Stream receiving our RTCP
    pub rtcp_sink: Option<StreamId>,
    /// RTCP stream paired with this RTP stream
    pub rtcp_sibling: Option<StreamId>,
    /// Sockets owned by the stream
    pub sfds: Vec<SocketId>,
}

impl Default for Stream {
    fn default() -> Self {
        Stream {
            media: None,
            flags: 0,
            component: 1,
            endpoint: unspecified_endpoint(),
            advertised_endpoint: unspecified_endpoint(),
            stats: StreamStats::default(),
            last_packet: 0,
            crypto: None,
            selected_sfd: None,
            rtp_sink: None,
            rtcp_sink: None,
            rtcp_sibling: None,
            sfds: Vec::new(),
        }
    }
}

impl Stream {
    /// Whether all of `flags` are set.
    pub fn has_flags(&self, flags: u32) -> bool {
        self.flags & flags == flags
    }
}

/// One signaling leg (dialogue) of a call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tag {
    /// Creation time
    pub created: i64,
    /// Deletion time, 0 when live
    pub deleted: i64,
    /// Protocol tag string
    pub tag: Option<String>,
    /// Via branch of the creating request
    pub via_branch: Option<String>,
    /// Active peer dialogue
    pub active: Option<TagId>,
    /// Peer dialogues keyed by their tag string
    pub other_tags: BTreeMap<String, TagId>,
    /// Media sections owned by this leg, in SDP order
    pub medias: Vec<MediaId>,
}

impl Tag {
    /// New tag created at `created`.
    pub fn new(tag: Option<&str>, created: i64) -> Self {
        Tag {
            created,
            tag: tag.map(str::to_string),
            ..Tag::default()
        }
    }
}

/// A negotiated RTP payload type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadType {
    /// Payload type number
    pub payload_type: u32,
    /// Encoding name
    pub encoding: String,
    /// Clock rate in Hz
    pub clock_rate: u32,
    /// Encoding parameters (e.g. channel count)
    pub params: String,
}

/// One negotiated media description.
#[derive(Debug, Clone, Default)]
pub struct Media {
    /// Owning leg
    pub tag: Option<TagId>,
    /// Position within the SDP
    pub index: u32,
    /// Media type, e.g. `audio`
    pub media_type: String,
    /// Transport protocol
    pub protocol: Option<TransportProtocol>,
    /// Address family asked for in signaling
    pub desired_family: Option<AddressFamily>,
    /// Interface media is bound on
    pub logical_intf: Option<Arc<LogicalInterface>>,
    /// Inbound SDES crypto
    pub sdes_in: SdesSlot,
    /// Outbound SDES crypto
    pub sdes_out: SdesSlot,
    /// Peer DTLS fingerprint
    pub fingerprint: Option<DtlsFingerprint>,
    /// Media flag bits
    pub media_flags: u32,
    /// Payload types keyed by number
    pub payload_types: BTreeMap<u32, PayloadType>,
    /// Streams of this media section
    pub streams: Vec<StreamId>,
    /// Endpoint maps of this media section
    pub maps: Vec<MapId>,
}

impl Media {
    /// New media section of type `media_type` at SDP position `index`.
    pub fn new(media_type: &str, index: u32) -> Self {
        Media {
            media_type: media_type.to_string(),
            index,
            ..Media::default()
        }
    }

    /// Add or replace a payload type.
    pub fn add_payload_type(&mut self, pt: PayloadType) {
        self.payload_types.insert(pt.payload_type, pt);
    }
}

/// Sockets of an endpoint map on one local interface.
#[derive(Debug, Clone)]
pub struct InterfaceSockets {
    /// Local interface
    pub local: Arc<LocalInterface>,
    /// Sockets, in port order
    pub sockets: Vec<SocketId>,
}

/// Block of local ports reserved for one remote endpoint.
#[derive(Debug, Clone)]
pub struct EndpointMap {
    /// Matches any remote endpoint
    pub wildcard: bool,
    /// Number of ports in the block
    pub num_ports: u32,
    /// Interface the block lives on
    pub logical_intf: Arc<LogicalInterface>,
    /// Remote endpoint
    pub endpoint: SocketAddr,
    /// Socket groups per local interface
    pub intf_sfds: Vec<InterfaceSockets>,
}

impl EndpointMap {
    /// Empty map for `endpoint` on `logical_intf`.
    pub fn new(logical_intf: Arc<LogicalInterface>, endpoint: SocketAddr, num_ports: u32) -> Self {
        EndpointMap {
            wildcard: false,
            num_ports,
            logical_intf,
            endpoint,
            intf_sfds: Vec::new(),
        }
    }
}

/// Recording state of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recording {
    /// File name prefix of the metadata file
    pub meta_prefix: String,
    /// Free-form metadata supplied by signaling
    pub metadata: Option<String>,
}

#[derive(Debug, Default, Clone, Copy)]
struct NextIds {
    socket: u32,
    stream: u32,
    tag: u32,
    media: u32,
    map: u32,
}

/// Root aggregate of one call.
#[derive(Debug)]
pub struct Call {
    /// Call identifier
    pub id: CallId,
    /// Creation time
    pub created: i64,
    /// Last signaling event; unset until the call was signaled or restored
    pub last_signal: Option<i64>,
    /// Deletion time, 0 when live
    pub deleted: i64,
    /// Deletion time of the last removed leg, 0 if none
    pub ml_deleted: i64,
    /// IP type-of-service byte
    pub tos: u8,
    /// Signaling peer the call was created from
    pub created_from: Option<String>,
    /// Address of that peer
    pub created_from_addr: Option<SocketAddr>,
    /// Recording state
    pub recording: Option<Recording>,
    sockets: BTreeMap<SocketId, Socket>,
    streams: BTreeMap<StreamId, Stream>,
    tags: BTreeMap<TagId, Tag>,
    medias: BTreeMap<MediaId, Media>,
    maps: BTreeMap<MapId, EndpointMap>,
    next: NextIds,
}

impl Call {
    /// Empty call created at `created`.
    pub fn new(id: CallId, created: i64) -> Self {
        Call {
            id,
            created,
            last_signal: None,
            deleted: 0,
            ml_deleted: 0,
            tos: DEFAULT_TOS,
            created_from: None,
            created_from_addr: None,
            recording: None,
            sockets: BTreeMap::new(),
            streams: BTreeMap::new(),
            tags: BTreeMap::new(),
            medias: BTreeMap::new(),
            maps: BTreeMap::new(),
            next: NextIds::default(),
        }
    }

    /// Move the entities of `other` into this call, replacing all of ours.
    ///
    /// Scalar fields are taken from `other` as well; the id is kept.
    pub fn replace_with(&mut self, other: Call) {
        let id = std::mem::replace(&mut self.id, CallId::new(""));
        *self = Call { id, ..other };
    }

    // ------------------------------------------------------------------
    // Counts and iteration, in id order
    // ------------------------------------------------------------------

    /// Number of sockets.
    pub fn num_sockets(&self) -> usize {
        self.sockets.len()
    }
    /// Number of streams.
    pub fn num_streams(&self) -> usize {
        self.streams.len()
    }
    /// Number of tags.
    pub fn num_tags(&self) -> usize {
        self.tags.len()
    }
    /// Number of media sections.
    pub fn num_medias(&self) -> usize {
        self.medias.len()
    }
    /// Number of endpoint maps.
    pub fn num_maps(&self) -> usize {
        self.maps.len()
    }

    /// Sockets in id order.
    pub fn sockets(&self) -> impl Iterator<Item = (SocketId, &Socket)> {
        self.sockets.iter().map(|(k, v)| (*k, v))
    }
    /// Streams in id order.
    pub fn streams(&self) -> impl Iterator<Item = (StreamId, &Stream)> {
        self.streams.iter().map(|(k, v)| (*k, v))
    }
    /// Tags in id order.
    pub fn tags(&self) -> impl Iterator<Item = (TagId, &Tag)> {
        self.tags.iter().map(|(k, v)| (*k, v))
    }
    /// Media sections in id order.
    pub fn medias(&self) -> impl Iterator<Item = (MediaId, &Media)> {
        self.medias.iter().map(|(k, v)| (*k, v))
    }
    /// Endpoint maps in id order.
    pub fn maps(&self) -> impl Iterator<Item = (MapId, &EndpointMap)> {
        self.maps.iter().map(|(k, v)| (*k, v))
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Socket by id.
    pub fn socket(&self, id: SocketId) -> Option<&Socket> {
        self.sockets.get(&id)
    }
    /// Mutable socket by id.
    pub fn socket_mut(&mut self, id: SocketId) -> Option<&mut Socket> {
        self.sockets.get_mut(&id)
    }
    /// Stream by id.
    pub fn stream(&self, id: StreamId) -> Option<&Stream> {
        self.streams.get(&id)
    }
    /// Mutable stream by id.
    pub fn stream_mut(&mut self, id: StreamId) -> Option<&mut Stream> {
        self.streams.get_mut(&id)
    }
    /// Tag by id.
    pub fn tag(&self, id: TagId) -> Option<&Tag> {
        self.tags.get(&id)
    }
    /// Mutable tag by id.
    pub fn tag_mut(&mut self, id: TagId) -> Option<&mut Tag> {
        self.tags.get_mut(&id)
    }
    /// Media section by id.
    pub fn media(&self, id: MediaId) -> Option<&Media> {
        self.medias.get(&id)
    }
    /// Mutable media section by id.
    pub fn media_mut(&mut self, id: MediaId) -> Option<&mut Media> {
        self.medias.get_mut(&id)
    }
    /// Endpoint map by id.
    pub fn map(&self, id: MapId) -> Option<&EndpointMap> {
        self.maps.get(&id)
    }
    /// Mutable endpoint map by id.
    pub fn map_mut(&mut self, id: MapId) -> Option<&mut EndpointMap> {
        self.maps.get_mut(&id)
    }

    /// Tag whose tag string is `tag`.
    pub fn find_tag(&self, tag: &str) -> Option<TagId> {
        self.tags
            .iter()
            .find(|(_, t)| t.tag.as_deref() == Some(tag))
            .map(|(id, _)| *id)
    }

    // ------------------------------------------------------------------
    // Unlinked insertion
    // ------------------------------------------------------------------

    /// Insert a socket without touching relations.
    pub fn push_socket(&mut self, socket: Socket) -> SocketId {
        let id = SocketId(self.next.socket);
        self.next.socket += 1;
        self.sockets.insert(id, socket);
        id
    }
    /// Insert a stream without touching relations.
    pub fn push_stream(&mut self, stream: Stream) -> StreamId {
        let id = StreamId(self.next.stream);
        self.next.stream += 1;
        self.streams.insert(id, stream);
        id
    }
    /// Insert a tag without touching relations.
    pub fn push_tag(&mut self, tag: Tag) -> TagId {
        let id = TagId(self.next.tag);
        self.next.tag += 1;
        self.tags.insert(id, tag);
        id
    }
    /// Insert a media section without touching relations.
    pub fn push_media(&mut self, media: Media) -> MediaId {
        let id = MediaId(self.next.media);
        self.next.media += 1;
        self.medias.insert(id, media);
        id
    }
    /// Insert an endpoint map without touching relations.
    pub fn push_map(&mut self, map: EndpointMap) -> MapId {
        let id = MapId(self.next.map);
        self.next.map += 1;
        self.maps.insert(id, map);
        id
    }

    // ------------------------------------------------------------------
    // Linked insertion
    // ------------------------------------------------------------------

    /// Add a leg.
    pub fn add_tag(&mut self, tag: Tag) -> TagId {
        self.push_tag(tag)
    }

    /// Add a media section owned by `tag`.
    pub fn add_media(&mut self, tag: TagId, mut media: Media) -> Result<MediaId> {
        if !self.tags.contains_key(&tag) {
            return Err(CoreError::dangling(TagId::KIND, tag.0));
        }
        media.tag = Some(tag);
        let id = self.push_media(media);
        if let Some(t) = self.tags.get_mut(&tag) {
            t.medias.push(id);
        }
        Ok(id)
    }

    /// Add a stream owned by `media`.
    pub fn add_stream(&mut self, media: MediaId, mut stream: Stream) -> Result<StreamId> {
        if !self.medias.contains_key(&media) {
            return Err(CoreError::dangling(MediaId::KIND, media.0));
        }
        stream.media = Some(media);
        let id = self.push_stream(stream);
        if let Some(m) = self.medias.get_mut(&media) {
            m.streams.push(id);
        }
        Ok(id)
    }

    /// Add a socket owned by `stream`.
    ///
    /// The first socket of a stream becomes its selected socket.
    pub fn add_socket(&mut self, stream: StreamId, mut socket: Socket) -> Result<SocketId> {
        if !self.streams.contains_key(&stream) {
            return Err(CoreError::dangling(StreamId::KIND, stream.0));
        }
        socket.stream = Some(stream);
        let id = self.push_socket(socket);
        if let Some(s) = self.streams.get_mut(&stream) {
            s.sfds.push(id);
            s.selected_sfd.get_or_insert(id);
        }
        Ok(id)
    }

    /// Add an endpoint map used by `media`.
    pub fn add_map(&mut self, media: MediaId, map: EndpointMap) -> Result<MapId> {
        if !self.medias.contains_key(&media) {
            return Err(CoreError::dangling(MediaId::KIND, media.0));
        }
        let id = self.push_map(map);
        if let Some(m) = self.medias.get_mut(&media) {
            m.maps.push(id);
        }
        Ok(id)
    }

    /// Append `socket` to the group of `map` on the socket's local interface.
    pub fn map_socket(&mut self, map: MapId, socket: SocketId) -> Result<()> {
        let local = Arc::clone(
            &self
                .sockets
                .get(&socket)
                .ok_or_else(|| CoreError::dangling(SocketId::KIND, socket.0))?
                .local,
        );
        let em = self
            .maps
            .get_mut(&map)
            .ok_or_else(|| CoreError::dangling(MapId::KIND, map.0))?;
        match em.intf_sfds.iter_mut().find(|g| Arc::ptr_eq(&g.local, &local)) {
            Some(group) => group.sockets.push(socket),
            None => em.intf_sfds.push(InterfaceSockets {
                local,
                sockets: vec![socket],
            }),
        }
        Ok(())
    }

    /// Make `a` and `b` peer dialogues of each other, each active for the other.
    pub fn pair_tags(&mut self, a: TagId, b: TagId) -> Result<()> {
        let a_name = self
            .tags
            .get(&a)
            .ok_or_else(|| CoreError::dangling(TagId::KIND, a.0))?
            .tag
            .clone()
            .unwrap_or_default();
        let b_name = self
            .tags
            .get(&b)
            .ok_or_else(|| CoreError::dangling(TagId::KIND, b.0))?
            .tag
            .clone()
            .unwrap_or_default();
        if let Some(t) = self.tags.get_mut(&a) {
            t.other_tags.insert(b_name, b);
            t.active = Some(b);
        }
        if let Some(t) = self.tags.get_mut(&b) {
            t.other_tags.insert(a_name, a);
            t.active = Some(a);
        }
        Ok(())
    }

    /// Pair RTP stream `rtp` with RTCP stream `rtcp`.
    pub fn pair_rtcp(&mut self, rtp: StreamId, rtcp: StreamId) -> Result<()> {
        if !self.streams.contains_key(&rtcp) {
            return Err(CoreError::dangling(StreamId::KIND, rtcp.0));
        }
        let s = self
            .streams
            .get_mut(&rtp)
            .ok_or_else(|| CoreError::dangling(StreamId::KIND, rtp.0))?;
        s.rtcp_sibling = Some(rtcp);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Removal
    // ------------------------------------------------------------------

    /// Remove a socket, releasing its port and scrubbing references to it.
    pub fn remove_socket(&mut self, id: SocketId) -> Option<Socket> {
        let socket = self.sockets.remove(&id)?;
        for s in self.streams.values_mut() {
            s.sfds.retain(|x| *x != id);
            if s.selected_sfd == Some(id) {
                s.selected_sfd = s.sfds.first().copied();
            }
        }
        for m in self.maps.values_mut() {
            for g in &mut m.intf_sfds {
                g.sockets.retain(|x| *x != id);
            }
        }
        Some(socket)
    }

    /// Remove a stream together with the sockets it owns.
    pub fn remove_stream(&mut self, id: StreamId) -> Option<Stream> {
        let stream = self.streams.remove(&id)?;
        for sfd in &stream.sfds {
            self.remove_socket(*sfd);
        }
        let clear = |r: &mut Option<StreamId>| {
            if *r == Some(id) {
                *r = None;
            }
        };
        for s in self.streams.values_mut() {
            clear(&mut s.rtp_sink);
            clear(&mut s.rtcp_sink);
            clear(&mut s.rtcp_sibling);
        }
        for m in self.medias.values_mut() {
            m.streams.retain(|x| *x != id);
        }
        Some(stream)
    }
}
