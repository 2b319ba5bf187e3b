//! Call-state model for relaystate
//!
//! This crate defines the in-memory call graph the persistence layer mirrors:
//! - CallId, CallType, AddressFamily, TransportProtocol: identity and enums
//! - Call: per-call arena of sockets, streams, tags, media sections and maps
//! - CallTable: process-wide table of calls with per-call read/write locks
//! - Crypto: SRTP suites, SDES parameters, DTLS fingerprints
//! - Interfaces: logical/local interfaces and their port pools
//! - Error: CoreError and Result

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod call;
pub mod crypto;
pub mod error;
pub mod interface;
pub mod ports;
pub mod table;
pub mod types;

pub use call::{
    stream_flags, unix_now, Call, EndpointMap, InterfaceSockets, MapId, Media, MediaId,
    PayloadType, Recording, Socket, SocketId, Stream, StreamId, StreamStats, Tag, TagId,
    DEFAULT_TOS,
};
pub use crypto::{
    CryptoContext, CryptoParams, CryptoSuite, DtlsFingerprint, HashFunc, SdesSlot, SessionParams,
    MAX_MASTER_KEY_LEN, MAX_MASTER_SALT_LEN, MAX_MKI_LEN,
};
pub use error::{CoreError, Result};
pub use interface::{InterfaceRegistry, InterfaceTable, LocalInterface, LogicalInterface};
pub use ports::{PortGuard, PortPool};
pub use table::{CallHandle, CallTable};
pub use types::{AddressFamily, CallId, CallType, TransportProtocol};
