//! Persisted key layout
//!
//! Multi-key mode stores one root hash per call plus one hash and a few
//! lists per entity, all suffixed with the call id and a surrogate index:
//!
//! | key | type |
//! |---|---|
//! | `calls` | set of call ids |
//! | `call-<id>` | root hash |
//! | `sfd-<id>-<n>` | socket hash |
//! | `stream-<id>-<n>`, `stream_sfds-<id>-<n>` | stream hash, socket list |
//! | `tag-<id>-<n>`, `other_tags-<id>-<n>`, `medias-<id>-<n>` | tag hash, lists |
//! | `media-<id>-<n>`, `streams-`, `maps-`, `payload_types-<id>-<n>` | media hash, lists |
//! | `map-<id>-<n>`, `map_sfds-<id>-<n>` | map hash, grouped socket list |
//! | `notifier-<id>` | change-notification marker set |
//!
//! Single-blob mode stores one string `json-<id>` holding all of the above.

use relaystate_core::CallId;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use relaystate_store::CALLS_KEY;

/// Prefix of the per-call change-notification marker.
pub const NOTIFIER_PREFIX: &str = "notifier-";
/// Prefix of the per-call single-blob document.
pub const JSON_PREFIX: &str = "json-";
/// Name of the root hash, as a key prefix and as a blob member.
pub const ROOT_PREFIX: &str = "call";
/// Blob member holding the root hash.
pub const JSON_ROOT_MEMBER: &str = "json";

/// How calls are laid out in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// One hash or list per entity
    #[default]
    MultiKey,
    /// One JSON document per call
    Json,
}

impl StorageMode {
    /// Prefix of the key whose changes are published for a call.
    pub fn notify_prefix(self) -> &'static str {
        match self {
            StorageMode::MultiKey => NOTIFIER_PREFIX,
            StorageMode::Json => JSON_PREFIX,
        }
    }

    /// Key whose changes are published for `id`.
    pub fn notify_key(self, id: &CallId) -> String {
        format!("{}{}", self.notify_prefix(), id)
    }

    /// Keyspace-notification pattern for database `db`.
    pub fn subscribe_pattern(self, db: u32) -> String {
        format!("__keyspace@{}__:{}*", db, self.notify_prefix())
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageMode::MultiKey => f.write_str("multikey"),
            StorageMode::Json => f.write_str("json"),
        }
    }
}

/// Entity kinds persisted per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// Sockets
    Socket,
    /// Packet streams
    Stream,
    /// Dialogues
    Tag,
    /// Media sections
    Media,
    /// Endpoint maps
    Map,
}

impl EntityKind {
    /// Order in which kinds are written and constructed.
    pub const WRITE_ORDER: [EntityKind; 5] = [
        EntityKind::Socket,
        EntityKind::Stream,
        EntityKind::Tag,
        EntityKind::Media,
        EntityKind::Map,
    ];

    /// Order in which hash groups are fetched.
    pub const FETCH_ORDER: [EntityKind; 5] = [
        EntityKind::Tag,
        EntityKind::Socket,
        EntityKind::Stream,
        EntityKind::Media,
        EntityKind::Map,
    ];

    /// Key prefix of the entity hash.
    pub fn hash_prefix(self) -> &'static str {
        match self {
            EntityKind::Socket => "sfd",
            EntityKind::Stream => "stream",
            EntityKind::Tag => "tag",
            EntityKind::Media => "media",
            EntityKind::Map => "map",
        }
    }

    /// Key prefixes of the lists attached to each entity.
    pub fn list_prefixes(self) -> &'static [&'static str] {
        match self {
            EntityKind::Socket => &[],
            EntityKind::Stream => &["stream_sfds"],
            EntityKind::Tag => &["other_tags", "medias"],
            EntityKind::Media => &["streams", "maps", "payload_types"],
            EntityKind::Map => &["map_sfds"],
        }
    }

    /// Root hash field holding the number of entities.
    pub fn count_field(self) -> &'static str {
        match self {
            EntityKind::Socket => "num_sfds",
            EntityKind::Stream => "num_streams",
            EntityKind::Tag => "num_tags",
            EntityKind::Media => "num_medias",
            EntityKind::Map => "num_maps",
        }
    }

    /// Plural name used in restore diagnostics.
    pub fn group_name(self) -> &'static str {
        match self {
            EntityKind::Socket => "sfds",
            EntityKind::Stream => "streams",
            EntityKind::Tag => "tags",
            EntityKind::Media => "medias",
            EntityKind::Map => "maps",
        }
    }
}

/// `call-<id>`
pub fn call_key(id: &CallId) -> String {
    format!("{}-{}", ROOT_PREFIX, id)
}

/// `<prefix>-<id>-<n>`
pub fn entity_key(prefix: &str, id: &CallId, index: u32) -> String {
    format!("{}-{}-{}", prefix, id, index)
}

/// `<prefix>-<n>`, the member name inside a blob document.
pub fn member_name(prefix: &str, index: u32) -> String {
    format!("{}-{}", prefix, index)
}

/// `notifier-<id>`
pub fn notifier_key(id: &CallId) -> String {
    format!("{}{}", NOTIFIER_PREFIX, id)
}

/// `json-<id>`
pub fn json_key(id: &CallId) -> String {
    format!("{}{}", JSON_PREFIX, id)
}

/// Every key of entity `index` of `kind`: its hash and its lists.
pub fn entity_keys(kind: EntityKind, id: &CallId, index: u32) -> Vec<String> {
    std::iter::once(kind.hash_prefix())
        .chain(kind.list_prefixes().iter().copied())
        .map(|p| entity_key(p, id, index))
        .collect()
}
