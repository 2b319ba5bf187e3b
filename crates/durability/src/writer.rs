//! Snapshot writer
//!
//! Turns a [`CallSnapshot`] into one pipelined batch of store commands and
//! flushes it. The caller holds the store session (and the call's read
//! lock); the writer never locks anything itself.
//!
//! ## Multi-key batch layout
//!
//! ```text
//! DEL notifier-<id>; SREM calls <id>; DEL call-<id>
//! HSET call-<id> <root fields>
//! per kind, in write order:
//!     DEL <kind keys of index 0>
//!     per entity n: HSET hash-n; RPUSH non-empty lists-n; EXPIRE keys-n; DEL keys-(n+1)
//!     DEL keys of every index past the previous snapshot's count
//! EXPIRE call-<id>; SADD calls <id>; SADD notifier-<id> <id>; EXPIRE notifier-<id>
//! ```
//!
//! The previous counts are read with one `HMGET` inside the same session, so
//! a shrinking collection never leaves stale indices behind.

use crate::backend::BlobDocument;
use crate::error::PersistResult;
use crate::keys::{call_key, entity_key, entity_keys, json_key, notifier_key, EntityKind, StorageMode, CALLS_KEY, JSON_PREFIX};
use crate::record::parse_index;
use crate::snapshot::CallSnapshot;
use relaystate_core::{Call, CallId};
use relaystate_store::{Command, Reply, StoreSession};
use tracing::debug;

/// Number of persisted entities per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindCounts([u32; 5]);

impl KindCounts {
    fn slot(kind: EntityKind) -> usize {
        match kind {
            EntityKind::Socket => 0,
            EntityKind::Stream => 1,
            EntityKind::Tag => 2,
            EntityKind::Media => 3,
            EntityKind::Map => 4,
        }
    }

    /// Count of `kind`.
    pub fn get(&self, kind: EntityKind) -> u32 {
        self.0[Self::slot(kind)]
    }

    /// Set the count of `kind`.
    pub fn set(&mut self, kind: EntityKind, count: u32) {
        self.0[Self::slot(kind)] = count;
    }

    /// Entity counts of a live call.
    pub fn of_call(call: &Call) -> Self {
        let mut c = KindCounts::default();
        c.set(EntityKind::Socket, call.num_sockets() as u32);
        c.set(EntityKind::Stream, call.num_streams() as u32);
        c.set(EntityKind::Tag, call.num_tags() as u32);
        c.set(EntityKind::Media, call.num_medias() as u32);
        c.set(EntityKind::Map, call.num_maps() as u32);
        c
    }

    /// Per-kind maximum of `self` and `other`.
    pub fn max(self, other: KindCounts) -> KindCounts {
        let mut out = self;
        for (a, b) in out.0.iter_mut().zip(other.0) {
            *a = (*a).max(b);
        }
        out
    }
}

/// Writes and deletes persisted calls.
#[derive(Debug, Clone, Copy)]
pub struct Writer {
    mode: StorageMode,
    expires_secs: u64,
}

impl Writer {
    /// Writer for `mode` giving every key a TTL of `expires_secs`.
    pub fn new(mode: StorageMode, expires_secs: u64) -> Self {
        Writer { mode, expires_secs }
    }

    /// Storage mode.
    pub fn mode(&self) -> StorageMode {
        self.mode
    }

    /// Replace the stored snapshot of `snapshot.id` with `snapshot`.
    pub fn write(&self, session: &mut StoreSession<'_>, snapshot: &CallSnapshot) -> PersistResult<()> {
        match self.mode {
            StorageMode::MultiKey => self.write_multikey(session, snapshot),
            StorageMode::Json => self.write_json(session, snapshot),
        }
    }

    fn write_json(&self, session: &mut StoreSession<'_>, snapshot: &CallSnapshot) -> PersistResult<()> {
        let key = json_key(&snapshot.id);
        let doc = BlobDocument::from_snapshot(snapshot).to_bytes()?;
        session.pipe(Command::Set {
            key: key.clone(),
            value: doc,
        });
        session.pipe(Command::expire(key, self.expires_secs));
        session.consume()?;
        Ok(())
    }

    fn write_multikey(&self, session: &mut StoreSession<'_>, snapshot: &CallSnapshot) -> PersistResult<()> {
        let id = &snapshot.id;
        let previous = stored_counts(session, id)?;
        let root = call_key(id);

        session.pipe(Command::del(notifier_key(id)));
        session.pipe(remove_from_index(id));
        session.pipe(Command::del(root.clone()));
        session.pipe(Command::HSet {
            key: root.clone(),
            fields: snapshot.root.sorted_fields(),
        });

        for group in &snapshot.kinds {
            let kind = group.kind;
            session.pipe(Command::Del(entity_keys(kind, id, 0)));
            for (n, item) in group.items.iter().enumerate() {
                let n = n as u32;
                if !item.hash.is_empty() {
                    session.pipe(Command::HSet {
                        key: entity_key(kind.hash_prefix(), id, n),
                        fields: item.hash.sorted_fields(),
                    });
                }
                for (prefix, values) in &item.lists {
                    if !values.is_empty() {
                        session.pipe(Command::RPush {
                            key: entity_key(prefix, id, n),
                            values: values.clone(),
                        });
                    }
                }
                for key in entity_keys(kind, id, n) {
                    session.pipe(Command::expire(key, self.expires_secs));
                }
                session.pipe(Command::Del(entity_keys(kind, id, n + 1)));
            }
            let count = group.items.len() as u32;
            for n in count + 1..previous.get(kind) {
                session.pipe(Command::Del(entity_keys(kind, id, n)));
            }
        }

        session.pipe(Command::expire(root, self.expires_secs));
        session.pipe(Command::SAdd {
            key: CALLS_KEY.to_string(),
            members: vec![id.to_string()],
        });
        session.pipe(Command::SAdd {
            key: notifier_key(id),
            members: vec![id.to_string()],
        });
        session.pipe(Command::expire(notifier_key(id), self.expires_secs));

        debug!(target: "relaystate::persist", call_id = %id, commands = session.pending(), "Flushing call snapshot");
        session.consume()?;
        Ok(())
    }

    /// Delete every stored key of call `id`.
    ///
    /// Indices are enumerated up to the larger of `known` and the counts
    /// found in the stored root hash.
    pub fn delete(&self, session: &mut StoreSession<'_>, id: &CallId, known: KindCounts) -> PersistResult<()> {
        match self.mode {
            StorageMode::Json => {
                session.pipe(Command::del(json_key(id)));
            }
            StorageMode::MultiKey => {
                let counts = known.max(stored_counts(session, id)?);
                session.pipe(Command::del(notifier_key(id)));
                session.pipe(remove_from_index(id));
                session.pipe(Command::del(call_key(id)));
                for kind in EntityKind::WRITE_ORDER {
                    let keys: Vec<String> = (0..counts.get(kind))
                        .flat_map(|n| entity_keys(kind, id, n))
                        .collect();
                    if !keys.is_empty() {
                        session.pipe(Command::Del(keys));
                    }
                }
            }
        }
        session.consume()?;
        Ok(())
    }

    /// Delete whatever is stored for `id`, using only the stored counts.
    pub fn purge(&self, session: &mut StoreSession<'_>, id: &CallId) -> PersistResult<()> {
        self.delete(session, id, KindCounts::default())
    }

    /// Ids of every persisted call.
    pub fn list_calls(&self, session: &mut StoreSession<'_>) -> PersistResult<Vec<CallId>> {
        let ids = match self.mode {
            StorageMode::MultiKey => session
                .request(&Command::SMembers(CALLS_KEY.to_string()))?
                .into_text_list()?,
            StorageMode::Json => session
                .request(&Command::Keys(format!("{}*", JSON_PREFIX)))?
                .into_text_list()?
                .into_iter()
                .filter_map(|k| k.strip_prefix(JSON_PREFIX).map(str::to_string))
                .collect(),
        };
        Ok(ids.into_iter().map(CallId::new).collect())
    }

    /// Forget every persisted call.
    ///
    /// Multi-key mode drops the call index; the per-call keys expire on
    /// their own. Single-blob mode deletes every document.
    pub fn wipe(&self, session: &mut StoreSession<'_>) -> PersistResult<()> {
        match self.mode {
            StorageMode::MultiKey => {
                session.request(&Command::del(CALLS_KEY))?;
            }
            StorageMode::Json => {
                let keys = session
                    .request(&Command::Keys(format!("{}*", JSON_PREFIX)))?
                    .into_text_list()?;
                if !keys.is_empty() {
                    session.request(&Command::Del(keys))?;
                }
            }
        }
        Ok(())
    }
}

fn remove_from_index(id: &CallId) -> Command {
    Command::SRem {
        key: CALLS_KEY.to_string(),
        members: vec![id.to_string()],
    }
}

/// Counts recorded in the stored root hash of `id`; zero where absent.
fn stored_counts(session: &mut StoreSession<'_>, id: &CallId) -> PersistResult<KindCounts> {
    let fields = EntityKind::WRITE_ORDER
        .iter()
        .map(|k| k.count_field().to_string())
        .collect();
    let replies = session
        .request(&Command::HMGet {
            key: call_key(id),
            fields,
        })?
        .into_array()?;
    let mut counts = KindCounts::default();
    for (kind, reply) in EntityKind::WRITE_ORDER.iter().zip(replies) {
        let value = match reply {
            Reply::Bulk(raw) => parse_index(&raw).unwrap_or(0),
            _ => 0,
        };
        counts.set(*kind, value);
    }
    Ok(counts)
}
