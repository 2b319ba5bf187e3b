//! Multi-key backend: one hash or list per record

use super::GraphSource;
use crate::keys::{call_key, entity_key};
use crate::record::HashRecord;
use relaystate_core::CallId;
use relaystate_store::{Command, Reply, Result, StoreConnection, StoreError};

/// Reads a call's records from a store connection.
///
/// The connection is locked per fetch, so a caller may hold a call lock
/// while reading. Each hash fetch pipelines `EXISTS` with `HGETALL` so an
/// absent hash is told apart from an empty one.
pub struct MultiKeySource<'s> {
    conn: &'s StoreConnection,
    id: &'s CallId,
}

impl<'s> MultiKeySource<'s> {
    /// Source for call `id`, reading through `conn`.
    pub fn new(conn: &'s StoreConnection, id: &'s CallId) -> Self {
        MultiKeySource { conn, id }
    }

    fn fetch_keys(&mut self, keys: Vec<String>) -> Result<Vec<Option<HashRecord>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let cmds: Vec<Command> = keys
            .into_iter()
            .flat_map(|k| [Command::Exists(k.clone()), Command::HGetAll(k)])
            .collect();
        let replies = self.conn.session().request_many(&cmds)?;
        if replies.len() != cmds.len() {
            return Err(StoreError::protocol("short pipeline reply"));
        }
        let mut out = Vec::with_capacity(replies.len() / 2);
        let mut it = replies.into_iter();
        while let (Some(exists), Some(body)) = (it.next(), it.next()) {
            out.push(decode_hash(exists, body)?);
        }
        Ok(out)
    }
}

fn decode_hash(exists: Reply, body: Reply) -> Result<Option<HashRecord>> {
    if exists.into_int()? == 0 {
        return Ok(None);
    }
    HashRecord::from_reply(body).map(Some)
}

impl GraphSource for MultiKeySource<'_> {
    fn fetch_root(&mut self) -> Result<Option<HashRecord>> {
        let key = call_key(self.id);
        Ok(self.fetch_keys(vec![key])?.pop().flatten())
    }

    fn fetch_hash(&mut self, prefix: &str, index: u32) -> Result<Option<HashRecord>> {
        let key = entity_key(prefix, self.id, index);
        Ok(self.fetch_keys(vec![key])?.pop().flatten())
    }

    fn fetch_hashes(&mut self, prefix: &str, count: u32) -> Result<Vec<Option<HashRecord>>> {
        let keys = (0..count).map(|n| entity_key(prefix, self.id, n)).collect();
        self.fetch_keys(keys)
    }

    fn fetch_list(&mut self, prefix: &str, index: u32) -> Result<Vec<Vec<u8>>> {
        self.conn
            .session()
            .request(&Command::LRange {
                key: entity_key(prefix, self.id, index),
                start: 0,
                stop: -1,
            })?
            .into_byte_list()
    }
}
