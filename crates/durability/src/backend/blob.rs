//! Single-blob backend: one JSON document per call
//!
//! Document layout:
//!
//! ```text
//! {
//!   "json":          { "<field>": "<base64>", ... },   root hash
//!   "<prefix>-<n>":  { "<field>": "<base64>", ... },   entity hash
//!   "<prefix>-<n>":  [ "<base64>", ... ]               entity list
//! }
//! ```
//!
//! Values are base64 so binary key material survives the JSON round trip.

use super::GraphSource;
use crate::error::PersistError;
use crate::keys::{json_key, member_name, JSON_ROOT_MEMBER};
use crate::record::HashRecord;
use crate::snapshot::CallSnapshot;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use relaystate_core::CallId;
use relaystate_store::{Command, Result, StoreConnection, StoreError};
use serde_json::{Map, Value};

/// Decoded single-blob document of one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlobDocument {
    members: Map<String, Value>,
}

impl BlobDocument {
    /// Build the document for `snapshot`.
    pub fn from_snapshot(snapshot: &CallSnapshot) -> Self {
        let mut members = Map::new();
        members.insert(JSON_ROOT_MEMBER.to_string(), encode_hash(&snapshot.root));
        for group in &snapshot.kinds {
            for (n, item) in group.items.iter().enumerate() {
                let n = n as u32;
                members.insert(member_name(group.kind.hash_prefix(), n), encode_hash(&item.hash));
                for (prefix, values) in &item.lists {
                    let list = values.iter().map(|v| Value::String(BASE64.encode(v))).collect();
                    members.insert(member_name(prefix, n), Value::Array(list));
                }
            }
        }
        BlobDocument { members }
    }

    /// Serialized document.
    pub fn to_bytes(&self) -> std::result::Result<Vec<u8>, PersistError> {
        serde_json::to_vec(&self.members).map_err(|e| PersistError::Encode(e.to_string()))
    }

    /// Parse a stored document.
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        let members: Map<String, Value> = serde_json::from_slice(raw)
            .map_err(|e| StoreError::Protocol(format!("invalid call document: {}", e)))?;
        Ok(BlobDocument { members })
    }

    /// Fetch and parse `json-<id>`; `None` when the key is absent.
    pub fn load(conn: &StoreConnection, id: &CallId) -> Result<Option<Self>> {
        match conn.session().request(&Command::Get(json_key(id)))?.into_bytes()? {
            Some(raw) => Self::from_bytes(&raw).map(Some),
            None => Ok(None),
        }
    }

    fn hash_member(&self, name: &str) -> Result<Option<HashRecord>> {
        let obj = match self.members.get(name) {
            None => return Ok(None),
            Some(Value::Object(obj)) => obj,
            Some(_) => return Err(shape_error(name, "object")),
        };
        let mut record = HashRecord::new();
        for (field, value) in obj {
            record.put_bytes(field.clone(), decode_value(name, value)?);
        }
        Ok(Some(record))
    }
}

fn encode_hash(record: &HashRecord) -> Value {
    let obj = record
        .sorted_fields()
        .into_iter()
        .map(|(k, v)| (k, Value::String(BASE64.encode(v))))
        .collect();
    Value::Object(obj)
}

fn decode_value(member: &str, value: &Value) -> Result<Vec<u8>> {
    let text = value.as_str().ok_or_else(|| shape_error(member, "string value"))?;
    BASE64
        .decode(text)
        .map_err(|e| StoreError::Protocol(format!("invalid base64 in '{}': {}", member, e)))
}

fn shape_error(member: &str, wanted: &str) -> StoreError {
    StoreError::Protocol(format!("member '{}' is not a {}", member, wanted))
}

impl GraphSource for BlobDocument {
    fn fetch_root(&mut self) -> Result<Option<HashRecord>> {
        self.hash_member(JSON_ROOT_MEMBER)
    }

    fn fetch_hash(&mut self, prefix: &str, index: u32) -> Result<Option<HashRecord>> {
        self.hash_member(&member_name(prefix, index))
    }

    fn fetch_list(&mut self, prefix: &str, index: u32) -> Result<Vec<Vec<u8>>> {
        let name = member_name(prefix, index);
        match self.members.get(&name) {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => items.iter().map(|v| decode_value(&name, v)).collect(),
            Some(_) => Err(shape_error(&name, "list")),
        }
    }
}
