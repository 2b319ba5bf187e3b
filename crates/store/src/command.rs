//! Typed store commands and replies
//!
//! Commands are built as values and serialized by the transport. Field and
//! member values are raw bytes; keys, field names and set members are text.

use crate::error::{Result, StoreError};

/// One store command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `AUTH <password>`
    Auth(String),
    /// `PING`
    Ping,
    /// `SELECT <db>`
    Select(u32),
    /// `INFO`
    Info,
    /// `TYPE <key>`
    Type(String),
    /// `DEL <key>...`
    Del(Vec<String>),
    /// `HSET <key> <field> <value> [<field> <value>...]`
    HSet {
        /// Hash key
        key: String,
        /// Field/value pairs
        fields: Vec<(String, Vec<u8>)>,
    },
    /// `HGETALL <key>`
    HGetAll(String),
    /// `HMGET <key> <field>...`
    HMGet {
        /// Hash key
        key: String,
        /// Fields to read
        fields: Vec<String>,
    },
    /// `EXISTS <key>`
    Exists(String),
    /// `RPUSH <key> <value>...`
    RPush {
        /// List key
        key: String,
        /// Values appended in order
        values: Vec<Vec<u8>>,
    },
    /// `LRANGE <key> <start> <stop>`
    LRange {
        /// List key
        key: String,
        /// First index
        start: i64,
        /// Last index, negative counts from the end
        stop: i64,
    },
    /// `SADD <key> <member>...`
    SAdd {
        /// Set key
        key: String,
        /// Members
        members: Vec<String>,
    },
    /// `SREM <key> <member>...`
    SRem {
        /// Set key
        key: String,
        /// Members
        members: Vec<String>,
    },
    /// `SMEMBERS <key>`
    SMembers(String),
    /// `KEYS <pattern>`
    Keys(String),
    /// `GET <key>`
    Get(String),
    /// `SET <key> <value>`
    Set {
        /// Key
        key: String,
        /// Value
        value: Vec<u8>,
    },
    /// `EXPIRE <key> <seconds>`
    Expire {
        /// Key
        key: String,
        /// Time to live in seconds
        secs: u64,
    },
    /// `PSUBSCRIBE <pattern>...`
    PSubscribe(Vec<String>),
    /// `PUNSUBSCRIBE [<pattern>...]`
    PUnsubscribe(Vec<String>),
}

impl Command {
    /// Command verb as sent on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Auth(_) => "AUTH",
            Command::Ping => "PING",
            Command::Select(_) => "SELECT",
            Command::Info => "INFO",
            Command::Type(_) => "TYPE",
            Command::Del(_) => "DEL",
            Command::HSet { .. } => "HSET",
            Command::HGetAll(_) => "HGETALL",
            Command::HMGet { .. } => "HMGET",
            Command::Exists(_) => "EXISTS",
            Command::RPush { .. } => "RPUSH",
            Command::LRange { .. } => "LRANGE",
            Command::SAdd { .. } => "SADD",
            Command::SRem { .. } => "SREM",
            Command::SMembers(_) => "SMEMBERS",
            Command::Keys(_) => "KEYS",
            Command::Get(_) => "GET",
            Command::Set { .. } => "SET",
            Command::Expire { .. } => "EXPIRE",
            Command::PSubscribe(_) => "PSUBSCRIBE",
            Command::PUnsubscribe(_) => "PUNSUBSCRIBE",
        }
    }

    /// `DEL` of a single key.
    pub fn del(key: impl Into<String>) -> Self {
        Command::Del(vec![key.into()])
    }

    /// `EXPIRE` of `key`.
    pub fn expire(key: impl Into<String>, secs: u64) -> Self {
        Command::Expire {
            key: key.into(),
            secs,
        }
    }

    /// Arguments after the verb, as raw bytes.
    pub fn args(&self) -> Vec<Vec<u8>> {
        fn s(v: &str) -> Vec<u8> {
            v.as_bytes().to_vec()
        }
        match self {
            Command::Auth(pw) => vec![s(pw)],
            Command::Ping | Command::Info => Vec::new(),
            Command::Select(db) => vec![s(&db.to_string())],
            Command::Type(k)
            | Command::HGetAll(k)
            | Command::Exists(k)
            | Command::SMembers(k)
            | Command::Keys(k)
            | Command::Get(k) => vec![s(k)],
            Command::Del(keys) | Command::PSubscribe(keys) | Command::PUnsubscribe(keys) => {
                keys.iter().map(|k| s(k)).collect()
            }
            Command::HSet { key, fields } => {
                let mut out = vec![s(key)];
                for (f, v) in fields {
                    out.push(s(f));
                    out.push(v.clone());
                }
                out
            }
            Command::HMGet { key, fields } => {
                std::iter::once(s(key)).chain(fields.iter().map(|f| s(f))).collect()
            }
            Command::RPush { key, values } => {
                std::iter::once(s(key)).chain(values.iter().cloned()).collect()
            }
            Command::LRange { key, start, stop } => {
                vec![s(key), s(&start.to_string()), s(&stop.to_string())]
            }
            Command::SAdd { key, members } | Command::SRem { key, members } => {
                std::iter::once(s(key)).chain(members.iter().map(|m| s(m))).collect()
            }
            Command::Set { key, value } => vec![s(key), value.clone()],
            Command::Expire { key, secs } => vec![s(key), s(&secs.to_string())],
        }
    }
}

/// A successful store reply. Error replies surface as [`StoreError::Server`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Null bulk / missing value
    Nil,
    /// Integer
    Int(i64),
    /// Status line, e.g. `OK`
    Status(String),
    /// Bulk string
    Bulk(Vec<u8>),
    /// Multi-bulk
    Array(Vec<Reply>),
}

impl Reply {
    /// Integer payload.
    pub fn into_int(self) -> Result<i64> {
        match self {
            Reply::Int(i) => Ok(i),
            other => Err(unexpected("integer", &other)),
        }
    }

    /// Bulk payload; `None` for a nil reply.
    pub fn into_bytes(self) -> Result<Option<Vec<u8>>> {
        match self {
            Reply::Nil => Ok(None),
            Reply::Bulk(b) => Ok(Some(b)),
            Reply::Status(s) => Ok(Some(s.into_bytes())),
            other => Err(unexpected("bulk", &other)),
        }
    }

    /// Bulk or status payload as text.
    pub fn into_text(self) -> Result<String> {
        match self {
            Reply::Status(s) => Ok(s),
            Reply::Bulk(b) => String::from_utf8(b).map_err(|_| StoreError::protocol("non-UTF-8 text reply")),
            other => Err(unexpected("text", &other)),
        }
    }

    /// Elements of a multi-bulk reply.
    pub fn into_array(self) -> Result<Vec<Reply>> {
        match self {
            Reply::Array(items) => Ok(items),
            other => Err(unexpected("array", &other)),
        }
    }

    /// Multi-bulk of bulk strings as raw values.
    pub fn into_byte_list(self) -> Result<Vec<Vec<u8>>> {
        self.into_array()?
            .into_iter()
            .map(|r| r.into_bytes()?.ok_or_else(|| StoreError::protocol("nil element in list reply")))
            .collect()
    }

    /// Multi-bulk of bulk strings as text.
    pub fn into_text_list(self) -> Result<Vec<String>> {
        self.into_array()?.into_iter().map(Reply::into_text).collect()
    }

    /// `HGETALL`-style flat field/value multi-bulk as pairs.
    pub fn into_pairs(self) -> Result<Vec<(String, Vec<u8>)>> {
        let items = self.into_array()?;
        if items.len() % 2 != 0 {
            return Err(StoreError::protocol("odd element count in hash reply"));
        }
        let mut out = Vec::with_capacity(items.len() / 2);
        let mut it = items.into_iter();
        while let (Some(k), Some(v)) = (it.next(), it.next()) {
            let v = v.into_bytes()?.unwrap_or_default();
            out.push((k.into_text()?, v));
        }
        Ok(out)
    }
}

fn unexpected(wanted: &str, got: &Reply) -> StoreError {
    let kind = match got {
        Reply::Nil => "nil",
        Reply::Int(_) => "integer",
        Reply::Status(_) => "status",
        Reply::Bulk(_) => "bulk",
        Reply::Array(_) => "array",
    };
    StoreError::Protocol(format!("expected {} reply, got {}", wanted, kind))
}
