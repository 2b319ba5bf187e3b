//! In-memory simulated store
//!
//! Implements [`Connector`] over a shared keyspace so that tests can run the
//! persistence layer end to end without a server. Supports the commands the
//! persistence layer issues, keyspace notifications for subscribers, a
//! reported replication role, and fault injection (refused connects, dropped
//! connections, one-shot error replies, per-command latency).

use crate::command::{Command, Reply};
use crate::error::{Result, StoreError};
use crate::options::{ConnectOptions, Role};
use crate::transport::{Connector, Subscription, Transport};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// A value held by the simulated store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredValue {
    /// String value
    Str(Vec<u8>),
    /// Hash value
    Hash(BTreeMap<String, Vec<u8>>),
    /// List value
    List(Vec<Vec<u8>>),
    /// Set value
    Set(BTreeSet<String>),
}

impl StoredValue {
    fn type_name(&self) -> &'static str {
        match self {
            StoredValue::Str(_) => "string",
            StoredValue::Hash(_) => "hash",
            StoredValue::List(_) => "list",
            StoredValue::Set(_) => "set",
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    value: StoredValue,
    ttl: Option<u64>,
}

struct Subscriber {
    id: u64,
    patterns: Vec<String>,
    tx: Sender<Vec<String>>,
}

struct State {
    dbs: HashMap<u32, BTreeMap<String, Slot>>,
    role: Role,
    available: bool,
    password: Option<String>,
    generation: u64,
    one_shot_failures: Vec<&'static str>,
    latency: Duration,
    counts: HashMap<&'static str, usize>,
    opened: usize,
    subscribers: Vec<Subscriber>,
    next_subscriber: u64,
}

impl Default for State {
    fn default() -> Self {
        State {
            dbs: HashMap::new(),
            role: Role::Master,
            available: true,
            password: None,
            generation: 0,
            one_shot_failures: Vec::new(),
            latency: Duration::ZERO,
            counts: HashMap::new(),
            opened: 0,
            subscribers: Vec::new(),
            next_subscriber: 0,
        }
    }
}

/// Shared in-memory store. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Empty store reporting the master role.
    pub fn new() -> Self {
        Self::default()
    }

    /// The store as a connector.
    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    // ------------------------------------------------------------------
    // Fault injection
    // ------------------------------------------------------------------

    /// Role reported by `INFO`.
    pub fn set_role(&self, role: Role) {
        self.state.lock().role = role;
    }

    /// Refuse (or accept again) new connections and fail every command.
    pub fn set_available(&self, available: bool) {
        self.state.lock().available = available;
    }

    /// Require `AUTH` with `password`.
    pub fn require_password(&self, password: &str) {
        self.state.lock().password = Some(password.to_string());
    }

    /// Break every open transport and subscription.
    pub fn drop_connections(&self) {
        let mut st = self.state.lock();
        st.generation += 1;
        st.subscribers.clear();
    }

    /// Make the next command named `name` fail with an error reply.
    pub fn fail_next(&self, name: &'static str) {
        self.state.lock().one_shot_failures.push(name);
    }

    /// Sleep this long before executing each command.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// How many times a command named `name` was executed.
    pub fn command_count(&self, name: &str) -> usize {
        self.state.lock().counts.get(name).copied().unwrap_or(0)
    }

    /// Transports and subscriptions opened so far.
    pub fn connections_opened(&self) -> usize {
        self.state.lock().opened
    }

    /// Number of live pattern subscriptions.
    pub fn subscriptions(&self) -> usize {
        self.state.lock().subscribers.iter().map(|s| s.patterns.len()).sum()
    }

    /// All keys of `db`, sorted.
    pub fn keys(&self, db: u32) -> Vec<String> {
        self.state
            .lock()
            .dbs
            .get(&db)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Whole keyspace of `db`.
    pub fn dump(&self, db: u32) -> BTreeMap<String, StoredValue> {
        self.state
            .lock()
            .dbs
            .get(&db)
            .map(|m| m.iter().map(|(k, s)| (k.clone(), s.value.clone())).collect())
            .unwrap_or_default()
    }

    /// Value under `key`.
    pub fn get(&self, db: u32, key: &str) -> Option<StoredValue> {
        self.state
            .lock()
            .dbs
            .get(&db)
            .and_then(|m| m.get(key))
            .map(|s| s.value.clone())
    }

    /// Whether `key` exists.
    pub fn exists(&self, db: u32, key: &str) -> bool {
        self.get(db, key).is_some()
    }

    /// Time to live last set on `key`.
    pub fn ttl(&self, db: u32, key: &str) -> Option<u64> {
        self.state
            .lock()
            .dbs
            .get(&db)
            .and_then(|m| m.get(key))
            .and_then(|s| s.ttl)
    }

    /// Hash under `key`, if it is a hash.
    pub fn hash(&self, db: u32, key: &str) -> Option<BTreeMap<String, Vec<u8>>> {
        match self.get(db, key) {
            Some(StoredValue::Hash(h)) => Some(h),
            _ => None,
        }
    }

    /// Set members under `key`, if it is a set.
    pub fn members(&self, db: u32, key: &str) -> Option<BTreeSet<String>> {
        match self.get(db, key) {
            Some(StoredValue::Set(s)) => Some(s),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Direct mutation, bypassing notifications
    // ------------------------------------------------------------------

    /// Store `value` under `key`.
    pub fn put(&self, db: u32, key: &str, value: StoredValue) {
        self.state
            .lock()
            .dbs
            .entry(db)
            .or_default()
            .insert(key.to_string(), Slot { value, ttl: None });
    }

    /// Remove `key`.
    pub fn remove(&self, db: u32, key: &str) -> bool {
        self.state
            .lock()
            .dbs
            .get_mut(&db)
            .map(|m| m.remove(key).is_some())
            .unwrap_or(false)
    }

    /// Set field `field` of hash `key`.
    pub fn set_field(&self, db: u32, key: &str, field: &str, value: &[u8]) {
        let mut st = self.state.lock();
        let slot = st.dbs.entry(db).or_default().entry(key.to_string()).or_insert(Slot {
            value: StoredValue::Hash(BTreeMap::new()),
            ttl: None,
        });
        if let StoredValue::Hash(h) = &mut slot.value {
            h.insert(field.to_string(), value.to_vec());
        }
    }

    /// Delete field `field` of hash `key`.
    pub fn remove_field(&self, db: u32, key: &str, field: &str) {
        let mut st = self.state.lock();
        if let Some(Slot {
            value: StoredValue::Hash(h),
            ..
        }) = st.dbs.get_mut(&db).and_then(|m| m.get_mut(key))
        {
            h.remove(field);
        }
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    fn open_link(&self, opts: &ConnectOptions) -> Result<u64> {
        let mut st = self.state.lock();
        if !st.available {
            return Err(StoreError::Connect {
                endpoint: opts.endpoint(),
                reason: "connection refused".to_string(),
            });
        }
        st.opened += 1;
        Ok(st.generation)
    }

    fn execute(&self, link: &mut MemoryLink, cmd: &Command) -> Result<Reply> {
        let latency = self.state.lock().latency;
        if !latency.is_zero() {
            thread::sleep(latency);
        }
        let mut st = self.state.lock();
        if !st.available || st.generation != link.generation {
            return Err(StoreError::Io("connection reset by peer".to_string()));
        }
        *st.counts.entry(cmd.name()).or_insert(0) += 1;
        if let Some(pos) = st.one_shot_failures.iter().position(|n| *n == cmd.name()) {
            st.one_shot_failures.remove(pos);
            return Err(StoreError::Server(format!("ERR injected failure for {}", cmd.name())));
        }
        if let Some(pw) = &st.password {
            if !link.authenticated && !matches!(cmd, Command::Auth(_)) {
                return Err(StoreError::Server("NOAUTH Authentication required.".to_string()));
            }
            if let Command::Auth(given) = cmd {
                if given != pw {
                    return Err(StoreError::Server("WRONGPASS invalid password".to_string()));
                }
                link.authenticated = true;
                return Ok(ok());
            }
        }
        st.apply(link, cmd)
    }
}

fn ok() -> Reply {
    Reply::Status("OK".to_string())
}

fn wrong_type() -> StoreError {
    StoreError::Server("WRONGTYPE Operation against a key holding the wrong kind of value".to_string())
}

fn bulk_text(s: &str) -> Reply {
    Reply::Bulk(s.as_bytes().to_vec())
}

/// Glob match supporting `*` only.
fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }
    let (first, last) = (parts[0], parts[parts.len() - 1]);
    if !text.starts_with(first) || text.len() < first.len() + last.len() || !text.ends_with(last) {
        return false;
    }
    let mut rest = &text[first.len()..text.len() - last.len()];
    for mid in &parts[1..parts.len() - 1] {
        match rest.find(mid) {
            Some(at) => rest = &rest[at + mid.len()..],
            None => return false,
        }
    }
    true
}

impl State {
    fn keyspace(&mut self, db: u32) -> &mut BTreeMap<String, Slot> {
        self.dbs.entry(db).or_default()
    }

    fn notify(&mut self, db: u32, key: &str, op: &str) {
        let channel = format!("__keyspace@{}__:{}", db, key);
        self.subscribers.retain(|sub| {
            for pattern in &sub.patterns {
                if glob_match(pattern, &channel) {
                    let msg = vec!["pmessage".to_string(), pattern.clone(), channel.clone(), op.to_string()];
                    return sub.tx.send(msg).is_ok();
                }
            }
            true
        });
    }

    fn apply(&mut self, link: &mut MemoryLink, cmd: &Command) -> Result<Reply> {
        let db = link.db;
        match cmd {
            Command::Auth(_) => Err(StoreError::Server(
                "ERR Client sent AUTH, but no password is set".to_string(),
            )),
            Command::Ping => Ok(Reply::Status("PONG".to_string())),
            Command::Select(n) => {
                link.db = *n;
                Ok(ok())
            }
            Command::Info => {
                let role = match self.role {
                    Role::Replica => "slave",
                    _ => "master",
                };
                Ok(bulk_text(&format!("# Replication\r\nrole:{}\r\nconnected_slaves:0\r\n", role)))
            }
            Command::Type(key) => {
                let t = self.keyspace(db).get(key).map_or("none", |s| s.value.type_name());
                Ok(Reply::Status(t.to_string()))
            }
            Command::Del(keys) => {
                let mut removed = 0;
                for key in keys {
                    if self.keyspace(db).remove(key).is_some() {
                        removed += 1;
                        self.notify(db, key, "del");
                    }
                }
                Ok(Reply::Int(removed))
            }
            Command::HSet { key, fields } => {
                if fields.is_empty() {
                    return Err(StoreError::Server(
                        "ERR wrong number of arguments for 'hset' command".to_string(),
                    ));
                }
                let slot = self.keyspace(db).entry(key.clone()).or_insert(Slot {
                    value: StoredValue::Hash(BTreeMap::new()),
                    ttl: None,
                });
                let StoredValue::Hash(h) = &mut slot.value else {
                    return Err(wrong_type());
                };
                let mut added = 0;
                for (f, v) in fields {
                    if h.insert(f.clone(), v.clone()).is_none() {
                        added += 1;
                    }
                }
                self.notify(db, key, "hset");
                Ok(Reply::Int(added))
            }
            Command::HGetAll(key) => match self.keyspace(db).get(key).map(|s| &s.value) {
                None => Ok(Reply::Array(Vec::new())),
                Some(StoredValue::Hash(h)) => Ok(Reply::Array(
                    h.iter()
                        .flat_map(|(f, v)| [bulk_text(f), Reply::Bulk(v.clone())])
                        .collect(),
                )),
                Some(_) => Err(wrong_type()),
            },
            Command::HMGet { key, fields } => match self.keyspace(db).get(key).map(|s| &s.value) {
                None => Ok(Reply::Array(fields.iter().map(|_| Reply::Nil).collect())),
                Some(StoredValue::Hash(h)) => Ok(Reply::Array(
                    fields
                        .iter()
                        .map(|f| h.get(f).map_or(Reply::Nil, |v| Reply::Bulk(v.clone())))
                        .collect(),
                )),
                Some(_) => Err(wrong_type()),
            },
            Command::Exists(key) => Ok(Reply::Int(self.keyspace(db).contains_key(key) as i64)),
            Command::RPush { key, values } => {
                if values.is_empty() {
                    return Err(StoreError::Server(
                        "ERR wrong number of arguments for 'rpush' command".to_string(),
                    ));
                }
                let slot = self.keyspace(db).entry(key.clone()).or_insert(Slot {
                    value: StoredValue::List(Vec::new()),
                    ttl: None,
                });
                let StoredValue::List(l) = &mut slot.value else {
                    return Err(wrong_type());
                };
                l.extend(values.iter().cloned());
                let len = l.len() as i64;
                self.notify(db, key, "rpush");
                Ok(Reply::Int(len))
            }
            Command::LRange { key, start, stop } => match self.keyspace(db).get(key).map(|s| &s.value) {
                None => Ok(Reply::Array(Vec::new())),
                Some(StoredValue::List(l)) => {
                    let len = l.len() as i64;
                    let norm = |i: i64| if i < 0 { (len + i).max(0) } else { i };
                    let (from, to) = (norm(*start), norm(*stop).min(len - 1));
                    if len == 0 || from > to {
                        return Ok(Reply::Array(Vec::new()));
                    }
                    Ok(Reply::Array(
                        l[from as usize..=to as usize]
                            .iter()
                            .map(|v| Reply::Bulk(v.clone()))
                            .collect(),
                    ))
                }
                Some(_) => Err(wrong_type()),
            },
            Command::SAdd { key, members } => {
                let slot = self.keyspace(db).entry(key.clone()).or_insert(Slot {
                    value: StoredValue::Set(BTreeSet::new()),
                    ttl: None,
                });
                let StoredValue::Set(s) = &mut slot.value else {
                    return Err(wrong_type());
                };
                let added = members.iter().filter(|m| s.insert((*m).clone())).count() as i64;
                if added > 0 {
                    self.notify(db, key, "sadd");
                }
                Ok(Reply::Int(added))
            }
            Command::SRem { key, members } => {
                let ks = self.keyspace(db);
                let (removed, empty) = match ks.get_mut(key).map(|s| &mut s.value) {
                    None => return Ok(Reply::Int(0)),
                    Some(StoredValue::Set(s)) => {
                        let removed = members.iter().filter(|m| s.remove(*m)).count() as i64;
                        (removed, s.is_empty())
                    }
                    Some(_) => return Err(wrong_type()),
                };
                if empty {
                    ks.remove(key);
                }
                if removed > 0 {
                    self.notify(db, key, "srem");
                }
                Ok(Reply::Int(removed))
            }
            Command::SMembers(key) => match self.keyspace(db).get(key).map(|s| &s.value) {
                None => Ok(Reply::Array(Vec::new())),
                Some(StoredValue::Set(s)) => Ok(Reply::Array(s.iter().map(|m| bulk_text(m)).collect())),
                Some(_) => Err(wrong_type()),
            },
            Command::Keys(pattern) => Ok(Reply::Array(
                self.keyspace(db)
                    .keys()
                    .filter(|k| glob_match(pattern, k))
                    .map(|k| bulk_text(k))
                    .collect(),
            )),
            Command::Get(key) => match self.keyspace(db).get(key).map(|s| &s.value) {
                None => Ok(Reply::Nil),
                Some(StoredValue::Str(v)) => Ok(Reply::Bulk(v.clone())),
                Some(_) => Err(wrong_type()),
            },
            Command::Set { key, value } => {
                self.keyspace(db).insert(
                    key.clone(),
                    Slot {
                        value: StoredValue::Str(value.clone()),
                        ttl: None,
                    },
                );
                self.notify(db, key, "set");
                Ok(ok())
            }
            Command::Expire { key, secs } => match self.keyspace(db).get_mut(key) {
                None => Ok(Reply::Int(0)),
                Some(slot) => {
                    slot.ttl = Some(*secs);
                    self.notify(db, key, "expire");
                    Ok(Reply::Int(1))
                }
            },
            Command::PSubscribe(_) | Command::PUnsubscribe(_) => Err(StoreError::Server(
                "ERR only allowed in subscribe context".to_string(),
            )),
        }
    }
}

struct MemoryLink {
    db: u32,
    generation: u64,
    authenticated: bool,
}

/// Request/response transport into a [`MemoryStore`].
pub struct MemoryTransport {
    store: MemoryStore,
    link: MemoryLink,
}

impl Transport for MemoryTransport {
    fn request(&mut self, cmd: &Command) -> Result<Reply> {
        self.store.execute(&mut self.link, cmd)
    }

    /// Every queued command runs; the first error is reported.
    fn pipeline(&mut self, cmds: &[Command]) -> Result<Vec<Reply>> {
        let replies: Vec<Result<Reply>> = cmds.iter().map(|c| self.store.execute(&mut self.link, c)).collect();
        replies.into_iter().collect()
    }
}

/// Subscription transport into a [`MemoryStore`].
pub struct MemorySubscription {
    store: MemoryStore,
    id: u64,
    generation: u64,
    rx: Receiver<Vec<String>>,
}

impl MemorySubscription {
    fn check_live(&self) -> Result<()> {
        let st = self.store.state.lock();
        if !st.available || st.generation != self.generation {
            return Err(StoreError::Io("connection reset by peer".to_string()));
        }
        Ok(())
    }
}

impl Subscription for MemorySubscription {
    fn psubscribe(&mut self, pattern: &str) -> Result<()> {
        self.check_live()?;
        let mut st = self.store.state.lock();
        *st.counts.entry("PSUBSCRIBE").or_insert(0) += 1;
        if let Some(sub) = st.subscribers.iter_mut().find(|s| s.id == self.id) {
            sub.patterns.push(pattern.to_string());
        }
        Ok(())
    }

    fn punsubscribe_all(&mut self) -> Result<()> {
        self.check_live()?;
        let mut st = self.store.state.lock();
        *st.counts.entry("PUNSUBSCRIBE").or_insert(0) += 1;
        if let Some(sub) = st.subscribers.iter_mut().find(|s| s.id == self.id) {
            sub.patterns.clear();
        }
        Ok(())
    }

    fn next_message(&mut self, timeout: Duration) -> Result<Option<Vec<String>>> {
        self.check_live()?;
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => Ok(Some(msg)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(StoreError::Io("subscription closed".to_string())),
        }
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        let id = self.id;
        self.store.state.lock().subscribers.retain(|s| s.id != id);
    }
}

impl Connector for MemoryStore {
    fn open(&self, opts: &ConnectOptions) -> Result<Box<dyn Transport>> {
        let generation = self.open_link(opts)?;
        Ok(Box::new(MemoryTransport {
            store: self.clone(),
            link: MemoryLink {
                db: 0,
                generation,
                authenticated: false,
            },
        }))
    }

    fn subscribe(&self, opts: &ConnectOptions) -> Result<Box<dyn Subscription>> {
        let generation = self.open_link(opts)?;
        let mut st = self.state.lock();
        if let Some(pw) = &st.password {
            if opts.auth.as_deref() != Some(pw.as_str()) {
                return Err(StoreError::Auth {
                    endpoint: opts.endpoint(),
                    reason: "WRONGPASS invalid password".to_string(),
                });
            }
        }
        let (tx, rx) = channel();
        let id = st.next_subscriber;
        st.next_subscriber += 1;
        st.subscribers.push(Subscriber {
            id,
            patterns: Vec::new(),
            tx,
        });
        Ok(Box::new(MemorySubscription {
            store: self.clone(),
            id,
            generation,
            rx,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(store: &MemoryStore) -> Box<dyn Transport> {
        store.open(&ConnectOptions::new("mem", 0)).unwrap()
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("__keyspace@0__:notifier-*", "__keyspace@0__:notifier-abc"));
        assert!(!glob_match("__keyspace@0__:notifier-*", "__keyspace@1__:notifier-abc"));
        assert!(glob_match("json-*", "json-"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("a*b*c", "axxbyyc"));
        assert!(!glob_match("a*b*c", "axxc"));
        assert!(glob_match("calls", "calls"));
    }

    #[test]
    fn test_hash_roundtrip_and_missing() {
        let store = MemoryStore::new();
        let mut t = transport(&store);
        t.request(&Command::HSet {
            key: "h".to_string(),
            fields: vec![("a".to_string(), b"1".to_vec())],
        })
        .unwrap();
        let pairs = t.request(&Command::HGetAll("h".to_string())).unwrap().into_pairs().unwrap();
        assert_eq!(pairs, vec![("a".to_string(), b"1".to_vec())]);
        let missing = t.request(&Command::HGetAll("nope".to_string())).unwrap();
        assert_eq!(missing, Reply::Array(Vec::new()));
        assert_eq!(t.request(&Command::Exists("nope".to_string())).unwrap(), Reply::Int(0));
    }

    #[test]
    fn test_select_isolates_databases() {
        let store = MemoryStore::new();
        let mut t = transport(&store);
        t.request(&Command::Select(2)).unwrap();
        t.request(&Command::Set {
            key: "k".to_string(),
            value: b"v".to_vec(),
        })
        .unwrap();
        assert!(store.exists(2, "k"));
        assert!(!store.exists(0, "k"));
    }

    #[test]
    fn test_lrange_negative_stop() {
        let store = MemoryStore::new();
        let mut t = transport(&store);
        t.request(&Command::RPush {
            key: "l".to_string(),
            values: vec![b"0".to_vec(), b"1".to_vec(), b"2".to_vec()],
        })
        .unwrap();
        let all = t
            .request(&Command::LRange {
                key: "l".to_string(),
                start: 0,
                stop: -1,
            })
            .unwrap()
            .into_byte_list()
            .unwrap();
        assert_eq!(all, vec![b"0".to_vec(), b"1".to_vec(), b"2".to_vec()]);
    }

    #[test]
    fn test_wrong_type_is_error_reply() {
        let store = MemoryStore::new();
        let mut t = transport(&store);
        t.request(&Command::SAdd {
            key: "s".to_string(),
            members: vec!["x".to_string()],
        })
        .unwrap();
        let err = t.request(&Command::HGetAll("s".to_string())).unwrap_err();
        assert!(matches!(err, StoreError::Server(m) if m.starts_with("WRONGTYPE")));
    }

    #[test]
    fn test_drop_connections_breaks_transport() {
        let store = MemoryStore::new();
        let mut t = transport(&store);
        store.drop_connections();
        assert!(matches!(t.request(&Command::Ping), Err(StoreError::Io(_))));
        let mut fresh = transport(&store);
        assert!(fresh.request(&Command::Ping).is_ok());
    }

    #[test]
    fn test_keyspace_notification_delivery() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe(&ConnectOptions::new("mem", 0)).unwrap();
        sub.psubscribe("__keyspace@0__:notifier-*").unwrap();
        let mut t = transport(&store);
        t.request(&Command::SAdd {
            key: "notifier-c1".to_string(),
            members: vec!["c1".to_string()],
        })
        .unwrap();
        t.request(&Command::SAdd {
            key: "other".to_string(),
            members: vec!["c1".to_string()],
        })
        .unwrap();
        let msg = sub.next_message(Duration::from_millis(100)).unwrap().unwrap();
        assert_eq!(msg[2], "__keyspace@0__:notifier-c1");
        assert_eq!(msg[3], "sadd");
        assert!(sub.next_message(Duration::from_millis(10)).unwrap().is_none());
    }

    #[test]
    fn test_pipeline_runs_past_error_reply() {
        let store = MemoryStore::new();
        let mut t = transport(&store);
        let cmds = vec![
            Command::Set {
                key: "s".to_string(),
                value: b"v".to_vec(),
            },
            Command::LRange {
                key: "s".to_string(),
                start: 0,
                stop: -1,
            },
            Command::Set {
                key: "after".to_string(),
                value: b"v".to_vec(),
            },
        ];
        let err = t.pipeline(&cmds).unwrap_err();
        assert!(matches!(err, StoreError::Server(m) if m.starts_with("WRONGTYPE")));
        assert!(store.exists(0, "after"));
    }

    #[test]
    fn test_fail_next_is_one_shot() {
        let store = MemoryStore::new();
        let mut t = transport(&store);
        store.fail_next("PING");
        assert!(matches!(t.request(&Command::Ping), Err(StoreError::Server(_))));
        assert!(t.request(&Command::Ping).is_ok());
    }
}
