//! Change-notification listener
//!
//! Follows keyspace notifications of peer instances and mirrors their calls
//! into the local call table as foreign calls.
//!
//! Two threads run per listener:
//!
//! - the listener thread waits for messages and handles them one at a time
//! - the supervisor thread checks once a second whether the subscription
//!   is alive (or the keyspace list changed) and rebuilds it if not
//!
//! Both poll a shared shutdown flag; on shutdown the listener drops every
//! pattern subscription.
//!
//! ## Dispatch
//!
//! | operation | local call | action |
//! |---|---|---|
//! | `sadd`, `set` | none | restore as foreign |
//! | `sadd`, `set` | foreign | destroy, restore again |
//! | `sadd`, `set` | own | ignored |
//! | `del` | foreign | destroy |
//! | `del` | own or none | ignored |

use crate::restore::RestoreContext;
use parking_lot::{Mutex, RwLock};
use relaystate_core::{CallId, CallType};
use relaystate_durability::StorageMode;
use relaystate_store::{ConnectionState, StoreConnection, StoreError, Subscription};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Prefix of every keyspace-notification channel.
const KEYSPACE_PREFIX: &str = "__keyspace@";

/// How long the listener waits for one message before polling shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How often the supervisor checks the subscription.
const SUPERVISE_INTERVAL: Duration = Duration::from_secs(1);

/// One parsed keyspace notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Logical database of the key
    pub db: u32,
    /// Call id taken from the key
    pub id: CallId,
    /// Operation that touched the key
    pub op: NotifyOp,
}

/// Operations the listener reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOp {
    /// Marker added or document written
    Added,
    /// Key removed
    Deleted,
}

/// Why a message was not turned into a [`Notification`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Skip {
    /// Not a 4-part pattern message
    Malformed(String),
    /// Key of another storage mode or unrelated key
    ForeignKey(String),
    /// Operation the listener does not handle
    Ignored(String),
}

/// Parse `["pmessage", pattern, channel, operation]`.
pub fn parse_message(mode: StorageMode, msg: &[String]) -> Result<Notification, Skip> {
    let [kind, _pattern, channel, op] = msg else {
        return Err(Skip::Malformed(format!("{} elements", msg.len())));
    };
    if kind != "pmessage" {
        return Err(Skip::Malformed(format!("message type '{}'", kind)));
    }
    let rest = channel
        .strip_prefix(KEYSPACE_PREFIX)
        .ok_or_else(|| Skip::Malformed(format!("channel '{}'", channel)))?;
    let (db, key) = rest
        .split_once("__:")
        .ok_or_else(|| Skip::Malformed(format!("channel '{}'", channel)))?;
    let db = db
        .parse::<u32>()
        .map_err(|_| Skip::Malformed(format!("database in channel '{}'", channel)))?;
    let id = key
        .strip_prefix(mode.notify_prefix())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Skip::ForeignKey(key.to_string()))?;
    let op = match op.as_str() {
        "sadd" | "set" => NotifyOp::Added,
        "del" => NotifyOp::Deleted,
        other => return Err(Skip::Ignored(other.to_string())),
    };
    Ok(Notification {
        db,
        id: CallId::new(id),
        op,
    })
}

struct Shared {
    ctx: Arc<RestoreContext>,
    conn: StoreConnection,
    mode: StorageMode,
    keyspaces: RwLock<Vec<u32>>,
    subscription: Mutex<Option<Box<dyn Subscription>>>,
    resubscribe: AtomicBool,
    shutdown: AtomicBool,
}

impl Shared {
    fn handle(&self, note: Notification) {
        debug!(target: "relaystate::notify", call_id = %note.id, db = note.db, op = ?note.op, "Notification");
        match note.op {
            NotifyOp::Added => self.on_added(note.db, &note.id),
            NotifyOp::Deleted => self.on_deleted(&note.id),
        }
    }

    fn on_added(&self, db: u32, id: &CallId) {
        if let Some(existing) = self.ctx.table.lookup(id) {
            if !existing.is_foreign() {
                info!(target: "relaystate::notify", call_id = %id, "Ignoring update of own call");
                return;
            }
            self.ctx.table.destroy(&existing);
        }
        {
            let mut session = self.conn.session();
            if session.check_connection() == ConnectionState::Disconnected {
                warn!(target: "relaystate::notify", call_id = %id, "Store not connected, cannot restore foreign call");
                return;
            }
            if let Err(e) = session.select(db) {
                warn!(target: "relaystate::notify", call_id = %id, db, error = %e, "Failed to select database");
                return;
            }
        }
        match self.ctx.restore_one(&self.conn, id, CallType::Foreign) {
            Ok(_) => debug!(target: "relaystate::notify", call_id = %id, "Foreign call restored"),
            Err(e) => warn!(target: "relaystate::notify", call_id = %id, error = %e, "Failed to restore foreign call"),
        }
    }

    fn on_deleted(&self, id: &CallId) {
        match self.ctx.table.lookup(id) {
            None => debug!(target: "relaystate::notify", call_id = %id, "Deleted call not known here"),
            Some(handle) if !handle.is_foreign() => {
                warn!(target: "relaystate::notify", call_id = %id, "Ignoring delete of own call");
            }
            Some(handle) => {
                self.ctx.table.destroy(&handle);
                debug!(target: "relaystate::notify", call_id = %id, "Foreign call destroyed");
            }
        }
    }

    fn subscribe(&self) -> Result<Box<dyn Subscription>, StoreError> {
        let mut sub = self.conn.subscribe()?;
        let keyspaces = self.keyspaces.read();
        for db in keyspaces.iter() {
            sub.psubscribe(&self.mode.subscribe_pattern(*db))?;
        }
        info!(target: "relaystate::notify", keyspaces = ?*keyspaces, "Subscribed to keyspace notifications");
        Ok(sub)
    }

    fn supervise_once(&self) {
        let mut current = self.subscription.lock();
        let resubscribe = self.resubscribe.swap(false, Ordering::AcqRel);
        if current.is_some() && !resubscribe {
            return;
        }
        *current = None;
        match self.subscribe() {
            Ok(sub) => *current = Some(sub),
            Err(e) => {
                debug!(target: "relaystate::notify", error = %e, "Subscribe failed, retrying");
                if resubscribe {
                    self.resubscribe.store(true, Ordering::Release);
                }
            }
        }
    }

    fn listen_once(&self) {
        let mut slot = self.subscription.lock();
        let Some(sub) = slot.as_mut() else {
            drop(slot);
            thread::sleep(POLL_INTERVAL);
            return;
        };
        match sub.next_message(POLL_INTERVAL) {
            Ok(None) => {}
            Ok(Some(msg)) => {
                drop(slot);
                match parse_message(self.mode, &msg) {
                    Ok(note) => self.handle(note),
                    Err(Skip::Malformed(what)) => {
                        warn!(target: "relaystate::notify", what = %what, "Malformed notification");
                    }
                    Err(skip) => debug!(target: "relaystate::notify", ?skip, "Notification skipped"),
                }
            }
            Err(e) => {
                warn!(target: "relaystate::notify", error = %e, "Lost notification subscription");
                *slot = None;
            }
        }
    }
}

/// Running change-notification listener.
pub struct Notifier {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

impl Notifier {
    /// Subscribe to `keyspaces` and start the listener and supervisor.
    ///
    /// `conn` is used for restores; subscriptions are opened to the same
    /// server. A failed initial subscribe is retried by the supervisor.
    pub fn start(
        ctx: Arc<RestoreContext>,
        conn: StoreConnection,
        mode: StorageMode,
        keyspaces: Vec<u32>,
    ) -> Notifier {
        let shared = Arc::new(Shared {
            ctx,
            conn,
            mode,
            keyspaces: RwLock::new(keyspaces),
            subscription: Mutex::new(None),
            resubscribe: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        });
        shared.supervise_once();

        let listener = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("relaystate-notify".to_string())
                .spawn(move || {
                    while !shared.shutdown.load(Ordering::Acquire) {
                        shared.listen_once();
                    }
                    if let Some(mut sub) = shared.subscription.lock().take() {
                        if let Err(e) = sub.punsubscribe_all() {
                            debug!(target: "relaystate::notify", error = %e, "Unsubscribe on shutdown failed");
                        }
                    }
                })
                .expect("failed to spawn notification thread")
        };
        let supervisor = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("relaystate-notify-sup".to_string())
                .spawn(move || {
                    while !shared.shutdown.load(Ordering::Acquire) {
                        let mut elapsed = Duration::ZERO;
                        while elapsed < SUPERVISE_INTERVAL {
                            if shared.shutdown.load(Ordering::Acquire) {
                                return;
                            }
                            thread::sleep(POLL_INTERVAL);
                            elapsed += POLL_INTERVAL;
                        }
                        shared.supervise_once();
                    }
                })
                .expect("failed to spawn notification supervisor thread")
        };

        Notifier {
            shared,
            threads: vec![listener, supervisor],
        }
    }

    /// Whether a subscription is currently live.
    pub fn is_subscribed(&self) -> bool {
        self.shared.subscription.lock().is_some()
    }

    /// Logical databases currently followed.
    pub fn keyspaces(&self) -> Vec<u32> {
        self.shared.keyspaces.read().clone()
    }

    /// Start following database `db`.
    pub fn add_keyspace(&self, db: u32) {
        let mut keyspaces = self.shared.keyspaces.write();
        if !keyspaces.contains(&db) {
            keyspaces.push(db);
            self.shared.resubscribe.store(true, Ordering::Release);
        }
    }

    /// Stop following database `db`.
    pub fn remove_keyspace(&self, db: u32) {
        let mut keyspaces = self.shared.keyspaces.write();
        let before = keyspaces.len();
        keyspaces.retain(|k| *k != db);
        if keyspaces.len() != before {
            self.shared.resubscribe.store(true, Ordering::Release);
        }
    }

    /// Stop both threads and drop the subscription.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.stop();
    }
}
