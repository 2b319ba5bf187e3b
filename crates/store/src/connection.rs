//! Store connection with role check, health check and pipelining
//!
//! A [`StoreConnection`] owns at most one live transport behind a mutex. All
//! command execution goes through a [`StoreSession`], the guard of that
//! mutex. Pipelined commands are buffered in the session and flushed by
//! [`StoreSession::consume`]; a synchronous request always flushes pending
//! commands first.
//!
//! Any command failure drops the transport. The next
//! [`StoreSession::check_connection`] reconnects.

use crate::command::{Command, Reply};
use crate::error::{Result, StoreError};
use crate::options::{ConnectOptions, Role};
use crate::transport::{Connector, Subscription, Transport};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

/// Outcome of a connection health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// The existing transport answered
    Connected,
    /// No transport, and reconnecting failed
    Disconnected,
    /// The transport was replaced by a fresh one
    Reconnected,
}

struct Link {
    transport: Option<Box<dyn Transport>>,
    pending: Vec<Command>,
    connected: bool,
    db: u32,
}

/// One connection to the store.
pub struct StoreConnection {
    connector: Arc<dyn Connector>,
    opts: ConnectOptions,
    link: Mutex<Link>,
}

impl std::fmt::Debug for StoreConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConnection")
            .field("endpoint", &self.opts.endpoint())
            .field("db", &self.opts.db)
            .finish()
    }
}

impl StoreConnection {
    /// Connect and run the handshake.
    ///
    /// The role check may query up to `opts.role_wait + 1` times. When
    /// `opts.optional` is set a failed connect yields a disconnected
    /// connection instead of an error.
    pub fn connect(connector: Arc<dyn Connector>, opts: ConnectOptions) -> Result<Self> {
        let mut link = Link {
            transport: None,
            pending: Vec::new(),
            connected: false,
            db: opts.db,
        };
        match handshake(&*connector, &opts, opts.role_wait) {
            Ok(t) => {
                info!(target: "relaystate::store", endpoint = %opts.endpoint(), "Established initial connection to store");
                link.transport = Some(t);
                link.connected = true;
            }
            Err(e) if opts.optional => {
                warn!(target: "relaystate::store", endpoint = %opts.endpoint(), error = %e,
                    "Starting with no initial connection to store");
            }
            Err(e) => {
                error!(target: "relaystate::store", endpoint = %opts.endpoint(), error = %e,
                    "Failed to connect to store");
                return Err(e);
            }
        }
        Ok(StoreConnection {
            connector,
            opts,
            link: Mutex::new(link),
        })
    }

    /// Open another connection with the same options.
    pub fn duplicate(&self) -> Result<StoreConnection> {
        StoreConnection::connect(Arc::clone(&self.connector), self.opts.clone())
    }

    /// Open a subscription transport to the same server.
    pub fn subscribe(&self) -> Result<Box<dyn Subscription>> {
        self.connector.subscribe(&self.opts)
    }

    /// Options this connection was opened with.
    pub fn options(&self) -> &ConnectOptions {
        &self.opts
    }

    /// Lock the connection for a sequence of commands.
    pub fn session(&self) -> StoreSession<'_> {
        StoreSession {
            conn: self,
            link: self.link.lock(),
        }
    }

    /// Whether a transport is currently held. Does not probe the server.
    pub fn is_connected(&self) -> bool {
        self.link.lock().transport.is_some()
    }
}

/// Exclusive access to a [`StoreConnection`].
pub struct StoreSession<'a> {
    conn: &'a StoreConnection,
    link: MutexGuard<'a, Link>,
}

impl StoreSession<'_> {
    /// Probe the server, reconnecting once if it does not answer.
    ///
    /// Loss of the connection and its recovery are each logged once.
    pub fn check_connection(&mut self) -> ConnectionState {
        self.link.pending.clear();
        if let Some(t) = self.link.transport.as_mut() {
            if t.request(&Command::Ping).is_ok() {
                return ConnectionState::Connected;
            }
        }
        self.link.transport = None;

        let opts = &self.conn.opts;
        if self.link.connected {
            error!(target: "relaystate::store", endpoint = %opts.endpoint(), "Lost connection to store");
            self.link.connected = false;
        }

        match handshake(&*self.conn.connector, opts, 1) {
            Ok(t) => {
                self.link.transport = Some(t);
                self.link.db = opts.db;
                if !self.link.connected {
                    info!(target: "relaystate::store", endpoint = %opts.endpoint(), "Re-established connection to store");
                    self.link.connected = true;
                }
                ConnectionState::Reconnected
            }
            Err(e) => {
                debug!(target: "relaystate::store", endpoint = %opts.endpoint(), error = %e, "Reconnect failed");
                ConnectionState::Disconnected
            }
        }
    }

    /// Whether a transport is held.
    pub fn is_connected(&self) -> bool {
        self.link.transport.is_some()
    }

    /// Logical database currently selected.
    pub fn db(&self) -> u32 {
        self.link.db
    }

    /// Select logical database `db`.
    pub fn select(&mut self, db: u32) -> Result<()> {
        self.request(&Command::Select(db))?;
        self.link.db = db;
        Ok(())
    }

    /// Queue `cmd` for the next flush.
    pub fn pipe(&mut self, cmd: Command) {
        self.link.pending.push(cmd);
    }

    /// Number of queued commands.
    pub fn pending(&self) -> usize {
        self.link.pending.len()
    }

    /// Drop queued commands without sending them.
    pub fn discard(&mut self) {
        self.link.pending.clear();
    }

    /// Flush queued commands, discarding their replies.
    pub fn consume(&mut self) -> Result<()> {
        if self.link.pending.is_empty() {
            return Ok(());
        }
        let cmds = std::mem::take(&mut self.link.pending);
        let result = match self.link.transport.as_mut() {
            Some(t) => t.pipeline(&cmds).map(|_| ()),
            None => Err(StoreError::Disconnected),
        };
        if let Err(e) = &result {
            self.downgrade(e);
        }
        result
    }

    /// Flush queued commands, then run `cmd` and return its reply.
    pub fn request(&mut self, cmd: &Command) -> Result<Reply> {
        self.consume()?;
        let result = match self.link.transport.as_mut() {
            Some(t) => t.request(cmd),
            None => Err(StoreError::Disconnected),
        };
        if let Err(e) = &result {
            self.downgrade(e);
        }
        result
    }

    /// Run `cmds` as one pipeline and return every reply.
    pub fn request_many(&mut self, cmds: &[Command]) -> Result<Vec<Reply>> {
        self.consume()?;
        let result = match self.link.transport.as_mut() {
            Some(t) => t.pipeline(cmds),
            None => Err(StoreError::Disconnected),
        };
        if let Err(e) = &result {
            self.downgrade(e);
        }
        result
    }

    fn downgrade(&mut self, err: &StoreError) {
        if self.link.transport.take().is_some() {
            warn!(target: "relaystate::store", endpoint = %self.conn.opts.endpoint(), error = %err,
                "Store command failed, dropping connection");
        }
        self.link.pending.clear();
    }
}

/// Open a transport, authenticate, select the database and wait for the
/// wanted role.
fn handshake(connector: &dyn Connector, opts: &ConnectOptions, wait: u32) -> Result<Box<dyn Transport>> {
    let endpoint = opts.endpoint();
    let mut t = connector.open(opts)?;

    match &opts.auth {
        Some(pw) => {
            t.request(&Command::Auth(pw.clone()))
                .map_err(|e| StoreError::Auth {
                    endpoint: endpoint.clone(),
                    reason: e.to_string(),
                })?;
        }
        None => {
            t.request(&Command::Ping)?;
        }
    }
    t.request(&Command::Select(opts.db))?;

    let mut attempts = 0;
    while opts.role != Role::Any {
        attempts += 1;
        debug!(target: "relaystate::store", endpoint = %endpoint, "Asking store for its replication role");
        let info = t.request(&Command::Info)?.into_text()?;
        let reported = Role::from_info(&info).ok_or_else(|| StoreError::protocol("INFO reply without role"))?;
        if opts.role.accepts(reported) {
            info!(target: "relaystate::store", endpoint = %endpoint, role = %reported, "Connected to store");
            break;
        }
        info!(target: "relaystate::store", endpoint = %endpoint, role = %reported, wanted = %opts.role,
            "Store role differs from wanted role");
        if attempts > wait {
            return Err(StoreError::RoleMismatch {
                endpoint,
                wanted: opts.role,
                attempts,
            });
        }
        thread::sleep(opts.retry_delay);
    }

    check_calls_type(&mut *t);
    Ok(t)
}

/// Delete the call index set if something else lives under its key.
fn check_calls_type(t: &mut dyn Transport) {
    let kind = t
        .request(&Command::Type(CALLS_KEY.to_string()))
        .and_then(Reply::into_text);
    match kind {
        Ok(kind) if kind == "set" || kind == "none" => {}
        Ok(kind) => {
            warn!(target: "relaystate::store", key = CALLS_KEY, found = %kind, "Deleting call index of wrong type");
            if let Err(e) = t.request(&Command::del(CALLS_KEY)) {
                warn!(target: "relaystate::store", error = %e, "Failed to delete call index");
            }
        }
        Err(e) => warn!(target: "relaystate::store", error = %e, "Failed to check call index type"),
    }
}

/// Key of the set holding every persisted call id.
pub const CALLS_KEY: &str = "calls";
