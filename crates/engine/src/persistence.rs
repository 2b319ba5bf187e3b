//! Persistence facade
//!
//! [`Persistence`] owns the store connections and ties the call table to
//! the durability layer. `persist` and `delete` are best-effort: failures
//! are logged and reported, never propagated into call processing.
//!
//! # Lock order
//!
//! call lock → store session. `persist` and `delete` hold the call's read
//! lock across the whole batch; restore holds the write lock and locks the
//! store session once per fetch.

use crate::config::PersistConfig;
use crate::error::EngineResult;
use crate::notifier::Notifier;
use crate::restore::{restore_all, RestoreContext, RestoreSummary};
use relaystate_core::{CallHandle, CallId, CallTable, CallType, InterfaceRegistry};
use relaystate_durability::{CallSnapshot, KindCounts, PersistError, PersistResult, RestoreResult, Writer};
use relaystate_store::{ConnectionState, Connector, StoreConnection, StoreSession};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Result of a best-effort write.
#[derive(Debug)]
pub enum PersistOutcome {
    /// The batch was flushed
    Written,
    /// Nothing was sent: the store is down, or the call is foreign or destroyed
    Skipped,
    /// The batch failed; the connection was dropped
    Failed(PersistError),
}

impl PersistOutcome {
    /// Whether the batch was flushed.
    pub fn is_written(&self) -> bool {
        matches!(self, PersistOutcome::Written)
    }
}

/// Store-backed persistence of the call table.
pub struct Persistence {
    config: PersistConfig,
    connector: Arc<dyn Connector>,
    ctx: Arc<RestoreContext>,
    main: StoreConnection,
    write: Option<StoreConnection>,
}

impl Persistence {
    /// Open the main connection and, if configured, the write connection.
    pub fn connect(
        config: PersistConfig,
        connector: Arc<dyn Connector>,
        table: Arc<CallTable>,
        interfaces: Arc<dyn InterfaceRegistry>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let main = StoreConnection::connect(Arc::clone(&connector), config.store.connect_options())?;
        let write = match &config.write {
            Some(w) => Some(StoreConnection::connect(Arc::clone(&connector), w.connect_options())?),
            None => None,
        };
        let ctx = Arc::new(RestoreContext {
            table,
            interfaces,
            writer: Writer::new(config.mode, config.expires_secs),
        });
        info!(target: "relaystate::persist", mode = %config.mode, endpoint = %main.options().endpoint(), "Persistence ready");
        Ok(Persistence {
            config,
            connector,
            ctx,
            main,
            write,
        })
    }

    /// Configuration in use.
    pub fn config(&self) -> &PersistConfig {
        &self.config
    }

    /// The call table restored calls go into.
    pub fn table(&self) -> &Arc<CallTable> {
        &self.ctx.table
    }

    fn write_conn(&self) -> &StoreConnection {
        self.write.as_ref().unwrap_or(&self.main)
    }

    /// Lock the write connection and select `db`; `None` when disconnected.
    fn write_session(&self, db: u32) -> PersistResult<Option<StoreSession<'_>>> {
        let mut session = self.write_conn().session();
        if session.check_connection() == ConnectionState::Disconnected {
            return Ok(None);
        }
        if session.db() != db {
            session.select(db)?;
        }
        Ok(Some(session))
    }

    /// Write the current state of `handle` to the store.
    pub fn persist(&self, handle: &CallHandle) -> PersistOutcome {
        if handle.is_foreign() {
            return PersistOutcome::Skipped;
        }
        let call = handle.state().read();
        if handle.is_destroyed() {
            debug!(target: "relaystate::persist", call_id = %handle.id(), "Call destroyed, not persisted");
            return PersistOutcome::Skipped;
        }
        let db = self.write_conn().options().db;
        let result = self.write_session(db).and_then(|session| match session {
            None => Ok(false),
            Some(mut session) => {
                handle.set_hosted_db(db);
                let snapshot = CallSnapshot::capture(&call, db);
                self.ctx.writer.write(&mut session, &snapshot).map(|_| true)
            }
        });
        outcome(handle.id(), "persist", result)
    }

    /// Remove every stored key of `handle`.
    pub fn delete(&self, handle: &CallHandle) -> PersistOutcome {
        if handle.is_foreign() {
            return PersistOutcome::Skipped;
        }
        let call = handle.state().read();
        let result = self.write_session(handle.hosted_db()).and_then(|session| match session {
            None => Ok(false),
            Some(mut session) => {
                let counts = KindCounts::of_call(&call);
                self.ctx.writer.delete(&mut session, &call.id, counts).map(|_| true)
            }
        });
        outcome(handle.id(), "delete", result)
    }

    /// Restore every persisted call with the configured parallelism.
    pub fn restore_all(&self) -> EngineResult<RestoreSummary> {
        Ok(restore_all(&self.ctx, &self.main, self.config.restore_threads)?)
    }

    /// Restore one call through the main connection.
    pub fn restore_one(&self, id: &CallId, call_type: CallType) -> RestoreResult<Arc<CallHandle>> {
        self.ctx.restore_one(&self.main, id, call_type)
    }

    /// Forget every persisted call.
    pub fn wipe(&self) -> EngineResult<()> {
        let mut session = self.main.session();
        if session.check_connection() == ConnectionState::Disconnected {
            return Ok(());
        }
        self.ctx.writer.wipe(&mut session)?;
        info!(target: "relaystate::persist", "Wiped persisted calls");
        Ok(())
    }

    /// Start the change-notification listener when `[notify]` is configured.
    pub fn start_notifier(&self) -> EngineResult<Option<Notifier>> {
        let Some(notify) = &self.config.notify else {
            return Ok(None);
        };
        let conn = StoreConnection::connect(Arc::clone(&self.connector), notify.store.connect_options())?;
        Ok(Some(Notifier::start(
            Arc::clone(&self.ctx),
            conn,
            self.config.mode,
            notify.keyspaces.clone(),
        )))
    }
}

fn outcome(id: &CallId, what: &str, result: PersistResult<bool>) -> PersistOutcome {
    match result {
        Ok(true) => PersistOutcome::Written,
        Ok(false) => {
            debug!(target: "relaystate::persist", call_id = %id, what, "Store not connected, skipped");
            PersistOutcome::Skipped
        }
        Err(e) => {
            error!(target: "relaystate::persist", call_id = %id, what, error = %e, "Store write failed");
            PersistOutcome::Failed(e)
        }
    }
}
