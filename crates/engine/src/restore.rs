//! Per-call and bulk restore
//!
//! Bulk restore lists every persisted call, opens `N` extra store
//! connections into a mutex-guarded free list and runs one task per call on
//! an `N`-thread [`WorkerPool`]. Each task borrows one connection for the
//! duration of its call. A failed call is logged and, if owned by this
//! instance, purged from the store; the other calls are unaffected.

use crate::pool::WorkerPool;
use parking_lot::Mutex;
use relaystate_core::{CallHandle, CallId, CallTable, CallType, InterfaceRegistry};
use relaystate_durability::{
    BlobDocument, CallBuilder, MultiKeySource, PersistResult, RestoreError, RestoreResult, StorageMode, Writer,
};
use relaystate_store::{ConnectionState, StoreConnection, StoreError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// What restore needs besides a connection.
pub struct RestoreContext {
    /// Table restored calls are registered in
    pub table: Arc<CallTable>,
    /// Interface registry for socket and media interfaces
    pub interfaces: Arc<dyn InterfaceRegistry>,
    /// Writer used to list and purge stored calls
    pub writer: Writer,
}

impl RestoreContext {
    /// Restore call `id` through `conn`.
    ///
    /// A connection dropped by an earlier failed command is re-established
    /// first.
    pub fn restore_one(
        &self,
        conn: &StoreConnection,
        id: &CallId,
        call_type: CallType,
    ) -> RestoreResult<Arc<CallHandle>> {
        if conn.session().check_connection() == ConnectionState::Disconnected {
            return Err(RestoreError::Store(StoreError::Disconnected));
        }
        let builder = CallBuilder::new(&*self.interfaces);
        match self.writer.mode() {
            StorageMode::MultiKey => {
                let mut source = MultiKeySource::new(conn, id);
                builder.restore(&self.table, id, call_type, &mut source)
            }
            StorageMode::Json => {
                let mut doc = BlobDocument::load(conn, id)?.ok_or(RestoreError::NotFound)?;
                builder.restore(&self.table, id, call_type, &mut doc)
            }
        }
    }

    /// Restore an own call, purging its stored keys if it cannot be rebuilt.
    ///
    /// Returns whether the call was restored.
    pub fn restore_or_purge(&self, conn: &StoreConnection, id: &CallId) -> bool {
        match self.restore_one(conn, id, CallType::Own) {
            Ok(_) => true,
            Err(RestoreError::AlreadyExists) => {
                warn!(target: "relaystate::restore", call_id = %id, "Trying to restore an existing call, skipped");
                false
            }
            Err(e) => {
                error!(target: "relaystate::restore", call_id = %id, error = %e, "Failed to restore call");
                let mut session = conn.session();
                if session.check_connection() == ConnectionState::Disconnected {
                    warn!(target: "relaystate::restore", call_id = %id, "Store not connected, unrestorable call kept");
                    return false;
                }
                if let Err(purge) = self.writer.purge(&mut session, id) {
                    warn!(target: "relaystate::restore", call_id = %id, error = %purge, "Failed to purge unrestorable call");
                }
                false
            }
        }
    }
}

/// Outcome of a bulk restore.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    /// Calls listed in the store
    pub listed: usize,
    /// Calls rebuilt
    pub restored: usize,
    /// Calls skipped because they failed
    pub failed: usize,
}

/// Restore every persisted call using `threads` parallel connections.
///
/// A disconnected `main` store is not an error: nothing is restored.
pub fn restore_all(
    ctx: &Arc<RestoreContext>,
    main: &StoreConnection,
    threads: usize,
) -> PersistResult<RestoreSummary> {
    let ids = {
        let mut session = main.session();
        if session.check_connection() == ConnectionState::Disconnected {
            info!(target: "relaystate::restore", "Store not connected, skipping restore");
            return Ok(RestoreSummary::default());
        }
        ctx.writer.list_calls(&mut session)?
    };
    let mut summary = RestoreSummary {
        listed: ids.len(),
        ..RestoreSummary::default()
    };
    if ids.is_empty() {
        return Ok(summary);
    }

    let threads = threads.clamp(1, ids.len());
    let mut conns = Vec::with_capacity(threads);
    for _ in 0..threads {
        conns.push(main.duplicate()?);
    }
    let free = Arc::new(Mutex::new(conns));
    let restored = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));

    let started = Instant::now();
    info!(target: "relaystate::restore", calls = ids.len(), threads, mode = %ctx.writer.mode(), "Restoring calls");

    let pool = WorkerPool::new("relaystate-restore", threads, ids.len());
    for id in ids {
        let ctx = Arc::clone(ctx);
        let free = Arc::clone(&free);
        let restored = Arc::clone(&restored);
        let task_failed = Arc::clone(&failed);
        let task = move || {
            let Some(conn) = free.lock().pop() else {
                error!(target: "relaystate::restore", call_id = %id, "No free store connection");
                task_failed.fetch_add(1, Ordering::Relaxed);
                return;
            };
            if ctx.restore_or_purge(&conn, &id) {
                restored.fetch_add(1, Ordering::Relaxed);
            } else {
                task_failed.fetch_add(1, Ordering::Relaxed);
            }
            free.lock().push(conn);
        };
        if pool.submit(task).is_err() {
            failed.fetch_add(1, Ordering::Relaxed);
        }
    }
    pool.drain();
    pool.shutdown();
    free.lock().clear();

    summary.restored = restored.load(Ordering::Relaxed);
    summary.failed = failed.load(Ordering::Relaxed);
    info!(
        target: "relaystate::restore",
        restored = summary.restored,
        failed = summary.failed,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Restore finished"
    );
    debug!(target: "relaystate::restore", live_calls = ctx.table.len(), "Call table after restore");
    Ok(summary)
}
