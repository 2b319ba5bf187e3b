//! Process-wide call table
//!
//! Maps call ids to shared [`CallHandle`]s. Each handle carries the call's
//! read/write lock; the table's own shard locks are never held while a call
//! lock is taken.
//!
//! Lock order: table → call lock. A handle is cloned out of the table before
//! its lock is acquired.

use crate::call::{unix_now, Call};
use crate::types::{CallId, CallType};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Shared handle to one live call.
#[derive(Debug)]
pub struct CallHandle {
    id: CallId,
    call_type: CallType,
    hosted_db: AtomicU32,
    destroyed: AtomicBool,
    state: RwLock<Call>,
}

impl CallHandle {
    fn new(id: CallId, call_type: CallType) -> Self {
        CallHandle {
            state: RwLock::new(Call::new(id.clone(), unix_now())),
            id,
            call_type,
            hosted_db: AtomicU32::new(0),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Call id.
    pub fn id(&self) -> &CallId {
        &self.id
    }

    /// Ownership of the call.
    pub fn call_type(&self) -> CallType {
        self.call_type
    }

    /// Whether the call is owned by a peer instance.
    pub fn is_foreign(&self) -> bool {
        self.call_type.is_foreign()
    }

    /// Logical store database the call was last written to.
    pub fn hosted_db(&self) -> u32 {
        self.hosted_db.load(Ordering::Acquire)
    }

    /// Record the logical store database the call lives in.
    pub fn set_hosted_db(&self, db: u32) {
        self.hosted_db.store(db, Ordering::Release);
    }

    /// Whether the call was removed from the table.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// The call's read/write lock.
    pub fn state(&self) -> &RwLock<Call> {
        &self.state
    }
}

/// Table of live calls.
#[derive(Debug, Default)]
pub struct CallTable {
    calls: DashMap<CallId, Arc<CallHandle>>,
}

impl CallTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look a call up by id.
    pub fn lookup(&self, id: &CallId) -> Option<Arc<CallHandle>> {
        self.calls.get(id).map(|r| Arc::clone(r.value()))
    }

    /// Get the call with `id`, creating an empty one of `call_type` if absent.
    ///
    /// Returns the handle and whether it was created by this call.
    pub fn create_or_get(&self, id: &CallId, call_type: CallType) -> (Arc<CallHandle>, bool) {
        match self.calls.entry(id.clone()) {
            Entry::Occupied(e) => (Arc::clone(e.get()), false),
            Entry::Vacant(e) => {
                let handle = Arc::new(CallHandle::new(id.clone(), call_type));
                e.insert(Arc::clone(&handle));
                debug!(target: "relaystate::calls", call_id = %id, ?call_type, "Call created");
                (handle, true)
            }
        }
    }

    /// Remove `handle` from the table and release everything the call owns.
    ///
    /// A newer call registered under the same id is left alone.
    pub fn destroy(&self, handle: &Arc<CallHandle>) {
        self.calls
            .remove_if(handle.id(), |_, current| Arc::ptr_eq(current, handle));
        if handle.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut call = handle.state.write();
        let created = call.created;
        call.replace_with(Call::new(handle.id.clone(), created));
        debug!(target: "relaystate::calls", call_id = %handle.id, "Call destroyed");
    }

    /// Number of live calls.
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Whether no call is live.
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Ids of all live calls.
    pub fn ids(&self) -> Vec<CallId> {
        self.calls.iter().map(|r| r.key().clone()).collect()
    }
}
