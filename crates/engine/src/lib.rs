//! Persistence engine for relaystate
//!
//! This crate drives the durability layer against live store connections:
//! - Persistence: persist / delete / restore / wipe facade over the call table
//! - restore: per-call restore and the parallel bulk restore orchestrator
//! - Notifier: change-notification listener with reconnect supervisor
//! - WorkerPool: fixed-size worker pool used by bulk restore
//! - PersistConfig: TOML configuration
//!
//! Persist and delete are best-effort. The in-memory call table stays
//! authoritative; a failed write only leaves the stored copy stale.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod notifier;
pub mod persistence;
pub mod pool;
pub mod restore;

pub use config::{ConfigError, NotifyConfig, PersistConfig, StoreConfig};
pub use error::{EngineError, EngineResult};
pub use notifier::{parse_message, Notification, Notifier, NotifyOp};
pub use persistence::{PersistOutcome, Persistence};
pub use pool::{PoolStats, QueueFull, WorkerPool};
pub use restore::{restore_all, RestoreContext, RestoreSummary};
