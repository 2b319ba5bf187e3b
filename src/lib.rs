//! relaystate - call-state persistence for a media relay
//!
//! Mirrors the relay's in-memory call graph into a Redis-compatible
//! key-value store and rebuilds it after a restart. Peer instances follow
//! each other's calls through keyspace notifications.
//!
//! # Quick Start
//!
//! ```ignore
//! use relaystate::engine::{Persistence, PersistConfig};
//! use relaystate::store::RedisConnector;
//!
//! let config = PersistConfig::from_file("persist.toml".as_ref())?;
//! let persistence = Persistence::connect(config, Arc::new(RedisConnector), table, interfaces)?;
//! persistence.restore_all()?;
//! let _notifier = persistence.start_notifier()?;
//!
//! // after every signaling event
//! persistence.persist(&call);
//! ```

pub use relaystate_core as core;
pub use relaystate_durability as durability;
pub use relaystate_engine as engine;
pub use relaystate_store as store;

pub use relaystate_engine::{PersistConfig, PersistOutcome, Persistence};
