//! Testing utilities for the store layer
//!
//! - **MemoryStore**: in-memory simulated store implementing [`Connector`],
//!   with keyspace notifications, role simulation and fault injection
//!
//! # Example
//!
//! ```ignore
//! use relaystate_store::testing::MemoryStore;
//! use relaystate_store::{ConnectOptions, StoreConnection};
//!
//! let store = MemoryStore::new();
//! let conn = StoreConnection::connect(store.connector(), ConnectOptions::new("mem", 0))?;
//! ```
//!
//! [`Connector`]: crate::Connector

mod memory;

pub use memory::{MemoryStore, MemorySubscription, MemoryTransport, StoredValue};
