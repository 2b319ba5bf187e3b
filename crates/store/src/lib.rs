//! Key-value store access for relaystate
//!
//! This crate implements the store connection layer:
//! - Command / Reply: typed commands and reply model
//! - Transport / Connector / Subscription: seams over the wire client
//! - RedisConnector: blocking `redis` client transport
//! - StoreConnection: handshake with role check, health check, pipelining
//! - testing: in-memory simulated store

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod command;
pub mod connection;
pub mod error;
pub mod options;
pub mod redis_transport;
pub mod testing;
pub mod transport;

pub use command::{Command, Reply};
pub use connection::{ConnectionState, StoreConnection, StoreSession, CALLS_KEY};
pub use error::{Result, StoreError};
pub use options::{ConnectOptions, Role};
pub use redis_transport::RedisConnector;
pub use transport::{Connector, Subscription, Transport};
