//! Store connection errors
//!
//! Every variant is fatal to the connection it was raised on: the caller
//! drops the transport and reconnects on next use.

use crate::options::Role;
use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised while talking to the key-value store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Endpoint unreachable or transport setup failed
    #[error("Cannot connect to {endpoint}: {reason}")]
    Connect {
        /// `host:port` of the store
        endpoint: String,
        /// Transport error text
        reason: String,
    },

    /// Credential rejected
    #[error("Authentication with {endpoint} failed: {reason}")]
    Auth {
        /// `host:port` of the store
        endpoint: String,
        /// Reply text
        reason: String,
    },

    /// Server never reported the wanted replication role
    #[error("{endpoint} did not report role {wanted} after {attempts} attempts")]
    RoleMismatch {
        /// `host:port` of the store
        endpoint: String,
        /// Role asked for
        wanted: Role,
        /// Role queries made
        attempts: u32,
    },

    /// Error reply from the server
    #[error("Store replied with error: {0}")]
    Server(String),

    /// Reply of an unexpected type or shape
    #[error("Unexpected reply: {0}")]
    Protocol(String),

    /// No live transport
    #[error("Not connected")]
    Disconnected,

    /// Read or write timed out
    #[error("Timed out")]
    Timeout,

    /// Transport I/O failure
    #[error("I/O error: {0}")]
    Io(String),
}

impl StoreError {
    /// Shorthand for a reply-shape error.
    pub fn protocol(what: impl Into<String>) -> Self {
        StoreError::Protocol(what.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_role_mismatch() {
        let err = StoreError::RoleMismatch {
            endpoint: "127.0.0.1:6379".to_string(),
            wanted: Role::Master,
            attempts: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("127.0.0.1:6379"));
        assert!(msg.contains("master"));
        assert!(msg.contains('3'));
    }

    #[test]
    fn test_error_display_server() {
        let err = StoreError::Server("WRONGTYPE".to_string());
        assert_eq!(err.to_string(), "Store replied with error: WRONGTYPE");
    }
}
