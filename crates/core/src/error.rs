//! Error types for the call-state model
//!
//! This module defines the errors raised by the in-memory call graph and its
//! collaborators (interfaces, port pools, crypto registry).
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Error types for the call-state model
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A port could not be granted by a local interface's pool
    #[error("Port {port} unavailable on {interface}")]
    PortUnavailable {
        /// Requested port
        port: u16,
        /// Local interface the port was requested from
        interface: String,
    },

    /// No block of consecutive ports is free
    #[error("No {count} consecutive ports free on {interface}")]
    PortRangeExhausted {
        /// Number of ports requested
        count: u16,
        /// Local interface the ports were requested from
        interface: String,
    },

    /// Entity id does not resolve inside the call
    #[error("Dangling {kind} reference: {id}")]
    DanglingReference {
        /// Entity kind ("stream", "tag", ...)
        kind: &'static str,
        /// Unresolved id
        id: u32,
    },

    /// Invalid operation or state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl CoreError {
    /// Shorthand for a dangling reference of the given kind.
    pub fn dangling(kind: &'static str, id: u32) -> Self {
        CoreError::DanglingReference { kind, id }
    }
}
