//! Error types for persisting and restoring calls
//!
//! Three layers of failure exist:
//! - [`FieldError`]: one field of a decoded hash record is missing or malformed
//! - [`RestoreError`]: rebuilding one call failed; fatal to that call only
//! - [`PersistError`]: writing one call's snapshot failed; the in-memory call
//!   stays authoritative

use relaystate_store::StoreError;
use thiserror::Error;

/// Failure to read one field out of a hash record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    /// Field absent from the record
    #[error("Field '{0}' not found")]
    NotFound(String),

    /// Field present but its value does not parse as the wanted type
    #[error("Field '{field}' has unparsable value '{value}'")]
    Parse {
        /// Field name
        field: String,
        /// Raw value, lossily decoded
        value: String,
    },

    /// Stored byte string exceeds the destination buffer
    #[error("Field '{field}' is {len} bytes, capacity is {max}")]
    TooLong {
        /// Field name
        field: String,
        /// Stored length
        len: usize,
        /// Destination capacity
        max: usize,
    },
}

impl FieldError {
    /// Whether the field was simply absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FieldError::NotFound(_))
    }
}

/// Lift a field lookup into "absent is fine, malformed is not".
pub trait OptionalField<T> {
    /// `NotFound` becomes `Ok(None)`; other errors pass through.
    fn optional(self) -> Result<Option<T>, FieldError>;
}

impl<T> OptionalField<T> for Result<T, FieldError> {
    fn optional(self) -> Result<Option<T>, FieldError> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Result type alias for restore operations
pub type RestoreResult<T> = std::result::Result<T, RestoreError>;

/// Failure to rebuild one call from the store.
#[derive(Debug, Error)]
pub enum RestoreError {
    /// The call already carries signaling state and is left alone
    #[error("Call already exists")]
    AlreadyExists,

    /// The call's root record is absent
    #[error("Call not found in store")]
    NotFound,

    /// A record group could not be fetched completely
    #[error("'{what}' incomplete: {reason}")]
    Incomplete {
        /// Record group ("call", "tags", "sfds", ...)
        what: String,
        /// What was missing
        reason: String,
    },

    /// An entity could not be built from its record
    #[error("Failed to create {kind} {index}: {reason}")]
    Construct {
        /// Entity kind
        kind: &'static str,
        /// Surrogate index
        index: u32,
        /// Cause
        reason: String,
    },

    /// A cross-reference could not be resolved
    #[error("Failed to link {kind} {index}: {reason}")]
    Link {
        /// Entity kind
        kind: &'static str,
        /// Surrogate index
        index: u32,
        /// Cause
        reason: String,
    },

    /// The store failed while fetching records
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl RestoreError {
    /// Shorthand for an incomplete record group.
    pub fn incomplete(what: impl Into<String>, reason: impl ToString) -> Self {
        RestoreError::Incomplete {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    /// Shorthand for a construct failure.
    pub fn construct(kind: &'static str, index: u32, reason: impl ToString) -> Self {
        RestoreError::Construct {
            kind,
            index,
            reason: reason.to_string(),
        }
    }

    /// Shorthand for a link failure.
    pub fn link(kind: &'static str, index: u32, reason: impl ToString) -> Self {
        RestoreError::Link {
            kind,
            index,
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for persist operations
pub type PersistResult<T> = std::result::Result<T, PersistError>;

/// Failure to write or delete one call's snapshot.
#[derive(Debug, Error)]
pub enum PersistError {
    /// The store rejected a command or the connection failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The single-blob document could not be encoded
    #[error("Encode error: {0}")]
    Encode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_error_display() {
        let err = FieldError::TooLong {
            field: "master_key".to_string(),
            len: 40,
            max: 32,
        };
        assert_eq!(err.to_string(), "Field 'master_key' is 40 bytes, capacity is 32");
        assert_eq!(
            FieldError::NotFound("localport".to_string()).to_string(),
            "Field 'localport' not found"
        );
    }

    #[test]
    fn test_optional_field() {
        let absent: Result<u32, FieldError> = Err(FieldError::NotFound("x".to_string()));
        assert_eq!(absent.optional(), Ok(None));

        let present: Result<u32, FieldError> = Ok(3);
        assert_eq!(present.optional(), Ok(Some(3)));

        let bad: Result<u32, FieldError> = Err(FieldError::Parse {
            field: "x".to_string(),
            value: "y".to_string(),
        });
        assert!(bad.optional().is_err());
    }

    #[test]
    fn test_restore_error_display() {
        let err = RestoreError::incomplete("streams", "record 1 missing");
        assert_eq!(err.to_string(), "'streams' incomplete: record 1 missing");

        let err = RestoreError::construct("sfd", 2, "port 30000 unavailable");
        assert_eq!(err.to_string(), "Failed to create sfd 2: port 30000 unavailable");

        let err: RestoreError = StoreError::Disconnected.into();
        assert!(matches!(err, RestoreError::Store(_)));
    }
}
