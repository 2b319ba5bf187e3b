//! Engine error type

use crate::config::ConfigError;
use relaystate_durability::PersistError;
use relaystate_store::StoreError;
use thiserror::Error;

/// Errors raised while setting up or driving persistence.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration rejected
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Store connection failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Writing or listing stored calls failed
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Result alias for engine operations
pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_transparent() {
        let err = EngineError::from(StoreError::Disconnected);
        assert_eq!(err.to_string(), "Not connected");
        let err = EngineError::from(ConfigError::Invalid("x".to_string()));
        assert_eq!(err.to_string(), "Invalid config: x");
    }
}
