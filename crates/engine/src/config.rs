//! Persistence configuration via TOML
//!
//! ```toml
//! expires_secs = 86400
//! restore_threads = 4
//! mode = "multikey"
//!
//! [store]
//! host = "127.0.0.1"
//! port = 6379
//! db = 1
//! role = "master"
//!
//! # [write]          connection for persist/delete, defaults to [store]
//! # [notify]         enables the change-notification listener
//! # keyspaces = [1, 2]
//! ```

use relaystate_durability::StorageMode;
use relaystate_store::{ConnectOptions, Role};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read or written
    #[error("Failed to access config file '{path}': {reason}")]
    Io {
        /// File path
        path: String,
        /// OS error text
        reason: String,
    },

    /// The TOML could not be parsed
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// A value is out of range
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Result alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// One store endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// Host name or address
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Logical database
    #[serde(default)]
    pub db: u32,
    /// Password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
    /// Wanted replication role
    #[serde(default = "default_role")]
    pub role: Role,
    /// Connect and read timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Role re-queries on the initial connect
    #[serde(default = "default_role_wait")]
    pub role_wait: u32,
    /// Pause between role queries in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub retry_delay_ms: u64,
    /// Start disconnected instead of failing when the store is down
    #[serde(default)]
    pub optional: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    6379
}

fn default_role() -> Role {
    Role::Any
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_role_wait() -> u32 {
    10
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            db: 0,
            auth: None,
            role: default_role(),
            connect_timeout_ms: default_timeout_ms(),
            role_wait: default_role_wait(),
            retry_delay_ms: default_timeout_ms(),
            optional: false,
        }
    }
}

impl StoreConfig {
    /// Connect options for this endpoint.
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            db: self.db,
            auth: self.auth.clone(),
            role: self.role,
            timeout: Duration::from_millis(self.connect_timeout_ms),
            role_wait: self.role_wait,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            optional: self.optional,
            ..ConnectOptions::new(self.host.clone(), self.port)
        }
    }
}

/// Change-notification listener endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotifyConfig {
    /// Endpoint to subscribe on
    #[serde(flatten)]
    pub store: StoreConfig,
    /// Logical databases whose notifications are followed
    #[serde(default)]
    pub keyspaces: Vec<u32>,
}

/// Persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistConfig {
    /// Main endpoint, used for restore and by default for writes
    #[serde(default)]
    pub store: StoreConfig,
    /// Separate endpoint for persist and delete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write: Option<StoreConfig>,
    /// Listener endpoint; the listener is off when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify: Option<NotifyConfig>,
    /// Time to live of every written key
    #[serde(default = "default_expires_secs")]
    pub expires_secs: u64,
    /// Parallel connections used by bulk restore
    #[serde(default = "default_restore_threads")]
    pub restore_threads: usize,
    /// Storage layout
    #[serde(default)]
    pub mode: StorageMode,
}

fn default_expires_secs() -> u64 {
    86400
}

fn default_restore_threads() -> usize {
    4
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            write: None,
            notify: None,
            expires_secs: default_expires_secs(),
            restore_threads: default_restore_threads(),
            mode: StorageMode::default(),
        }
    }
}

impl PersistConfig {
    /// Parse and validate TOML text.
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: PersistConfig = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    /// Serialize to TOML and write to `path`.
    pub fn write_to_file(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Reject values the subsystem cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.restore_threads == 0 {
            return Err(ConfigError::Invalid("restore_threads must be at least 1".to_string()));
        }
        if self.expires_secs == 0 {
            return Err(ConfigError::Invalid("expires_secs must be at least 1".to_string()));
        }
        if let Some(notify) = &self.notify {
            if notify.keyspaces.is_empty() {
                return Err(ConfigError::Invalid("notify.keyspaces must not be empty".to_string()));
            }
        }
        Ok(())
    }

    /// Endpoint used for persist and delete.
    pub fn write_store(&self) -> &StoreConfig {
        self.write.as_ref().unwrap_or(&self.store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = PersistConfig::default();
        assert_eq!(config.expires_secs, 86400);
        assert_eq!(config.restore_threads, 4);
        assert_eq!(config.mode, StorageMode::MultiKey);
        assert_eq!(config.write_store(), &config.store);
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = PersistConfig::from_toml_str("").unwrap();
        assert_eq!(config, PersistConfig::default());
    }

    #[test]
    fn test_parse_full() {
        let config = PersistConfig::from_toml_str(
            r#"
            expires_secs = 600
            restore_threads = 8
            mode = "json"

            [store]
            host = "10.0.0.5"
            port = 6380
            db = 3
            auth = "secret"
            role = "master"
            role_wait = 2

            [write]
            host = "10.0.0.6"
            db = 3

            [notify]
            host = "10.0.0.7"
            role = "slave"
            keyspaces = [3, 4]
            "#,
        )
        .unwrap();

        assert_eq!(config.mode, StorageMode::Json);
        assert_eq!(config.restore_threads, 8);
        let opts = config.store.connect_options();
        assert_eq!(opts.endpoint(), "10.0.0.5:6380");
        assert_eq!(opts.db, 3);
        assert_eq!(opts.auth.as_deref(), Some("secret"));
        assert_eq!(opts.role, Role::Master);
        assert_eq!(opts.role_wait, 2);
        assert_eq!(config.write_store().host, "10.0.0.6");

        let notify = config.notify.unwrap();
        assert_eq!(notify.store.role, Role::Replica);
        assert_eq!(notify.keyspaces, vec![3, 4]);
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            PersistConfig::from_toml_str("restore_threads = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            PersistConfig::from_toml_str("expires_secs = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            PersistConfig::from_toml_str("[notify]\nhost = \"x\""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            PersistConfig::from_toml_str("mode = \"xml\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("persist.toml");

        let mut config = PersistConfig::default();
        config.store.port = 7000;
        config.notify = Some(NotifyConfig {
            store: StoreConfig::default(),
            keyspaces: vec![1],
        });
        config.write_to_file(&path).unwrap();

        assert_eq!(PersistConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = PersistConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("absent.toml"));
    }
}
