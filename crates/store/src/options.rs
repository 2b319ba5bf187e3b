//! Connection options and replication roles

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Replication role of a store server.
///
/// As a connect option this is the role wanted; `Any` accepts either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Primary, accepts writes
    Master,
    /// Read replica
    #[serde(alias = "slave")]
    Replica,
    /// No preference
    Any,
}

impl Role {
    /// Whether a server reporting `reported` satisfies this wanted role.
    pub fn accepts(self, reported: Role) -> bool {
        self == Role::Any || self == reported
    }

    /// Extract the role line from an `INFO` reply.
    ///
    /// Returns `None` when the reply carries no recognizable role.
    pub fn from_info(info: &str) -> Option<Role> {
        let at = info.find("role:")?;
        let rest = &info[at + "role:".len()..];
        if rest.starts_with("master") {
            Some(Role::Master)
        } else if rest.starts_with("slave") || rest.starts_with("replica") {
            Some(Role::Replica)
        } else {
            None
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Master => "master",
            Role::Replica => "replica",
            Role::Any => "any",
        })
    }
}

/// Everything needed to open one store connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Host name or address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Logical database selected after connect
    pub db: u32,
    /// Password; `PING` is sent instead of `AUTH` when unset
    pub auth: Option<String>,
    /// Wanted replication role
    pub role: Role,
    /// Connect and read timeout
    pub timeout: Duration,
    /// Role re-queries allowed on the initial connect
    pub role_wait: u32,
    /// Pause between role queries
    pub retry_delay: Duration,
    /// Start disconnected instead of failing when the store is down
    pub optional: bool,
}

impl ConnectOptions {
    /// Options for `host:port` with defaults for everything else.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ConnectOptions {
            host: host.into(),
            port,
            db: 0,
            auth: None,
            role: Role::Any,
            timeout: Duration::from_secs(1),
            role_wait: 10,
            retry_delay: Duration::from_secs(1),
            optional: false,
        }
    }

    /// `host:port` for logs and errors.
    pub fn endpoint(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Connection URL understood by the redis client.
    pub fn url(&self) -> String {
        format!("redis://{}/", self.endpoint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_from_info() {
        let info = "# Replication\r\nrole:master\r\nconnected_slaves:0\r\n";
        assert_eq!(Role::from_info(info), Some(Role::Master));
        assert_eq!(Role::from_info("role:slave\r\n"), Some(Role::Replica));
        assert_eq!(Role::from_info("redis_version:7.0\r\n"), None);
        assert_eq!(Role::from_info("role:sentinel\r\n"), None);
    }

    #[test]
    fn test_role_accepts() {
        assert!(Role::Any.accepts(Role::Replica));
        assert!(Role::Master.accepts(Role::Master));
        assert!(!Role::Master.accepts(Role::Replica));
        assert!(!Role::Replica.accepts(Role::Master));
    }

    #[test]
    fn test_endpoint_formatting() {
        assert_eq!(ConnectOptions::new("127.0.0.1", 6379).endpoint(), "127.0.0.1:6379");
        assert_eq!(ConnectOptions::new("::1", 6379).url(), "redis://[::1]:6379/");
    }
}
