//! Redis transport
//!
//! Blocking connections from the `redis` client. Commands are encoded from
//! [`Command`] values; replies are mapped into [`Reply`].

use crate::command::{Command, Reply};
use crate::error::{Result, StoreError};
use crate::options::ConnectOptions;
use crate::transport::{Connector, Subscription, Transport};
use redis::{ErrorKind, RedisError, Value};
use std::time::Duration;
use tracing::debug;

/// Opens connections to a Redis server.
#[derive(Debug, Default, Clone, Copy)]
pub struct RedisConnector;

impl RedisConnector {
    fn connect(opts: &ConnectOptions) -> Result<redis::Connection> {
        let connect_err = |e: RedisError| StoreError::Connect {
            endpoint: opts.endpoint(),
            reason: e.to_string(),
        };
        let client = redis::Client::open(opts.url()).map_err(connect_err)?;
        let conn = client
            .get_connection_with_timeout(opts.timeout)
            .map_err(connect_err)?;
        conn.set_read_timeout(Some(opts.timeout)).map_err(map_error)?;
        conn.set_write_timeout(Some(opts.timeout)).map_err(map_error)?;
        debug!(target: "relaystate::store", endpoint = %opts.endpoint(), "Opened Redis connection");
        Ok(conn)
    }
}

impl Connector for RedisConnector {
    fn open(&self, opts: &ConnectOptions) -> Result<Box<dyn Transport>> {
        Ok(Box::new(RedisTransport {
            conn: Self::connect(opts)?,
        }))
    }

    fn subscribe(&self, opts: &ConnectOptions) -> Result<Box<dyn Subscription>> {
        let mut conn = Self::connect(opts)?;
        if let Some(pw) = &opts.auth {
            to_cmd(&Command::Auth(pw.clone()))
                .query::<Value>(&mut conn)
                .map_err(|e| StoreError::Auth {
                    endpoint: opts.endpoint(),
                    reason: e.to_string(),
                })?;
        }
        Ok(Box::new(RedisSubscription { conn }))
    }
}

/// A blocking request/response Redis connection.
pub struct RedisTransport {
    conn: redis::Connection,
}

impl Transport for RedisTransport {
    fn request(&mut self, cmd: &Command) -> Result<Reply> {
        let value: Value = to_cmd(cmd).query(&mut self.conn).map_err(map_error)?;
        Ok(to_reply(value))
    }

    fn pipeline(&mut self, cmds: &[Command]) -> Result<Vec<Reply>> {
        if cmds.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for cmd in cmds {
            pipe.add_command(to_cmd(cmd));
        }
        let values: Vec<Value> = pipe.query(&mut self.conn).map_err(map_error)?;
        Ok(values.into_iter().map(to_reply).collect())
    }
}

/// A Redis connection in pattern-subscribe mode.
///
/// Drives the connection with raw packed commands so that subscriptions
/// survive between reads.
pub struct RedisSubscription {
    conn: redis::Connection,
}

impl RedisSubscription {
    fn send(&mut self, cmd: &Command) -> Result<()> {
        self.conn
            .send_packed_command(&to_cmd(cmd).get_packed_command())
            .map_err(map_error)
    }
}

impl Subscription for RedisSubscription {
    fn psubscribe(&mut self, pattern: &str) -> Result<()> {
        self.send(&Command::PSubscribe(vec![pattern.to_string()]))
    }

    fn punsubscribe_all(&mut self) -> Result<()> {
        self.send(&Command::PUnsubscribe(Vec::new()))
    }

    fn next_message(&mut self, timeout: Duration) -> Result<Option<Vec<String>>> {
        self.conn.set_read_timeout(Some(timeout)).map_err(map_error)?;
        let value = match self.conn.recv_response() {
            Ok(v) => v,
            Err(e) if e.is_timeout() => return Ok(None),
            Err(e) => return Err(map_error(e)),
        };
        let parts = match to_reply(value).into_array() {
            Ok(items) => items,
            Err(_) => return Err(StoreError::protocol("non-array pubsub message")),
        };
        let mut texts = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                // subscription acks carry the subscriber count
                Reply::Int(_) => return Ok(None),
                other => texts.push(other.into_text()?),
            }
        }
        if texts.first().map(String::as_str) != Some("pmessage") {
            return Ok(None);
        }
        Ok(Some(texts))
    }
}

fn to_cmd(cmd: &Command) -> redis::Cmd {
    let mut out = redis::cmd(cmd.name());
    for arg in cmd.args() {
        out.arg(arg);
    }
    out
}

fn to_reply(value: Value) -> Reply {
    match value {
        Value::Nil => Reply::Nil,
        Value::Int(i) => Reply::Int(i),
        Value::Data(bytes) => Reply::Bulk(bytes),
        Value::Bulk(items) => Reply::Array(items.into_iter().map(to_reply).collect()),
        Value::Status(s) => Reply::Status(s),
        Value::Okay => Reply::Status("OK".to_string()),
    }
}

fn map_error(e: RedisError) -> StoreError {
    if e.is_timeout() {
        return StoreError::Timeout;
    }
    match e.kind() {
        ErrorKind::ResponseError
        | ErrorKind::ExecAbortError
        | ErrorKind::BusyLoadingError
        | ErrorKind::AuthenticationFailed
        | ErrorKind::ExtensionError => StoreError::Server(e.to_string()),
        ErrorKind::TypeError => StoreError::Protocol(e.to_string()),
        _ => StoreError::Io(e.to_string()),
    }
}
