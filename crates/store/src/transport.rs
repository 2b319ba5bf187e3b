//! Transport seams
//!
//! A [`Connector`] opens blocking request/response transports and
//! subscription transports against one store server. The Redis client and
//! the in-memory test store both sit behind these traits.

use crate::command::{Command, Reply};
use crate::error::Result;
use crate::options::ConnectOptions;
use std::time::Duration;

/// A blocking request/response channel to the store.
pub trait Transport: Send {
    /// Send one command and wait for its reply.
    fn request(&mut self, cmd: &Command) -> Result<Reply>;

    /// Send `cmds` back to back, then read all replies.
    ///
    /// Fails with the first error reply.
    fn pipeline(&mut self, cmds: &[Command]) -> Result<Vec<Reply>>;
}

/// A pattern subscription channel.
pub trait Subscription: Send {
    /// Subscribe to channels matching `pattern`.
    fn psubscribe(&mut self, pattern: &str) -> Result<()>;

    /// Drop every pattern subscription.
    fn punsubscribe_all(&mut self) -> Result<()>;

    /// Wait up to `timeout` for the next published message.
    ///
    /// A message is `["pmessage", pattern, channel, payload]`. Returns
    /// `Ok(None)` when nothing arrived in time.
    fn next_message(&mut self, timeout: Duration) -> Result<Option<Vec<String>>>;
}

/// Factory for transports to one kind of store.
pub trait Connector: Send + Sync {
    /// Open a raw transport. No handshake is performed.
    fn open(&self, opts: &ConnectOptions) -> Result<Box<dyn Transport>>;

    /// Open a subscription transport, authenticated if `opts.auth` is set.
    fn subscribe(&self, opts: &ConnectOptions) -> Result<Box<dyn Subscription>>;
}
