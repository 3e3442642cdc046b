//! Remote session seam.
//!
//! A `Connector` opens one authenticated session per call. Sessions are never
//! pooled: each job opens its own and closes it on every exit path.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;

/// One remote host plus the credentials to reach it.
///
/// The secret is decrypted right before dispatch and never printed.
pub struct Target {
    pub server_id: i64,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential: SecretString,
}

impl Target {
    /// Label used to tag streamed lines and transcripts
    pub fn label(&self) -> &str {
        &self.host
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("server_id", &self.server_id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("connection to {host} timed out after {timeout:?}")]
    Timeout { host: String, timeout: Duration },

    #[error("authentication failed for {user}@{host}")]
    Auth { user: String, host: String },

    #[error("cannot connect to {host}: {reason}")]
    Connect { host: String, reason: String },

    #[error("channel error: {0}")]
    Channel(String),
}

/// Something the remote command produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    ExitStatus(u32),
}

/// A running remote command
#[async_trait]
pub trait CommandChannel: Send {
    /// Next event, or `None` once the channel is closed and fully drained.
    ///
    /// Must be cancel-safe: the executor polls it under a timeout.
    async fn next_event(&mut self) -> Option<ChannelEvent>;
}

/// One authenticated connection to one host
#[async_trait]
pub trait RemoteSession: Send {
    /// Start `command` under a pseudo-terminal
    async fn exec(&mut self, command: &str) -> Result<Box<dyn CommandChannel>, SessionError>;

    /// Idempotent
    async fn close(&mut self);
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Fails fast on timeout or rejected credentials; a failed open never
    /// yields a session.
    async fn open(&self, target: &Target) -> Result<Box<dyn RemoteSession>, SessionError>;
}
