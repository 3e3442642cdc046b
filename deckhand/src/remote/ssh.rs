//! SSH implementation of the remote session seam

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use crate::remote::session::{
    ChannelEvent, CommandChannel, Connector, RemoteSession, SessionError, Target,
};

/// SSH connector options
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub connect_timeout: Duration,
    pub pty_term: String,
    pub pty_cols: u32,
    pub pty_rows: u32,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            pty_term: "xterm".to_string(),
            pty_cols: 200,
            pty_rows: 50,
        }
    }
}

/// Host keys are accepted as presented: targets are registered by operators
/// together with their credentials.
struct AcceptingHandler;

#[async_trait]
impl client::Handler for AcceptingHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Opens password-authenticated SSH sessions
pub struct SshConnector {
    options: SshOptions,
    config: Arc<client::Config>,
}

impl SshConnector {
    pub fn new(options: SshOptions) -> Self {
        let config = client::Config {
            inactivity_timeout: None,
            ..Default::default()
        };
        Self {
            options,
            config: Arc::new(config),
        }
    }

    async fn handshake(&self, target: &Target) -> Result<Handle<AcceptingHandler>, SessionError> {
        let address = (target.host.as_str(), target.port);
        let mut handle = client::connect(self.config.clone(), address, AcceptingHandler)
            .await
            .map_err(|e| SessionError::Connect {
                host: target.host.clone(),
                reason: e.to_string(),
            })?;

        let authenticated = handle
            .authenticate_password(&target.username, target.credential.expose_secret())
            .await
            .map_err(|e| SessionError::Connect {
                host: target.host.clone(),
                reason: e.to_string(),
            })?;

        if !authenticated {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "authentication failed", "en")
                .await;
            return Err(SessionError::Auth {
                user: target.username.clone(),
                host: target.host.clone(),
            });
        }

        Ok(handle)
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn open(&self, target: &Target) -> Result<Box<dyn RemoteSession>, SessionError> {
        debug!("Connecting to {}@{}:{}", target.username, target.host, target.port);

        let handle = tokio::time::timeout(self.options.connect_timeout, self.handshake(target))
            .await
            .map_err(|_| SessionError::Timeout {
                host: target.host.clone(),
                timeout: self.options.connect_timeout,
            })??;

        info!("SSH session open to {}", target.host);
        Ok(Box::new(SshSession {
            host: target.host.clone(),
            handle: Some(handle),
            options: self.options.clone(),
        }))
    }
}

struct SshSession {
    host: String,
    handle: Option<Handle<AcceptingHandler>>,
    options: SshOptions,
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn exec(&mut self, command: &str) -> Result<Box<dyn CommandChannel>, SessionError> {
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| SessionError::Channel(format!("session to {} is closed", self.host)))?;

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| SessionError::Channel(e.to_string()))?;

        channel
            .request_pty(
                false,
                &self.options.pty_term,
                self.options.pty_cols,
                self.options.pty_rows,
                0,
                0,
                &[],
            )
            .await
            .map_err(|e| SessionError::Channel(e.to_string()))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| SessionError::Channel(e.to_string()))?;

        Ok(Box::new(SshChannel {
            channel,
            closed: false,
        }))
    }

    async fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await
            {
                warn!("Failed to disconnect from {}: {}", self.host, e);
            } else {
                debug!("SSH session to {} closed", self.host);
            }
        }
    }
}

struct SshChannel {
    channel: russh::Channel<client::Msg>,
    closed: bool,
}

#[async_trait]
impl CommandChannel for SshChannel {
    async fn next_event(&mut self) -> Option<ChannelEvent> {
        while !self.closed {
            match self.channel.wait().await {
                Some(ChannelMsg::Data { data }) => return Some(ChannelEvent::Stdout(data.to_vec())),
                // ext 1 is SSH_EXTENDED_DATA_STDERR
                Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                    return Some(ChannelEvent::Stderr(data.to_vec()))
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    return Some(ChannelEvent::ExitStatus(exit_status))
                }
                Some(ChannelMsg::Close) | None => self.closed = true,
                Some(_) => {}
            }
        }
        None
    }
}
