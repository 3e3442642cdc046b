//! Settings file management

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Deckhand settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log as JSON lines
    #[serde(default)]
    pub log_json: bool,

    /// Also write daily-rotated log files into the logs directory
    #[serde(default)]
    pub log_to_file: bool,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Remote session configuration
    #[serde(default)]
    pub ssh: SshSettings,

    /// Job configuration
    #[serde(default)]
    pub jobs: JobSettings,

    /// Secrets
    #[serde(default)]
    pub security: SecuritySettings,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: false,
            server: ServerSettings::default(),
            ssh: SshSettings::default(),
            jobs: JobSettings::default(),
            security: SecuritySettings::default(),
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8888
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// SSH settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshSettings {
    /// Bound on connect plus authentication
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// How long the executor waits for output before polling again
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Terminal type requested for the pseudo-terminal
    #[serde(default = "default_pty_term")]
    pub pty_term: String,
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_pty_term() -> String {
    "xterm".to_string()
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            poll_interval_ms: default_poll_interval(),
            pty_term: default_pty_term(),
        }
    }
}

/// Job settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSettings {
    /// Jobs running at once; further channels wait for a slot
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Server images are built on
    #[serde(default = "default_build_server_id")]
    pub build_server_id: i64,

    /// Registry domain images are pushed to
    #[serde(default)]
    pub registry: String,

    /// Parent of per-job work directories on the build server
    #[serde(default = "default_build_workdir")]
    pub build_workdir: String,

    /// Keep a local copy of every applied manifest
    #[serde(default = "default_true")]
    pub archive_manifests: bool,
}

fn default_max_concurrent() -> usize {
    10
}

fn default_build_server_id() -> i64 {
    1
}

fn default_build_workdir() -> String {
    "/tmp/deckhand/builds".to_string()
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            build_server_id: default_build_server_id(),
            registry: String::new(),
            build_workdir: default_build_workdir(),
            archive_manifests: true,
        }
    }
}

/// Secret material. Both values must be set before the server starts.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct SecuritySettings {
    /// HS256 secret client tokens are signed with
    #[serde(default)]
    pub token_secret: String,

    /// Key material server credentials are encrypted with
    #[serde(default)]
    pub credential_key: String,
}

impl std::fmt::Debug for SecuritySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecuritySettings")
            .field("token_secret", &"[REDACTED]")
            .field("credential_key", &"[REDACTED]")
            .finish()
    }
}
