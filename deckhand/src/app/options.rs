//! Application configuration options

use std::time::Duration;

use secrecy::SecretString;

use crate::jobs::controller::ControllerOptions;
use crate::remote::executor::ExecutorOptions;
use crate::remote::ssh::SshOptions;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;

/// Main application options
#[derive(Debug)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Server configuration
    pub server: ServerOptions,

    /// SSH connector options
    pub ssh: SshOptions,

    /// Streaming executor options
    pub executor: ExecutorOptions,

    /// Job controller options
    pub controller: ControllerOptions,

    /// Jobs running at once
    pub max_concurrent_jobs: usize,

    /// Pending audit writes before `start` reports a full queue
    pub audit_queue_capacity: usize,

    /// Secret client tokens are signed with
    pub token_secret: SecretString,

    /// Key material server credentials are encrypted with
    pub credential_key: SecretString,
}

impl AppOptions {
    /// Options for the instance rooted at `layout`, as configured by `settings`
    pub fn from_settings(layout: StorageLayout, settings: &Settings) -> Self {
        let manifest_dir = settings
            .jobs
            .archive_manifests
            .then(|| layout.manifests_dir());

        Self {
            lifecycle: LifecycleOptions::default(),
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            ssh: SshOptions {
                connect_timeout: Duration::from_secs(settings.ssh.connect_timeout_secs),
                pty_term: settings.ssh.pty_term.clone(),
                ..Default::default()
            },
            executor: ExecutorOptions {
                poll_interval: Duration::from_millis(settings.ssh.poll_interval_ms.max(1)),
            },
            controller: ControllerOptions {
                build_server_id: settings.jobs.build_server_id,
                registry: settings.jobs.registry.clone(),
                build_workdir: settings.jobs.build_workdir.clone(),
                manifest_dir,
            },
            max_concurrent_jobs: settings.jobs.max_concurrent,
            audit_queue_capacity: AUDIT_QUEUE_CAPACITY,
            token_secret: SecretString::from(settings.security.token_secret.clone()),
            credential_key: SecretString::from(settings.security.credential_key.clone()),
            layout,
        }
    }
}

const AUDIT_QUEUE_CAPACITY: usize = 1024;

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on; 0 picks a free port
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8888,
        }
    }
}
