//! Application state management

use std::sync::Arc;

use secrecy::ExposeSecret;
use tracing::info;

use crate::app::options::AppOptions;
use crate::audit::{AuditRecorder, AuditWorker};
use crate::authn::user_token::TokenKeys;
use crate::channel::LiveChannel;
use crate::credentials::CredentialVault;
use crate::errors::DeckhandError;
use crate::jobs::JobController;
use crate::remote::executor::StreamingExecutor;
use crate::remote::fanout::FanOutCoordinator;
use crate::remote::session::Connector;
use crate::server::state::ServerState;
use crate::store::Store;

/// Process-wide context, created once at startup and handed to every
/// component explicitly
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub vault: Arc<CredentialVault>,
    pub audit: AuditRecorder,
    pub controller: Arc<JobController>,
    pub channel: Arc<LiveChannel>,
    pub token_keys: Arc<TokenKeys>,
}

impl AppState {
    /// Wire the components together. The audit worker is returned for the
    /// caller to run.
    pub fn new(
        options: &AppOptions,
        store: Arc<dyn Store>,
        connector: Arc<dyn Connector>,
    ) -> Result<(Self, AuditWorker), DeckhandError> {
        if options.token_secret.expose_secret().is_empty() {
            return Err(DeckhandError::ConfigError(
                "security.token_secret is not set".to_string(),
            ));
        }
        if options.credential_key.expose_secret().is_empty() {
            return Err(DeckhandError::ConfigError(
                "security.credential_key is not set".to_string(),
            ));
        }

        let vault = Arc::new(CredentialVault::new(&options.credential_key)?);
        let token_keys = Arc::new(TokenKeys::new(&options.token_secret));
        let (audit, audit_worker) = AuditRecorder::new(options.audit_queue_capacity);

        let fanout = FanOutCoordinator::new(
            connector,
            StreamingExecutor::new(options.executor.clone()),
        );
        let controller = Arc::new(JobController::new(
            store.clone(),
            vault.clone(),
            fanout,
            audit.clone(),
            options.controller.clone(),
        ));
        let channel = Arc::new(LiveChannel::new(
            controller.clone(),
            options.max_concurrent_jobs,
        ));
        info!(
            "Job pool ready ({} concurrent jobs)",
            options.max_concurrent_jobs.max(1)
        );

        let state = Self {
            store,
            vault,
            audit,
            controller,
            channel,
            token_keys,
        };
        Ok((state, audit_worker))
    }

    /// The slice of state HTTP handlers see
    pub fn server_state(&self) -> ServerState {
        ServerState::new(
            self.store.clone(),
            self.channel.clone(),
            self.token_keys.clone(),
        )
    }
}
