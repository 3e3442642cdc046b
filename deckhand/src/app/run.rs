//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::audit::AuditWorker;
use crate::errors::DeckhandError;
use crate::remote::ssh::SshConnector;
use crate::server::serve::serve;
use crate::store::{MemoryStore, Store};

/// Run deckhand until `shutdown_signal` resolves
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), DeckhandError> {
    info!("Initializing deckhand...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager =
        ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    let _app_state = match init(&options, &shutdown_tx, &mut shutdown_manager).await {
        Ok(app_state) => app_state,
        Err(e) => {
            error!("Failed to start deckhand: {}", e);
            shutdown_manager.shutdown().await?;
            return Err(e);
        }
    };

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: &broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Arc<AppState>, DeckhandError> {
    options.layout.setup().await?;

    let store: Arc<dyn Store> = Arc::new(MemoryStore::open(options.layout.store_file()).await?);
    let connector = Arc::new(SshConnector::new(options.ssh.clone()));

    let (app_state, audit_worker) = AppState::new(options, store, connector)?;
    let app_state = Arc::new(app_state);

    init_audit_worker(
        audit_worker,
        app_state.clone(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    init_socket_server(
        options,
        app_state.clone(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )
    .await?;

    Ok(app_state)
}

fn init_audit_worker(
    worker: AuditWorker,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DeckhandError> {
    info!("Initializing audit recorder...");

    let store = app_state.store.clone();
    let handle = tokio::spawn(async move {
        worker
            .run(
                store,
                Box::pin(async move {
                    let _ = shutdown_rx.recv().await;
                }),
            )
            .await;
    });

    shutdown_manager.with_audit_worker_handle(handle)
}

async fn init_socket_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DeckhandError> {
    info!("Initializing HTTP server...");

    let server_state = Arc::new(app_state.server_state());
    let (_addr, handle) = serve(&options.server, server_state, async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_socket_server_handle(handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    socket_server_handle: Option<JoinHandle<Result<(), DeckhandError>>>,
    audit_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            socket_server_handle: None,
            audit_worker_handle: None,
        }
    }

    pub fn with_audit_worker_handle(
        &mut self,
        handle: JoinHandle<()>,
    ) -> Result<(), DeckhandError> {
        if self.audit_worker_handle.is_some() {
            return Err(DeckhandError::ShutdownError(
                "audit_worker_handle already set".to_string(),
            ));
        }
        self.audit_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_socket_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), DeckhandError>>,
    ) -> Result<(), DeckhandError> {
        if self.socket_server_handle.is_some() {
            return Err(DeckhandError::ShutdownError(
                "server_handle already set".to_string(),
            ));
        }
        self.socket_server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), DeckhandError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), DeckhandError> {
        info!("Shutting down deckhand...");

        // 1. Socket server, so no new job starts
        if let Some(handle) = self.socket_server_handle.take() {
            handle
                .await
                .map_err(|e| DeckhandError::ShutdownError(e.to_string()))??;
        }

        // 2. Audit recorder, after draining its queue
        if let Some(handle) = self.audit_worker_handle.take() {
            handle
                .await
                .map_err(|e| DeckhandError::ShutdownError(e.to_string()))?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
