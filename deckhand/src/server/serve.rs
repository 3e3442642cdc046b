//! HTTP server setup

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::DeckhandError;
use crate::server::handlers::{
    deployment_handler, health_handler, image_log_handler, operation_log_handler,
    version_handler, ws_build_handler, ws_deploy_handler,
};
use crate::server::state::ServerState;

/// Routes of the server
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Live channels
        .route("/ws/build", get(ws_build_handler))
        .route("/ws/deploy", get(ws_deploy_handler))
        // Inspection
        .route("/api/log/operation", get(operation_log_handler))
        .route("/api/image/{name}/{version}/log", get(image_log_handler))
        .route("/api/deployment/{app_id}/{name}", get(deployment_handler))
        // State and middleware
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Start the HTTP server. Returns the bound address, which differs from the
/// configured one when port 0 was requested.
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(SocketAddr, JoinHandle<Result<(), DeckhandError>>), DeckhandError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| DeckhandError::ServerError(format!("Cannot bind {}: {}", addr, e)))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| DeckhandError::ServerError(e.to_string()))?;
    info!("HTTP server listening on {}", local_addr);

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| DeckhandError::ServerError(e.to_string()))
    });

    Ok((local_addr, handle))
}
