//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use deckhand_wire::{
    DeploymentResponse, HealthResponse, ImageLogResponse, OperationLogResponse, VersionResponse,
};

use crate::channel::{JobKind, Outbound};
use crate::models::operation::SubjectType;
use crate::server::state::ServerState;
use crate::utils::{bearer_token, version_info};

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "deckhand".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Browsers cannot set headers on a WebSocket handshake, so the token may
/// also come as a query parameter
#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

/// User id of the caller, from the `Authorization` header or `?token=`
fn authenticate(
    state: &ServerState,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<i64, StatusCode> {
    let raw = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .or(query_token)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = state.token_keys.verify(raw).map_err(|e| {
        debug!("Rejected client token: {}", e);
        StatusCode::UNAUTHORIZED
    })?;
    token.user_id().map_err(|_| StatusCode::UNAUTHORIZED)
}

/// Build channel
pub async fn ws_build_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, StatusCode> {
    let user_id = authenticate(&state, &headers, query.token.as_deref())?;
    Ok(ws.on_upgrade(move |socket| run_channel(state, JobKind::Build, user_id, socket)))
}

/// Deploy channel
pub async fn ws_deploy_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, StatusCode> {
    let user_id = authenticate(&state, &headers, query.token.as_deref())?;
    Ok(ws.on_upgrade(move |socket| run_channel(state, JobKind::Deploy, user_id, socket)))
}

async fn run_channel(state: Arc<ServerState>, kind: JobKind, user_id: i64, socket: WebSocket) {
    let (mut sender, receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match message {
                Outbound::Text(text) => {
                    if let Err(e) = sender.send(Message::Text(text.into())).await {
                        debug!("Client went away: {}", e);
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let inbound = Box::pin(receiver.filter_map(|message| async move {
        match message {
            Ok(Message::Text(text)) => Some(text.as_str().to_owned()),
            Ok(_) => None,
            Err(e) => {
                warn!("WebSocket receive error: {}", e);
                None
            }
        }
    }));

    state.channel.serve(kind, user_id, inbound, tx).await;
    if let Err(e) = writer.await {
        warn!("Channel writer failed: {}", e);
    }
}

/// Operation log filter
#[derive(Debug, Default, Deserialize)]
pub struct OperationLogQuery {
    pub subject_type: Option<String>,
    pub subject_id: Option<String>,
    pub token: Option<String>,
}

/// Audit entries, newest first
pub async fn operation_log_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<OperationLogQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    authenticate(&state, &headers, query.token.as_deref())?;

    let subject_type = query
        .subject_type
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<SubjectType>)
        .transpose()
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    let subject_id = query.subject_id.as_deref().filter(|s| !s.is_empty());

    let entries = state
        .store
        .operations(subject_type, subject_id)
        .await
        .map_err(|e| {
            warn!("Failed to list operations: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let entries: Vec<_> = entries.iter().map(|entry| entry.to_view()).collect();
    let total = entries.len();
    Ok(Json(OperationLogResponse { entries, total }))
}

/// Build transcript of an image
pub async fn image_log_handler(
    State(state): State<Arc<ServerState>>,
    Path((name, version)): Path<(String, String)>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    authenticate(&state, &headers, query.token.as_deref())?;

    let image = state
        .store
        .image(&name, &version)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(ImageLogResponse {
        name: image.name,
        version: image.version,
        status: image.status.to_string(),
        url: image.url,
        log: image.log,
    }))
}

/// Deployment record with its last transcript
pub async fn deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path((app_id, name)): Path<(i64, String)>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    authenticate(&state, &headers, query.token.as_deref())?;

    let deployment = state
        .store
        .deployment(app_id, &name)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(DeploymentResponse {
        name: deployment.name,
        app_id: deployment.app_id,
        kind: deployment.kind.as_str().to_string(),
        status: deployment.status.to_string(),
        server_ids: deployment.server_ids,
        payload: deployment.payload,
        log: deployment.log,
        updated_at: deployment.updated_at,
    }))
}
