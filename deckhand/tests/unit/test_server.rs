//! Server tests over a real socket

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use secrecy::SecretString;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use deckhand::app::options::ServerOptions;
use deckhand::authn::user_token::TokenKeys;
use deckhand::channel::LiveChannel;
use deckhand::server::serve::serve;
use deckhand::server::state::ServerState;
use deckhand_wire::{OperationLogResponse, SUCCESS};

use crate::support::Harness;

const TOKEN_SECRET: &str = "unit-test-token-secret";

struct Running {
    addr: SocketAddr,
    token: String,
    harness: Harness,
    _stop: oneshot::Sender<()>,
}

async fn start() -> Running {
    let harness = Harness::new(&[(1, "10.0.0.1")]).await;
    let keys = Arc::new(TokenKeys::new(&SecretString::from(TOKEN_SECRET.to_string())));
    let token = keys.issue(7, 600).unwrap();

    let state = Arc::new(ServerState::new(
        harness.store.clone(),
        Arc::new(LiveChannel::new(harness.controller.clone(), 2)),
        keys,
    ));
    let options = ServerOptions {
        host: "127.0.0.1".to_string(),
        port: 0,
    };
    let (stop, stopped) = oneshot::channel::<()>();
    let (addr, _handle) = serve(&options, state, async move {
        let _ = stopped.await;
    })
    .await
    .unwrap();

    Running {
        addr,
        token,
        harness,
        _stop: stop,
    }
}

/// Status line and body of a plain GET
async fn get(addr: SocketAddr, path: &str, bearer: Option<&str>) -> (String, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let auth = bearer
        .map(|token| format!("Authorization: Bearer {}\r\n", token))
        .unwrap_or_default();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: localhost\r\n{}Connection: close\r\n\r\n",
        path, auth
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    let (head, body) = response.split_once("\r\n\r\n").unwrap();
    let status = head.lines().next().unwrap().to_string();
    (status, body.to_string())
}

#[tokio::test]
async fn test_health_needs_no_token() {
    let running = start().await;
    let (status, body) = get(running.addr, "/health", None).await;
    assert!(status.contains("200"), "{}", status);
    assert!(body.contains("\"healthy\""));
}

#[tokio::test]
async fn test_api_requires_token() {
    let running = start().await;

    let (status, _) = get(running.addr, "/api/log/operation", None).await;
    assert!(status.contains("401"), "{}", status);

    let (status, _) = get(running.addr, "/api/log/operation", Some("not-a-token")).await;
    assert!(status.contains("401"), "{}", status);

    let (status, _) = get(
        running.addr,
        "/api/log/operation?subject_type=nope",
        Some(&running.token),
    )
    .await;
    assert!(status.contains("400"), "{}", status);

    let (status, _) = get(running.addr, "/api/deployment/1/web.api", Some(&running.token)).await;
    assert!(status.contains("404"), "{}", status);
}

#[tokio::test]
async fn test_websocket_refused_without_token() {
    let running = start().await;
    let url = format!("ws://{}/ws/deploy", running.addr);
    assert!(connect_async(url).await.is_err());
}

#[tokio::test]
async fn test_deploy_over_websocket() {
    let running = start().await;
    let url = format!("ws://{}/ws/deploy?token={}", running.addr, running.token);
    let (mut socket, _) = connect_async(url).await.unwrap();

    let request = r#"{
        "app_id": 1,
        "app_name": "web",
        "deployment_name": "web.api",
        "server_ids": [1],
        "payload": {"type": "manifest", "yaml": "kind: Deployment"}
    }"#;
    socket.send(Message::text(request)).await.unwrap();

    let mut texts = Vec::new();
    let mut closed = false;
    while let Some(message) = socket.next().await {
        match message {
            Ok(Message::Text(text)) => texts.push(text.as_str().to_string()),
            Ok(Message::Close(_)) => {
                closed = true;
                break;
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }

    assert!(closed);
    assert_eq!(texts, vec!["[10.0.0.1] ok from 10.0.0.1", SUCCESS]);

    // The job is visible through the inspection API
    let (status, body) = get(running.addr, "/api/deployment/1/web.api", Some(&running.token)).await;
    assert!(status.contains("200"), "{}", status);
    assert!(body.contains("deploy-success"));

    running.harness.audit.flush().await.unwrap();
    let (_, body) = get(
        running.addr,
        "/api/log/operation?subject_type=deployment",
        Some(&running.token),
    )
    .await;
    let log: OperationLogResponse = serde_json::from_str(&body).unwrap();
    assert_eq!(log.total, 1);
    assert_eq!(log.entries[0].user_id, 7);
    assert_eq!(log.entries[0].operation_status, "success");
}
