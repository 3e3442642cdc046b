//! Live channel tests: message order, sentinels and close

use futures::stream;
use tokio::sync::mpsc;

use deckhand::channel::{JobKind, LiveChannel, Outbound};
use deckhand_wire::{FAILURE, SUCCESS};

use crate::support::{Behavior, Harness};

const DEPLOY: &str = r#"{
    "app_id": 1,
    "app_name": "web",
    "deployment_name": "web.api",
    "server_ids": [1, 2],
    "payload": {"type": "manifest", "yaml": "kind: Deployment"}
}"#;

const BUILD: &str = r#"{
    "app_id": 1,
    "image_name": "api",
    "version": "1.0",
    "repos_url": "https://git.example.com/web/api.git",
    "branch": "main"
}"#;

async fn session(harness: &Harness, kind: JobKind, messages: Vec<&str>) -> Vec<Outbound> {
    let channel = LiveChannel::new(harness.controller.clone(), 2);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let inbound = stream::iter(messages.into_iter().map(str::to_string));

    channel.serve(kind, 7, inbound, tx).await;

    let mut received = Vec::new();
    while let Ok(message) = rx.try_recv() {
        received.push(message);
    }
    received
}

fn text(message: &str) -> Outbound {
    Outbound::Text(message.to_string())
}

#[tokio::test]
async fn test_deploy_streams_lines_then_success() {
    let harness = Harness::new(&[(1, "10.0.0.1"), (2, "10.0.0.2")]).await;

    let received = session(&harness, JobKind::Deploy, vec![DEPLOY]).await;

    assert_eq!(
        received,
        vec![
            text("[10.0.0.1] ok from 10.0.0.1"),
            text("[10.0.0.2] ok from 10.0.0.2"),
            text(SUCCESS),
            Outbound::Close,
        ]
    );
}

#[tokio::test]
async fn test_failed_deploy_ends_with_failure() {
    let harness = Harness::new(&[(1, "10.0.0.1"), (2, "10.0.0.2")]).await;
    harness.connector.set("10.0.0.1", Behavior::Unreachable);

    let received = session(&harness, JobKind::Deploy, vec![DEPLOY]).await;

    assert_eq!(received.len(), 4);
    assert!(matches!(&received[0], Outbound::Text(line) if line.contains("timed out")));
    assert_eq!(received[1], text("[10.0.0.2] ok from 10.0.0.2"));
    assert_eq!(received[2], text(FAILURE));
    assert_eq!(received[3], Outbound::Close);
}

#[tokio::test]
async fn test_build_sends_job_token_first() {
    let harness = Harness::new(&[(1, "10.0.0.1")]).await;

    let received = session(&harness, JobKind::Build, vec![BUILD]).await;

    let Outbound::Text(token) = &received[0] else {
        panic!("expected a token, got {:?}", received[0]);
    };
    assert!(uuid::Uuid::parse_str(token).is_ok());
    assert_eq!(received[1..], [text("ok from 10.0.0.1"), text(SUCCESS), Outbound::Close]);
}

#[tokio::test]
async fn test_malformed_request_is_rejected() {
    let harness = Harness::new(&[(1, "10.0.0.1")]).await;

    let received = session(&harness, JobKind::Deploy, vec!["{not json"]).await;

    assert_eq!(received.len(), 3);
    assert!(matches!(&received[0], Outbound::Text(line) if line.starts_with("Invalid request")));
    assert_eq!(received[1], text(FAILURE));
    assert_eq!(received[2], Outbound::Close);
    assert!(harness.connector.calls().is_empty());
}

#[tokio::test]
async fn test_rejection_reason_precedes_failure() {
    let harness = Harness::new(&[(1, "10.0.0.1")]).await;
    let request = DEPLOY.replace("web.api", "Web_API");

    let received = session(&harness, JobKind::Deploy, vec![request.as_str()]).await;

    assert!(matches!(&received[0], Outbound::Text(line) if line.contains("Invalid name")));
    assert_eq!(received[1..], [text(FAILURE), Outbound::Close]);
}

#[tokio::test]
async fn test_channel_closed_without_request() {
    let harness = Harness::new(&[(1, "10.0.0.1")]).await;

    let received = session(&harness, JobKind::Deploy, vec![]).await;

    assert_eq!(received.last(), Some(&Outbound::Close));
    assert_eq!(received[received.len() - 2], text(FAILURE));
}

#[tokio::test]
async fn test_only_first_message_is_a_request() {
    let harness = Harness::new(&[(1, "10.0.0.1"), (2, "10.0.0.2")]).await;

    let received = session(&harness, JobKind::Deploy, vec![DEPLOY, DEPLOY]).await;

    assert_eq!(received.iter().filter(|m| **m == text(SUCCESS)).count(), 1);
    assert_eq!(harness.connector.opens("10.0.0.1"), 1);
}
