//! Fan-out coordinator tests

use std::sync::Arc;

use deckhand::remote::fanout::FanOutCoordinator;
use deckhand::remote::session::ChannelEvent;
use deckhand::remote::sink::Collector;

use crate::support::{fast_executor, target, Behavior, Call, FakeConnector};

fn coordinator(connector: &Arc<FakeConnector>) -> FanOutCoordinator {
    FanOutCoordinator::new(connector.clone(), fast_executor())
}

#[tokio::test]
async fn test_failed_target_does_not_stop_the_others() {
    let connector = Arc::new(FakeConnector::new());
    connector.set("10.0.0.2", Behavior::Unreachable);
    let targets = vec![
        target(1, "10.0.0.1"),
        target(2, "10.0.0.2"),
        target(3, "10.0.0.3"),
    ];
    let sink = Collector::new();

    let result = coordinator(&connector)
        .run_on_targets(&targets, |_| vec!["uptime".to_string()], true, &sink)
        .await;

    assert!(result.overall_failed);
    assert_eq!(result.transcripts.len(), 3);
    let hosts: Vec<_> = result.transcripts.iter().map(|t| t.target.as_str()).collect();
    assert_eq!(hosts, vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);

    assert!(!result.get("10.0.0.1").unwrap().failed);
    assert!(!result.get("10.0.0.3").unwrap().failed);
    let unreachable = result.get("10.0.0.2").unwrap();
    assert!(unreachable.failed);
    assert!(unreachable.error_lines[0].contains("timed out"));

    // C ran although B failed
    assert_eq!(connector.commands("10.0.0.3"), vec!["uptime"]);

    let lines = sink.lines();
    assert_eq!(lines[0], "[10.0.0.1] ok from 10.0.0.1");
    assert!(lines[1].starts_with("[10.0.0.2] connection to 10.0.0.2 timed out"));
    assert_eq!(lines[2], "[10.0.0.3] ok from 10.0.0.3");
}

#[tokio::test]
async fn test_every_opened_session_is_closed() {
    let connector = Arc::new(FakeConnector::new());
    connector.set("10.0.0.2", Behavior::FailOn("apply".to_string()));
    let targets = vec![target(1, "10.0.0.1"), target(2, "10.0.0.2")];
    let sink = Collector::new();

    let result = coordinator(&connector)
        .run_on_targets(
            &targets,
            |_| vec!["pull".to_string(), "apply".to_string()],
            false,
            &sink,
        )
        .await;

    assert!(result.overall_failed);
    for host in ["10.0.0.1", "10.0.0.2"] {
        assert_eq!(connector.opens(host), 1);
        assert_eq!(connector.closes(host), 1);
    }
    assert_eq!(
        connector.calls().last(),
        Some(&Call::Close("10.0.0.2".to_string()))
    );
}

#[tokio::test]
async fn test_target_stops_at_first_failing_command() {
    let connector = Arc::new(FakeConnector::new());
    connector.set("10.0.0.1", Behavior::FailOn("pull".to_string()));
    let targets = vec![target(1, "10.0.0.1")];
    let sink = Collector::new();

    let result = coordinator(&connector)
        .run_on_targets(
            &targets,
            |_| vec!["docker pull api".to_string(), "docker run api".to_string()],
            false,
            &sink,
        )
        .await;

    assert_eq!(connector.commands("10.0.0.1"), vec!["docker pull api"]);
    let transcript = result.get("10.0.0.1").unwrap();
    assert_eq!(transcript.error_lines, vec!["error on 10.0.0.1"]);
    assert_eq!(transcript.exit_status, Some(1));
}

#[tokio::test]
async fn test_unlabeled_lines_are_forwarded_as_is() {
    let connector = Arc::new(FakeConnector::new());
    connector.set(
        "10.0.0.1",
        Behavior::Script(vec![
            ChannelEvent::Stdout(b"Step 1/3 : FROM alp".to_vec()),
            ChannelEvent::Stdout(b"ine\nStep 2/3".to_vec()),
            ChannelEvent::ExitStatus(0),
        ]),
    );
    let sink = Collector::new();

    let result = coordinator(&connector)
        .run_on_targets(&[target(1, "10.0.0.1")], |_| vec!["build".to_string()], false, &sink)
        .await;

    assert!(!result.overall_failed);
    assert_eq!(sink.lines(), vec!["Step 1/3 : FROM alpine", "Step 2/3"]);

    let log = result.to_log();
    assert_eq!(log["10.0.0.1"]["out"][0], "Step 1/3 : FROM alpine");
    assert!(log["10.0.0.1"]["err"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_channel_error_keeps_earlier_output() {
    let connector = Arc::new(FakeConnector::new());
    connector.set("10.0.0.1", Behavior::DropOn("docker run".to_string()));
    let targets = vec![target(1, "10.0.0.1"), target(2, "10.0.0.2")];
    let sink = Collector::new();

    let result = coordinator(&connector)
        .run_on_targets(
            &targets,
            |_| {
                vec![
                    "docker pull api".to_string(),
                    "docker rm -f api".to_string(),
                    "docker run api".to_string(),
                ]
            },
            true,
            &sink,
        )
        .await;

    assert!(result.overall_failed);
    let dropped = result.get("10.0.0.1").unwrap();
    assert!(dropped.failed);
    assert_eq!(dropped.output_lines, vec!["ok from 10.0.0.1", "ok from 10.0.0.1"]);
    assert_eq!(dropped.error_lines, vec!["channel error: connection reset"]);
    assert_eq!(connector.closes("10.0.0.1"), 1);
    assert!(!result.get("10.0.0.2").unwrap().failed);

    assert_eq!(sink.lines()[2], "[10.0.0.1] channel error: connection reset");
}
